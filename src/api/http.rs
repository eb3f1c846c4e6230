// File: ./src/api/http.rs
//! JSON-over-HTTP backend.
//!
//! Endpoints (relative to the configured base URL):
//!
//! * `GET    /activity/{citizen}?date=YYYY-MM-DD`
//! * `POST   /activity/{citizen}`
//! * `PUT    /activity/{id}`
//! * `DELETE /activity/{id}`
use crate::api::{ActivityApi, ApiError};
use crate::config::Config;
use crate::model::{Activity, ActivityDraft, ActivityId, ActivityPatch, DateKey};
use chrono::NaiveDateTime;
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wire shape of an activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityDto {
    activity_id: i64,
    #[serde(default)]
    citizen_id: Option<i64>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    start_time: NaiveDateTime,
    end_time: NaiveDateTime,
    #[serde(default)]
    is_completed: bool,
}

impl From<ActivityDto> for Activity {
    fn from(dto: ActivityDto) -> Self {
        Self {
            id: ActivityId::Server(dto.activity_id),
            name: dto.name,
            // The backend sends "" for "no description".
            description: dto.description.filter(|d| !d.is_empty()),
            start: dto.start_time,
            end: dto.end_time,
            is_completed: dto.is_completed,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest<'a> {
    citizen_id: i64,
    date: DateKey,
    name: &'a str,
    description: &'a str,
    start_time: NaiveDateTime,
    end_time: NaiveDateTime,
    is_completed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_time: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_time: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_completed: Option<bool>,
}

impl<'a> From<&'a ActivityPatch> for UpdateRequest<'a> {
    fn from(patch: &'a ActivityPatch) -> Self {
        Self {
            name: patch.name.as_deref(),
            // Clearing is sent as an empty string.
            description: patch
                .description
                .as_ref()
                .map(|d| d.as_deref().unwrap_or("")),
            start_time: patch.start,
            end_time: patch.end,
            is_completed: patch.is_completed,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HttpApi {
    http: reqwest::Client,
    base_url: String,
    citizen_id: i64,
}

impl HttpApi {
    pub fn new(base_url: &str, citizen_id: i64, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("weekplan/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            citizen_id,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::new(&config.api_url, config.citizen_id, config.request_timeout())
    }

    fn server_id(id: ActivityId) -> Result<i64, ApiError> {
        // A temporary id has no counterpart on the server.
        id.server_id().ok_or(ApiError::NotFound)
    }

    /// Maps a response status onto the collaborator error taxonomy.
    async fn check(resp: Response) -> Result<Response, ApiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        match status {
            StatusCode::NOT_FOUND => Err(ApiError::NotFound),
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                let body = resp.text().await.unwrap_or_default();
                let message = if body.trim().is_empty() {
                    status.to_string()
                } else {
                    body
                };
                Err(ApiError::Validation(message))
            }
            other => Err(ApiError::Network(format!("server returned {}", other))),
        }
    }

    fn transport(err: reqwest::Error) -> ApiError {
        ApiError::Network(err.to_string())
    }

    async fn decode<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Network(format!("malformed response: {}", e)))
    }
}

impl ActivityApi for HttpApi {
    async fn fetch_activities(&self, key: DateKey) -> Result<Vec<Activity>, ApiError> {
        let resp = self
            .http
            .get(format!("{}/activity/{}", self.base_url, self.citizen_id))
            .query(&[("date", key.to_string())])
            .send()
            .await
            .map_err(Self::transport)?;
        let dtos: Vec<ActivityDto> = Self::decode(Self::check(resp).await?).await?;
        Ok(dtos.into_iter().map(Activity::from).collect())
    }

    async fn create_activity(
        &self,
        key: DateKey,
        draft: ActivityDraft,
    ) -> Result<Activity, ApiError> {
        let body = CreateRequest {
            citizen_id: self.citizen_id,
            date: key,
            name: &draft.name,
            description: draft.description.as_deref().unwrap_or(""),
            start_time: draft.start,
            end_time: draft.end,
            is_completed: draft.is_completed,
        };
        let resp = self
            .http
            .post(format!("{}/activity/{}", self.base_url, self.citizen_id))
            .json(&body)
            .send()
            .await
            .map_err(Self::transport)?;
        let dto: ActivityDto = Self::decode(Self::check(resp).await?).await?;
        Ok(dto.into())
    }

    async fn update_activity(
        &self,
        id: ActivityId,
        patch: ActivityPatch,
    ) -> Result<Activity, ApiError> {
        let server_id = Self::server_id(id)?;
        let resp = self
            .http
            .put(format!("{}/activity/{}", self.base_url, server_id))
            .json(&UpdateRequest::from(&patch))
            .send()
            .await
            .map_err(Self::transport)?;
        let dto: ActivityDto = Self::decode(Self::check(resp).await?).await?;
        Ok(dto.into())
    }

    async fn delete_activity(&self, id: ActivityId) -> Result<(), ApiError> {
        let server_id = Self::server_id(id)?;
        let resp = self
            .http
            .delete(format!("{}/activity/{}", self.base_url, server_id))
            .send()
            .await
            .map_err(Self::transport)?;
        Self::check(resp).await.map(|_| ())
    }
}
