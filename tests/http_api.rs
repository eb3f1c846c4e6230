// File: ./tests/http_api.rs
mod common;

use common::{day, draft};
use mockito::{Matcher, Server};
use serde_json::json;
use std::time::Duration;
use weekplan::api::{ActivityApi, ApiError, HttpApi};
use weekplan::model::{ActivityId, ActivityPatch};
use weekplan::{ActivityStore, EntryStatus, StoreError};

const ACTIVITY_JSON: &str = r#"{
    "activityId": 11,
    "citizenId": 7,
    "date": "2024-05-01",
    "name": "Swim",
    "description": "",
    "startTime": "2024-05-01T09:00:00",
    "endTime": "2024-05-01T10:00:00",
    "isCompleted": false
}"#;

fn api(server: &Server) -> HttpApi {
    HttpApi::new(&server.url(), 7, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn fetch_reads_the_day_for_the_citizen() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/activity/7")
        .match_query(Matcher::UrlEncoded("date".into(), "2024-05-01".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!("[{}]", ACTIVITY_JSON))
        .create_async()
        .await;

    let activities = api(&server)
        .fetch_activities(day(2024, 5, 1))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].id, ActivityId::Server(11));
    assert_eq!(activities[0].name, "Swim");
    assert_eq!(activities[0].description, None);
    assert_eq!(activities[0].date_key(), day(2024, 5, 1));
}

#[tokio::test]
async fn create_posts_the_draft_in_wire_format() {
    let mut server = Server::new_async().await;
    let key = day(2024, 5, 1);
    let mock = server
        .mock("POST", "/activity/7")
        .match_body(Matcher::PartialJson(json!({
            "citizenId": 7,
            "date": "2024-05-01",
            "name": "Swim",
            "startTime": "2024-05-01T09:00:00",
            "endTime": "2024-05-01T10:00:00",
            "isCompleted": false
        })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(ACTIVITY_JSON)
        .create_async()
        .await;

    let created = api(&server)
        .create_activity(key, draft(key, "Swim", (9, 0), (10, 0)))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(created.id, ActivityId::Server(11));
}

#[tokio::test]
async fn update_sends_only_the_patched_fields() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PUT", "/activity/11")
        .match_body(Matcher::Json(json!({ "isCompleted": true })))
        .with_status(200)
        .with_body(ACTIVITY_JSON.replace("\"isCompleted\": false", "\"isCompleted\": true"))
        .create_async()
        .await;

    let updated = api(&server)
        .update_activity(ActivityId::Server(11), ActivityPatch::completed(true))
        .await
        .unwrap();

    mock.assert_async().await;
    assert!(updated.is_completed);
}

#[tokio::test]
async fn status_codes_map_onto_the_error_taxonomy() {
    let mut server = Server::new_async().await;
    let _gone = server
        .mock("PUT", "/activity/1")
        .with_status(404)
        .create_async()
        .await;
    let _invalid = server
        .mock("POST", "/activity/7")
        .with_status(422)
        .with_body("name must not be longer than 200 characters")
        .create_async()
        .await;
    let _broken = server
        .mock("DELETE", "/activity/2")
        .with_status(503)
        .create_async()
        .await;

    let api = api(&server);
    let key = day(2024, 5, 1);

    assert_eq!(
        api.update_activity(ActivityId::Server(1), ActivityPatch::rename("x"))
            .await,
        Err(ApiError::NotFound)
    );
    assert_eq!(
        api.create_activity(key, draft(key, "x", (9, 0), (10, 0)))
            .await,
        Err(ApiError::Validation(
            "name must not be longer than 200 characters".into()
        ))
    );
    assert!(matches!(
        api.delete_activity(ActivityId::Server(2)).await,
        Err(ApiError::Network(_))
    ));
}

#[tokio::test]
async fn delete_succeeds_on_no_content() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("DELETE", "/activity/11")
        .with_status(204)
        .create_async()
        .await;

    api(&server)
        .delete_activity(ActivityId::Server(11))
        .await
        .unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn temporary_ids_are_never_sent() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("DELETE", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let result = api(&server).delete_activity(ActivityId::temporary()).await;

    assert_eq!(result, Err(ApiError::NotFound));
    mock.assert_async().await;
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    // Nothing listens on port 9 of localhost.
    let api = HttpApi::new("http://127.0.0.1:9", 7, Duration::from_secs(2)).unwrap();
    let result = api.fetch_activities(day(2024, 5, 1)).await;
    assert!(matches!(result, Err(ApiError::Network(_))));
}

#[tokio::test]
async fn store_rolls_back_when_the_server_fails() {
    let mut server = Server::new_async().await;
    let key = day(2024, 5, 1);
    let _list = server
        .mock("GET", "/activity/7")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(format!("[{}]", ACTIVITY_JSON))
        .create_async()
        .await;
    let _toggle = server
        .mock("PUT", "/activity/11")
        .with_status(500)
        .create_async()
        .await;

    let store = ActivityStore::new(api(&server));
    store.ensure_fetched(key).await.unwrap();
    let before = store.read(key);

    let err = store
        .toggle_completed(key, ActivityId::Server(11))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Network(_)));
    assert_eq!(store.read(key), before);
    assert_eq!(store.read(key).status, EntryStatus::Known);
}
