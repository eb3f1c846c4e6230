use anyhow::{Context, Result, bail};
use chrono::NaiveTime;
use simplelog::{ColorChoice, CombinedLogger, SharedLogger, TermLogger, TerminalMode, WriteLogger};
use std::env;
use std::fs::OpenOptions;
use std::sync::Arc;
use weekplan::api::{ActivityApi, HttpApi, MemoryApi};
use weekplan::config::Config;
use weekplan::context::{AppContext, StandardContext};
use weekplan::model::{ActivityDraft, ActivityId, DateKey};
use weekplan::{ActivityStore, DayCopyCoordinator, DaySnapshot, Eligibility};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.is_empty() || matches!(args[0].as_str(), "--help" | "-h" | "help") {
        print_help();
        return Ok(());
    }

    let ctx = StandardContext::new(None);
    let config = Config::load_or_default(&ctx)?;
    init_logging(&ctx, &config);

    check_offline(&args[0], &config)?;

    if config.is_offline() {
        log::info!("No api_url configured, using the in-memory backend");
        let store = Arc::new(ActivityStore::from_config(MemoryApi::new(), &config));
        run(store, &args).await
    } else {
        let api = HttpApi::from_config(&config).context("Failed to build HTTP client")?;
        let store = Arc::new(ActivityStore::from_config(api, &config));
        run(store, &args).await
    }
}

/// The in-memory backend starts empty on every run, so commands that act on
/// existing activities can never succeed without a server.
fn check_offline(command: &str, config: &Config) -> Result<()> {
    if config.is_offline() && matches!(command, "done" | "rm" | "copy") {
        bail!(
            "'{}' needs a server: set api_url in config.toml (offline mode keeps nothing between runs)",
            command
        );
    }
    Ok(())
}

fn init_logging(ctx: &dyn AppContext, config: &Config) {
    let level = config.log_level_filter();
    let log_config = simplelog::ConfigBuilder::new().build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        log_config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    if let Some(path) = ctx.get_log_path()
        && let Ok(file) = OpenOptions::new().create(true).append(true).open(&path)
    {
        loggers.push(WriteLogger::new(level, log_config, file));
    }
    // Only fails if a logger is already installed.
    let _ = CombinedLogger::init(loggers);
}

async fn run<A: ActivityApi>(store: Arc<ActivityStore<A>>, args: &[String]) -> Result<()> {
    match args[0].as_str() {
        "show" => {
            let key = date_arg(args.get(1))?;
            store.ensure_fetched(key).await?;
            print_day(&store.read(key));
        }
        "week" => {
            let key = date_arg(args.get(1))?;
            for (day, result) in store.prefetch_week(key).await {
                match result {
                    Ok(_) => print_day(&store.read(day)),
                    Err(e) => println!("{}  (unavailable: {})", day, e),
                }
            }
        }
        "add" => {
            if args.len() < 5 {
                bail!("usage: weekplan add <date> <start HH:MM> <end HH:MM> <name...>");
            }
            let key = date_arg(args.get(1))?;
            let start = key.at(time_arg(&args[2])?);
            let end = key.at(time_arg(&args[3])?);
            if end < start {
                bail!("end must not be before start");
            }
            let draft = ActivityDraft::new(args[4..].join(" "), start, end);
            store.ensure_fetched(key).await?;
            let created = store.create(key, draft).await?;
            println!("Created activity {}", created.id);
        }
        "done" | "rm" => {
            if args.len() < 3 {
                bail!("usage: weekplan {} <date> <id>", args[0]);
            }
            let key = date_arg(args.get(1))?;
            let id = ActivityId::Server(args[2].parse().context("Activity id must be a number")?);
            store.ensure_fetched(key).await?;
            if args[0] == "done" {
                let activity = store.toggle_completed(key, id).await?;
                println!(
                    "{} is now {}",
                    activity.name,
                    if activity.is_completed { "done" } else { "open" }
                );
            } else {
                store.delete(key, id).await?;
                println!("Deleted activity {}", id);
            }
        }
        "copy" => {
            if args.len() < 3 {
                bail!("usage: weekplan copy <from> <to> [--yes]");
            }
            let from = date_arg(args.get(1))?;
            let to = date_arg(args.get(2))?;
            let confirmed = args.iter().any(|a| a == "--yes" || a == "-y");
            copy_day(store, from, to, confirmed).await?;
        }
        other => bail!("Unknown command '{}'. Try --help.", other),
    }
    Ok(())
}

async fn copy_day<A: ActivityApi>(
    store: Arc<ActivityStore<A>>,
    from: DateKey,
    to: DateKey,
    confirmed: bool,
) -> Result<()> {
    let coordinator = DayCopyCoordinator::new(store.clone(), from);
    coordinator.set_destination_date(to).await?;

    let status = coordinator.status();
    match status.eligibility {
        Some(Eligibility::Blocked) => {
            println!("{} has no activities to copy.", from);
            return Ok(());
        }
        Some(Eligibility::WarnOverwrite) if !confirmed => {
            println!(
                "{} already has {} activities that would be replaced. Re-run with --yes.",
                to,
                store.read(to).activities.len()
            );
            return Ok(());
        }
        _ => {}
    }

    let report = coordinator.confirm_copy().await?;
    println!(
        "Copied {} activities from {} to {} (removed {}).",
        report.created, from, to, report.deleted
    );
    print_day(&store.read(to));
    Ok(())
}

fn date_arg(arg: Option<&String>) -> Result<DateKey> {
    match arg.map(String::as_str) {
        None | Some("today") => Ok(DateKey::today()),
        Some("tomorrow") => Ok(DateKey::today().succ()),
        Some("yesterday") => Ok(DateKey::today().pred()),
        Some(raw) => raw.parse().with_context(|| format!("Invalid date '{}'", raw)),
    }
}

fn time_arg(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M").with_context(|| format!("Invalid time '{}'", raw))
}

fn print_day(snapshot: &DaySnapshot) {
    println!("{}", snapshot.key);
    if snapshot.activities.is_empty() {
        println!("  (nothing planned)");
        return;
    }
    let mut activities = snapshot.activities.clone();
    activities.sort_by_key(|a| a.start);
    for a in activities {
        println!(
            "  [{}] {}-{}  {}  (#{})",
            if a.is_completed { "x" } else { " " },
            a.start.format("%H:%M"),
            a.end.format("%H:%M"),
            a.name,
            a.id
        );
        if let Some(desc) = &a.description {
            println!("        {}", desc);
        }
    }
}

fn print_help() {
    println!(
        "weekplan v{} - day planner activity cache",
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!("USAGE:");
    println!("    weekplan show [date]                       List one day");
    println!("    weekplan week [date]                       List the week containing date");
    println!("    weekplan add <date> <HH:MM> <HH:MM> <name> Add an activity");
    println!("    weekplan done <date> <id>                  Toggle an activity's completion");
    println!("    weekplan rm <date> <id>                    Delete an activity");
    println!("    weekplan copy <from> <to> [--yes]          Replace <to>'s activities with <from>'s");
    println!();
    println!("Dates are YYYY-MM-DD, 'today', 'tomorrow' or 'yesterday'.");
    println!("Without an api_url in config.toml, an empty in-memory backend is used for");
    println!("the run (demo only): nothing is kept, and done/rm/copy are refused.");
}
