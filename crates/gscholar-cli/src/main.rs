use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use gscholar_app::{App, AppConfig, ManualTask};
use gscholar_core::views::days_left;
use gscholar_core::{parse_feed_timestamp, ContactStatus, Opportunity};
use gscholar_sync::{load_seed_file, seed_if_empty, SyncConfig, SyncMode, SyncOutcome};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "gscholar")]
#[command(about = "Track graduate and research program applications")]
struct Cli {
    /// Directory holding the record collections (overrides GSCHOLAR_DATA_DIR).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Remote feed URL (overrides GSCHOLAR_FEED_URL).
    #[arg(long, global = true)]
    feed_url: Option<String>,
    /// Local feed file (overrides GSCHOLAR_FEED_FILE).
    #[arg(long, global = true)]
    feed_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pull the opportunity feed into the local store.
    Sync {
        /// Queue behind a sync that is already running instead of skipping.
        #[arg(long)]
        wait: bool,
    },
    /// Load seed data into an empty store.
    Seed {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Browse opportunities by tag and free text.
    Discover {
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        search: Option<String>,
    },
    Saved,
    /// Saved opportunities closing in the next two weeks.
    Closing,
    /// Toggle the saved flag of an opportunity.
    Save { id: Uuid },
    /// Commit to an opportunity: creates a task and its reminder.
    Commit { id: Uuid },
    Plan,
    AddTask {
        #[arg(long)]
        school: String,
        #[arg(long)]
        program: Option<String>,
        #[arg(long)]
        title: String,
        /// RFC 3339 timestamp or YYYY-MM-DD (end of day, UTC).
        #[arg(long, value_parser = parse_deadline)]
        deadline: DateTime<Utc>,
    },
    ToggleTask { id: Uuid },
    DeleteTask { id: Uuid },
    Contacts,
    AddContact {
        name: String,
        title: String,
        #[arg(long, default_value = "Not Contacted")]
        status: ContactStatus,
    },
    SetContactStatus { id: Uuid, status: ContactStatus },
    /// Write the opportunity's deadline to the calendar directory.
    Export { id: Uuid },
    Open { id: Uuid },
    Schools {
        #[arg(default_value = "")]
        query: String,
    },
    Stats,
}

fn parse_deadline(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Some(ts) = parse_feed_timestamp(raw) {
        return Ok(ts);
    }
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("`{raw}` is not a date"))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "gscholar_app=info,gscholar_sync=info,gscholar_storage=warn,warn".into()
        }))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn config_from(cli: &Cli) -> AppConfig {
    let mut sync = SyncConfig::from_env();
    if let Some(dir) = &cli.data_dir {
        sync.data_dir = dir.clone();
    }
    if let Some(url) = &cli.feed_url {
        sync.feed_url = Some(url.clone());
    }
    if let Some(file) = &cli.feed_file {
        sync.feed_file = Some(file.clone());
    }
    AppConfig::from_sync_config(sync)
}

fn print_opportunity(o: &Opportunity, now: DateTime<Utc>) {
    let saved = if o.is_saved { "*" } else { " " };
    let source = if o.is_official { "official" } else { "community" };
    println!(
        "{saved} {} [{}] {} | {} | {} | {}d left | {}",
        o.id,
        o.school_abbr,
        o.program_name,
        o.status,
        o.deadline.format("%Y-%m-%d"),
        days_left(o.deadline, now),
        source
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = config_from(&cli);
    let app = App::bootstrap(&config).await?;
    let now = Utc::now();

    match cli.command.unwrap_or(Commands::Plan) {
        Commands::Sync { wait } => {
            let mode = if wait { SyncMode::Wait } else { SyncMode::SkipIfBusy };
            match app.refresh(mode).await {
                None => bail!("no feed configured; set GSCHOLAR_FEED_URL or GSCHOLAR_FEED_FILE"),
                Some(SyncOutcome::Applied(summary)) => println!(
                    "sync complete: run_id={} records={} inserted={} updated={} unchanged={}",
                    summary.run_id, summary.records, summary.inserted, summary.updated, summary.unchanged
                ),
                Some(SyncOutcome::Skipped) => println!("sync skipped: another sync is running"),
                Some(SyncOutcome::Failed(err)) => {
                    println!("sync failed, local data kept: {err}");
                }
            }
        }
        Commands::Seed { file } => {
            let path = file
                .or_else(|| config.sync.seed_file.clone())
                .context("no seed file given; pass --file or set GSCHOLAR_SEED_FILE")?;
            let seed = load_seed_file(&path)?;
            match seed_if_empty(app.store(), seed, now).await? {
                Some(report) => println!(
                    "seeded: opportunities={} tasks={} contacts={}",
                    report.opportunities, report.tasks, report.contacts
                ),
                None => println!("store already has opportunities; seed skipped"),
            }
        }
        Commands::Discover { tag, search } => {
            for o in app.discover(tag.as_deref(), search.as_deref()).await {
                print_opportunity(&o, now);
            }
        }
        Commands::Saved => {
            for o in app.saved_opportunities().await {
                print_opportunity(&o, now);
            }
        }
        Commands::Closing => {
            for o in app.closing_soon(now).await {
                print_opportunity(&o, now);
            }
        }
        Commands::Save { id } => {
            let o = app.toggle_saved(id).await?;
            println!("{} {}", if o.is_saved { "saved" } else { "unsaved" }, o.program_name);
        }
        Commands::Commit { id } => {
            let task = app.add_to_plan(id).await?;
            println!("task {} added: {}", task.id, task.title);
        }
        Commands::Plan => {
            let plan = app.plan().await;
            let overall = plan.stats.overall;
            println!(
                "{} of {} tasks done ({}%)",
                overall.completed,
                overall.total,
                overall.percent()
            );
            for (school, tasks) in &plan.by_school {
                let progress = plan.stats.by_school.get(school).copied().unwrap_or_default();
                println!("{school} ({}/{})", progress.completed, progress.total);
                for t in tasks {
                    let mark = if t.is_completed { "x" } else { " " };
                    println!(
                        "  [{mark}] {} {} | {} | due {}",
                        t.id,
                        t.title,
                        t.program_name,
                        t.deadline.format("%Y-%m-%d")
                    );
                }
            }
        }
        Commands::AddTask {
            school,
            program,
            title,
            deadline,
        } => {
            let task = app
                .add_manual_task(ManualTask {
                    school_name: school,
                    program_name: program,
                    title,
                    deadline,
                })
                .await?;
            println!("task {} added for {}", task.id, task.school_abbr);
        }
        Commands::ToggleTask { id } => {
            let task = app.toggle_task(id).await?;
            println!("{} {}", if task.is_completed { "completed" } else { "reopened" }, task.title);
        }
        Commands::DeleteTask { id } => {
            let task = app.delete_task(id).await?;
            println!("deleted {}", task.title);
        }
        Commands::Contacts => {
            for c in app.contacts().await {
                println!(
                    "{} {} | {} | {} | {}",
                    c.id,
                    c.name,
                    c.title,
                    c.status,
                    c.logged_at.format("%Y-%m-%d")
                );
            }
        }
        Commands::AddContact { name, title, status } => {
            let contact = app.log_contact(&name, &title, status).await?;
            println!("contact {} logged", contact.id);
        }
        Commands::SetContactStatus { id, status } => {
            let contact = app.set_contact_status(id, status).await?;
            println!("{} is now {}", contact.name, contact.status);
        }
        Commands::Export { id } => {
            let event = app.export_deadline(id).await?;
            println!("exported \"{}\" to {}", event.summary(), config.calendar_dir.display());
        }
        Commands::Open { id } => {
            app.open_website(id).await?;
        }
        Commands::Schools { query } => {
            for school in app.schools(&query).await {
                println!(
                    "{} {} | {} | {} programs",
                    school.school_abbr, school.school_name, school.location, school.programs
                );
            }
        }
        Commands::Stats => {
            let stats = app.profile_stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    info!("done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn deadline_accepts_dates_and_timestamps() {
        assert_eq!(
            parse_deadline("2027-01-15").unwrap(),
            Utc.with_ymd_and_hms(2027, 1, 15, 23, 59, 59).single().unwrap()
        );
        assert_eq!(
            parse_deadline("2027-01-15T12:00:00Z").unwrap(),
            Utc.with_ymd_and_hms(2027, 1, 15, 12, 0, 0).single().unwrap()
        );
        assert!(parse_deadline("next friday").is_err());
    }

    #[test]
    fn cli_parses_contact_status_labels() {
        let cli = Cli::try_parse_from(["gscholar", "set-contact-status", "6f1c7b1e-8a43-4b59-9a55-0a9cf0d0c001", "email-sent"])
            .unwrap();
        match cli.command {
            Some(Commands::SetContactStatus { status, .. }) => assert_eq!(status, ContactStatus::EmailSent),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
