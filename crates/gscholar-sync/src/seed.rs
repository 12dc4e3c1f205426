//! First-run seed data loaded from YAML.
//!
//! Deadlines are written as day offsets so a seed file stays meaningful whenever it is
//! loaded. Identifiers are UUIDv5 over the natural key unless the file pins one.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use gscholar_core::{Contact, ContactStatus, Opportunity, Task};
use gscholar_storage::RecordStore;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub opportunities: Vec<SeedOpportunity>,
    #[serde(default)]
    pub tasks: Vec<SeedTask>,
    #[serde(default)]
    pub contacts: Vec<SeedContact>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedOpportunity {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub school_name: String,
    pub school_abbr: String,
    #[serde(default)]
    pub is_official: bool,
    pub program_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub deadline_in_days: i64,
    pub status: String,
    #[serde(default)]
    pub location: String,
    #[serde(default = "default_website")]
    pub website_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedTask {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub school_abbr: String,
    pub school_name: String,
    pub program_name: String,
    pub title: String,
    pub deadline_in_days: i64,
    #[serde(default)]
    pub is_completed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedContact {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    pub title: String,
    pub status: ContactStatus,
}

fn default_website() -> String {
    "https://www.university.edu".to_string()
}

fn deadline_from(now: DateTime<Utc>, days: i64) -> anyhow::Result<DateTime<Utc>> {
    Duration::try_days(days)
        .and_then(|offset| now.checked_add_signed(offset))
        .with_context(|| format!("deadline_in_days {days} is out of range"))
}

fn seed_id(explicit: Option<Uuid>, natural_key: &str) -> Uuid {
    explicit.unwrap_or_else(|| Uuid::new_v5(&Uuid::NAMESPACE_URL, natural_key.as_bytes()))
}

impl SeedOpportunity {
    fn into_opportunity(self, now: DateTime<Utc>) -> anyhow::Result<Opportunity> {
        let key = format!("gscholar:seed:opportunity:{}:{}", self.school_abbr, self.program_name);
        let deadline = deadline_from(now, self.deadline_in_days)
            .with_context(|| format!("seed opportunity {} / {}", self.school_abbr, self.program_name))?;
        Ok(Opportunity {
            id: seed_id(self.id, &key),
            school_name: self.school_name,
            school_abbr: self.school_abbr,
            is_official: self.is_official,
            program_name: self.program_name,
            description: self.description,
            tags: self.tags,
            deadline,
            status: self.status,
            location: self.location,
            website_url: self.website_url,
            image_url: None,
            is_saved: false,
            saved_at: None,
        })
    }
}

impl SeedTask {
    fn into_task(self, now: DateTime<Utc>) -> anyhow::Result<Task> {
        let key = format!("gscholar:seed:task:{}:{}:{}", self.school_abbr, self.program_name, self.title);
        let deadline = deadline_from(now, self.deadline_in_days)
            .with_context(|| format!("seed task `{}`", self.title))?;
        Ok(Task {
            id: seed_id(self.id, &key),
            school_abbr: self.school_abbr,
            school_name: self.school_name,
            program_name: self.program_name,
            title: self.title,
            deadline,
            is_completed: self.is_completed,
            created_at: now,
        })
    }
}

impl SeedContact {
    fn into_contact(self, now: DateTime<Utc>) -> Contact {
        let key = format!("gscholar:seed:contact:{}", self.name);
        Contact {
            id: seed_id(self.id, &key),
            name: self.name,
            title: self.title,
            status: self.status,
            logged_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub opportunities: usize,
    pub tasks: usize,
    pub contacts: usize,
}

pub fn load_seed_file(path: impl AsRef<Path>) -> anyhow::Result<SeedFile> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Loads `seed` into the store when it holds no opportunities yet; returns `None` otherwise.
pub async fn seed_if_empty(
    store: &RecordStore,
    seed: SeedFile,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<SeedReport>> {
    if store.count::<Opportunity>().await > 0 {
        return Ok(None);
    }

    let opportunities = seed
        .opportunities
        .into_iter()
        .map(|o| o.into_opportunity(now))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let tasks = seed
        .tasks
        .into_iter()
        .map(|t| t.into_task(now))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let contacts: Vec<_> = seed.contacts.into_iter().map(|c| c.into_contact(now)).collect();

    let report = SeedReport {
        opportunities: opportunities.len(),
        tasks: tasks.len(),
        contacts: contacts.len(),
    };
    store.upsert_batch(opportunities).await.context("seeding opportunities")?;
    store.upsert_batch(tasks).await.context("seeding tasks")?;
    store.upsert_batch(contacts).await.context("seeding contacts")?;

    info!(
        opportunities = report.opportunities,
        tasks = report.tasks,
        contacts = report.contacts,
        "seeded empty store"
    );
    Ok(Some(report))
}
