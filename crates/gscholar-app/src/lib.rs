//! The user-facing action layer: wires the store, the sync engine, the task generator and
//! the side-effect collaborators together.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gscholar_core::planner::{TaskGenerator, DEFAULT_TITLE_TEMPLATE};
use gscholar_core::views::{self, CompletionStats, ProfileStats, SchoolSummary};
use gscholar_core::{Contact, ContactStatus, Opportunity, Task, ValidationError};
use gscholar_storage::{Query, RecordKind, RecordStore, StoreError};
use gscholar_sync::{SyncConfig, SyncEngine, SyncMode, SyncOutcome};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub mod collaborators;

pub use collaborators::{
    CalendarEvent, CalendarExporter, IcsCalendarExporter, LinkOpener, NoopCalendarExporter,
    NoopLinkOpener, NoopReminderScheduler, Reminder, ReminderLedger, ReminderScheduler,
    StdoutLinkOpener,
};

pub const CRATE_NAME: &str = "gscholar-app";

/// Window for the "closing soon" banner.
pub const CLOSING_SOON_DAYS: i64 = 15;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("validation failed: {0}")]
    ValidationFailed(#[source] ValidationError),
    #[error("calendar export failed: {0}")]
    Export(String),
    #[error("could not open link: {0}")]
    OpenLink(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ActionResult<T> = Result<T, ActionError>;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sync: SyncConfig,
    pub calendar_dir: PathBuf,
    pub reminders_file: PathBuf,
    pub title_template: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_sync_config(SyncConfig::from_env())
    }

    /// Derives the app paths from `sync.data_dir` unless overridden in the environment.
    pub fn from_sync_config(sync: SyncConfig) -> Self {
        let calendar_dir = std::env::var("GSCHOLAR_CALENDAR_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| sync.data_dir.join("calendar"));
        let reminders_file = sync.data_dir.join("reminders.json");
        let title_template = std::env::var("GSCHOLAR_TASK_TITLE_TEMPLATE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE_TEMPLATE.to_string());
        Self {
            sync,
            calendar_dir,
            reminders_file,
            title_template,
        }
    }
}

/// Form input for a task the user types in.
#[derive(Debug, Clone)]
pub struct ManualTask {
    pub school_name: String,
    pub program_name: Option<String>,
    pub title: String,
    pub deadline: DateTime<Utc>,
}

impl ManualTask {
    /// Required-field check run before the generator sees the input.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::Blank { field: "title" });
        }
        if self.school_name.trim().is_empty() {
            return Err(ValidationError::Blank { field: "school_name" });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PlanView {
    pub by_school: BTreeMap<String, Vec<Task>>,
    pub stats: CompletionStats,
}

pub struct App {
    store: Arc<RecordStore>,
    sync: Option<SyncEngine>,
    generator: TaskGenerator,
    calendar: Arc<dyn CalendarExporter>,
    reminders: Arc<dyn ReminderScheduler>,
    links: Arc<dyn LinkOpener>,
}

impl App {
    /// An app without a feed and with no-op collaborators.
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self {
            store,
            sync: None,
            generator: TaskGenerator::default(),
            calendar: Arc::new(NoopCalendarExporter),
            reminders: Arc::new(NoopReminderScheduler),
            links: Arc::new(NoopLinkOpener),
        }
    }

    /// Opens the store under `config.sync.data_dir` and builds the file-backed collaborators.
    pub async fn bootstrap(config: &AppConfig) -> anyhow::Result<Self> {
        let store = Arc::new(RecordStore::open(&config.sync.data_dir).await?);
        // A broken ledger file disables reminders but leaves the file for the user to fix.
        let reminders: Arc<dyn ReminderScheduler> =
            match ReminderLedger::open(&config.reminders_file).await {
                Ok(ledger) => Arc::new(ledger),
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "reminders disabled");
                    Arc::new(NoopReminderScheduler)
                }
            };
        let mut app = Self::new(store.clone())
            .with_generator(TaskGenerator::new(config.title_template.clone()))
            .with_calendar(Arc::new(IcsCalendarExporter::new(&config.calendar_dir)))
            .with_reminders(reminders)
            .with_links(Arc::new(StdoutLinkOpener));
        if let Some(source) = config.sync.feed_source()? {
            app = app.with_sync(SyncEngine::new(store, source).with_timeout(config.sync.sync_timeout()));
        }
        info!(
            data_dir = %config.sync.data_dir.display(),
            feed = %app.sync.as_ref().map(|s| s.origin()).unwrap_or_default(),
            "app ready"
        );
        Ok(app)
    }

    pub fn with_sync(mut self, engine: SyncEngine) -> Self {
        self.sync = Some(engine);
        self
    }

    pub fn with_generator(mut self, generator: TaskGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_calendar(mut self, calendar: Arc<dyn CalendarExporter>) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_reminders(mut self, reminders: Arc<dyn ReminderScheduler>) -> Self {
        self.reminders = reminders;
        self
    }

    pub fn with_links(mut self, links: Arc<dyn LinkOpener>) -> Self {
        self.links = links;
        self
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Pulls the remote feed. `None` when no feed is configured.
    pub async fn refresh(&self, mode: SyncMode) -> Option<SyncOutcome> {
        match &self.sync {
            Some(engine) => Some(engine.refresh(mode).await),
            None => None,
        }
    }

    pub async fn discover(&self, tag: Option<&str>, query: Option<&str>) -> Vec<Opportunity> {
        let all = self
            .store
            .query(Query::<Opportunity>::all().sort_by(|a, b| a.deadline.cmp(&b.deadline)))
            .await;
        views::discover(&all, tag, query).into_iter().cloned().collect()
    }

    pub async fn opportunity(&self, id: Uuid) -> ActionResult<Opportunity> {
        self.store
            .get::<Opportunity>(id)
            .await
            .ok_or(ActionError::Store(StoreError::NotFound {
                kind: RecordKind::Opportunity,
                id,
            }))
    }

    /// Flips the saved flag; returns the updated opportunity.
    pub async fn toggle_saved(&self, id: Uuid) -> ActionResult<Opportunity> {
        let now = Utc::now();
        let updated = self
            .store
            .update::<Opportunity, _>(id, |o| {
                o.toggle_saved(now);
            })
            .await?;
        info!(%id, saved = updated.is_saved, "saved flag toggled");
        Ok(updated)
    }

    pub async fn saved_opportunities(&self) -> Vec<Opportunity> {
        let all = self.store.all::<Opportunity>().await;
        views::saved_opportunities(&all).into_iter().cloned().collect()
    }

    /// Saved opportunities whose deadline falls in the next [`CLOSING_SOON_DAYS`].
    pub async fn closing_soon(&self, now: DateTime<Utc>) -> Vec<Opportunity> {
        let saved = self.saved_opportunities().await;
        views::closing_within(&saved, now, CLOSING_SOON_DAYS)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn schools(&self, query: &str) -> Vec<SchoolSummary> {
        let all = self.store.all::<Opportunity>().await;
        views::school_directory(&all, query)
    }

    /// Commits to an opportunity: a generated task plus its reminder.
    pub async fn add_to_plan(&self, opportunity_id: Uuid) -> ActionResult<Task> {
        let opportunity = self.opportunity(opportunity_id).await?;
        let task = self.generator.for_opportunity(&opportunity);
        self.store.insert(task.clone()).await?;
        info!(task = %task.id, opportunity = %opportunity_id, "opportunity added to plan");
        self.schedule_reminder(&task).await;
        Ok(task)
    }

    pub async fn add_manual_task(&self, entry: ManualTask) -> ActionResult<Task> {
        entry.validate().map_err(ActionError::ValidationFailed)?;
        let task = self.generator.from_manual_entry(
            &entry.school_name,
            entry.program_name.as_deref(),
            &entry.title,
            entry.deadline,
        );
        self.store.insert(task.clone()).await?;
        info!(task = %task.id, school = %task.school_abbr, "manual task added");
        self.schedule_reminder(&task).await;
        Ok(task)
    }

    pub async fn toggle_task(&self, id: Uuid) -> ActionResult<Task> {
        let task = self
            .store
            .update::<Task, _>(id, |t| {
                t.toggle_completed();
            })
            .await?;
        Ok(task)
    }

    /// Removes the task and cancels its reminder.
    pub async fn delete_task(&self, id: Uuid) -> ActionResult<Task> {
        let task = self.store.delete::<Task>(id).await?;
        if let Err(reason) = self.reminders.cancel(id).await {
            warn!(task = %id, %reason, "could not cancel reminder");
        }
        Ok(task)
    }

    pub async fn plan(&self) -> PlanView {
        let tasks = self.store.all::<Task>().await;
        let ordered = views::tasks_by_deadline(&tasks);
        let by_school = views::group_tasks_by_school(ordered.iter().copied())
            .into_iter()
            .map(|(school, tasks)| (school, tasks.into_iter().cloned().collect()))
            .collect();
        PlanView {
            by_school,
            stats: views::completion_stats(&tasks),
        }
    }

    pub async fn log_contact(
        &self,
        name: &str,
        title: &str,
        status: ContactStatus,
    ) -> ActionResult<Contact> {
        let contact = Contact::new(name.trim(), title.trim(), status);
        contact.validate().map_err(ActionError::ValidationFailed)?;
        self.store.insert(contact.clone()).await?;
        Ok(contact)
    }

    pub async fn set_contact_status(&self, id: Uuid, status: ContactStatus) -> ActionResult<Contact> {
        let contact = self
            .store
            .update::<Contact, _>(id, |c| c.status = status)
            .await?;
        Ok(contact)
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        let contacts = self.store.all::<Contact>().await;
        views::contacts_by_recency(&contacts).into_iter().cloned().collect()
    }

    pub async fn profile_stats(&self) -> ProfileStats {
        let opportunities = self.store.all::<Opportunity>().await;
        let tasks = self.store.all::<Task>().await;
        let contacts = self.store.all::<Contact>().await;
        views::profile_stats(&opportunities, &tasks, &contacts)
    }

    /// Exports the opportunity's deadline as a one-hour calendar event.
    pub async fn export_deadline(&self, opportunity_id: Uuid) -> ActionResult<CalendarEvent> {
        let opportunity = self.opportunity(opportunity_id).await?;
        let event = CalendarEvent::for_deadline(
            opportunity.program_name.clone(),
            opportunity.school_name.clone(),
            Some(opportunity.website_url.clone()),
            opportunity.deadline,
        );
        self.calendar.export(&event).await.map_err(ActionError::Export)?;
        Ok(event)
    }

    pub async fn open_website(&self, opportunity_id: Uuid) -> ActionResult<String> {
        let opportunity = self.opportunity(opportunity_id).await?;
        self.links
            .open(&opportunity.website_url)
            .map_err(ActionError::OpenLink)?;
        Ok(opportunity.website_url)
    }

    async fn schedule_reminder(&self, task: &Task) {
        let Some(reminder) = Reminder::for_task(task, Utc::now()) else {
            return;
        };
        if let Err(reason) = self.reminders.schedule(reminder).await {
            warn!(task = %task.id, %reason, "could not schedule reminder");
        }
    }
}
