//! Side-effect collaborators: calendar export, deadline reminders and link opening.
//!
//! Each one is constructed once at startup and handed to [`crate::App`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use gscholar_core::Task;
use gscholar_storage::write_atomically;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// A one-hour calendar entry starting at an application deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub title: String,
    pub school: String,
    pub url: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl CalendarEvent {
    pub fn for_deadline(
        title: impl Into<String>,
        school: impl Into<String>,
        url: Option<String>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.into(),
            school: school.into(),
            url,
            starts_at: deadline,
            ends_at: deadline + Duration::hours(1),
        }
    }

    pub fn summary(&self) -> String {
        format!("Application Deadline: {} - {}", self.school, self.title)
    }

    /// Stable across exports of the same deadline, so re-exporting overwrites.
    pub fn uid(&self) -> Uuid {
        let key = format!("gscholar:event:{}:{}", self.summary(), self.starts_at.to_rfc3339());
        Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
    }
}

#[async_trait]
pub trait CalendarExporter: Send + Sync {
    async fn export(&self, event: &CalendarEvent) -> Result<(), String>;
}

/// Writes one `.ics` file per event into a directory.
pub struct IcsCalendarExporter {
    dir: PathBuf,
}

impl IcsCalendarExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, event: &CalendarEvent) -> PathBuf {
        self.dir.join(format!("{}.ics", event.uid()))
    }
}

#[async_trait]
impl CalendarExporter for IcsCalendarExporter {
    async fn export(&self, event: &CalendarEvent) -> Result<(), String> {
        let path = self.path_for(event);
        let body = render_ics(event, Utc::now());
        write_atomically(&path, body.as_bytes())
            .await
            .map_err(|err| format!("could not write {}: {err}", path.display()))?;
        info!(path = %path.display(), summary = %event.summary(), "calendar event exported");
        Ok(())
    }
}

pub fn render_ics(event: &CalendarEvent, stamp: DateTime<Utc>) -> String {
    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//gscholar//deadline export//EN".to_string(),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{}@gscholar", event.uid()),
        format!("DTSTAMP:{}", ics_time(stamp)),
        format!("DTSTART:{}", ics_time(event.starts_at)),
        format!("DTEND:{}", ics_time(event.ends_at)),
        format!("SUMMARY:{}", escape_text(&event.summary())),
    ];
    if let Some(url) = &event.url {
        let url: String = url.chars().filter(|c| !c.is_control()).collect();
        lines.push(format!("DESCRIPTION:{}", escape_text(&url)));
        lines.push(format!("URL:{url}"));
    }
    lines.push("END:VEVENT".to_string());
    lines.push("END:VCALENDAR".to_string());

    let mut out = String::new();
    for line in &lines {
        fold_line(line, &mut out);
    }
    out
}

/// Content lines are capped at 75 octets; the rest continues on lines starting with a space.
fn fold_line(line: &str, out: &mut String) {
    const LIMIT: usize = 75;
    let mut width = 0;
    for c in line.chars() {
        if width + c.len_utf8() > LIMIT {
            out.push_str("\r\n ");
            width = 1;
        }
        out.push(c);
        width += c.len_utf8();
    }
    out.push_str("\r\n");
}

fn ics_time(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

fn escape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            other => out.push(other),
        }
    }
    out
}

/// A pending deadline reminder, keyed by the task it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub title: String,
    pub school: String,
    pub program: String,
    pub deadline: DateTime<Utc>,
    pub fire_at: DateTime<Utc>,
}

impl Reminder {
    /// Fires one day before the deadline. `None` once that moment has passed.
    pub fn for_task(task: &Task, now: DateTime<Utc>) -> Option<Self> {
        let fire_at = task.deadline - Duration::days(1);
        if fire_at <= now {
            return None;
        }
        Some(Self {
            id: task.id,
            title: task.title.clone(),
            school: task.school_name.clone(),
            program: task.program_name.clone(),
            deadline: task.deadline,
            fire_at,
        })
    }
}

#[async_trait]
pub trait ReminderScheduler: Send + Sync {
    async fn schedule(&self, reminder: Reminder) -> Result<(), String>;
    async fn cancel(&self, id: Uuid) -> Result<(), String>;
}

/// Pending reminders kept in a JSON file.
pub struct ReminderLedger {
    path: PathBuf,
    pending: Mutex<BTreeMap<Uuid, Reminder>>,
}

impl ReminderLedger {
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let pending = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let list: Vec<Reminder> = serde_json::from_slice(&bytes)
                    .with_context(|| format!("decoding reminders in {}", path.display()))?;
                list.into_iter().map(|r| (r.id, r)).collect()
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("reading reminders from {}", path.display()))
            }
        };
        Ok(Self {
            path,
            pending: Mutex::new(pending),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pending reminders, soonest first.
    pub async fn pending(&self) -> Vec<Reminder> {
        let mut list: Vec<Reminder> = self.pending.lock().await.values().cloned().collect();
        list.sort_by_key(|r| r.fire_at);
        list
    }

    pub async fn due(&self, now: DateTime<Utc>) -> Vec<Reminder> {
        self.pending()
            .await
            .into_iter()
            .filter(|r| r.fire_at <= now)
            .collect()
    }

    async fn persist(&self, pending: &BTreeMap<Uuid, Reminder>) -> Result<(), String> {
        let list: Vec<&Reminder> = pending.values().collect();
        let bytes = serde_json::to_vec_pretty(&list).map_err(|err| err.to_string())?;
        write_atomically(&self.path, &bytes)
            .await
            .map_err(|err| format!("could not write {}: {err}", self.path.display()))
    }
}

#[async_trait]
impl ReminderScheduler for ReminderLedger {
    async fn schedule(&self, reminder: Reminder) -> Result<(), String> {
        let mut pending = self.pending.lock().await;
        let id = reminder.id;
        let previous = pending.insert(id, reminder);
        if let Err(err) = self.persist(&pending).await {
            match previous {
                Some(prev) => pending.insert(id, prev),
                None => pending.remove(&id),
            };
            return Err(err);
        }
        debug!(%id, "reminder scheduled");
        Ok(())
    }

    async fn cancel(&self, id: Uuid) -> Result<(), String> {
        let mut pending = self.pending.lock().await;
        let Some(removed) = pending.remove(&id) else {
            return Ok(());
        };
        if let Err(err) = self.persist(&pending).await {
            pending.insert(id, removed);
            return Err(err);
        }
        debug!(%id, "reminder cancelled");
        Ok(())
    }
}

pub trait LinkOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<(), String>;
}

/// Prints the link for the user's terminal to pick up.
#[derive(Default)]
pub struct StdoutLinkOpener;

impl LinkOpener for StdoutLinkOpener {
    fn open(&self, url: &str) -> Result<(), String> {
        let url = url.trim();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(format!("not a web link: `{url}`"));
        }
        println!("{url}");
        Ok(())
    }
}

#[derive(Default)]
pub struct NoopCalendarExporter;

#[async_trait]
impl CalendarExporter for NoopCalendarExporter {
    async fn export(&self, _event: &CalendarEvent) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Default)]
pub struct NoopReminderScheduler;

#[async_trait]
impl ReminderScheduler for NoopReminderScheduler {
    async fn schedule(&self, _reminder: Reminder) -> Result<(), String> {
        Ok(())
    }

    async fn cancel(&self, _id: Uuid) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Default)]
pub struct NoopLinkOpener;

impl LinkOpener for NoopLinkOpener {
    fn open(&self, _url: &str) -> Result<(), String> {
        Ok(())
    }
}
