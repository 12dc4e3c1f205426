//! Core domain model for GlobeScholar: opportunities, plan tasks and outreach contacts.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod planner;
pub mod views;

pub const CRATE_NAME: &str = "gscholar-core";

/// Status label given to opportunities first seen through the remote feed.
pub const REMOTE_DEFAULT_STATUS: &str = "Open";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("saved_at must be present exactly when is_saved is true")]
    SavedStateMismatch,
    #[error("{field} must not be blank")]
    Blank { field: &'static str },
}

/// A discoverable research or graduate program listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub school_name: String,
    pub school_abbr: String,
    pub is_official: bool,
    pub program_name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub deadline: DateTime<Utc>,
    pub status: String,
    pub location: String,
    pub website_url: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub is_saved: bool,
    pub saved_at: Option<DateTime<Utc>>,
}

impl Opportunity {
    /// Builds a fresh local record from a feed record. Remote listings are official,
    /// open and unsaved until the user says otherwise.
    pub fn from_remote(record: OpportunityRecord) -> Self {
        Self {
            id: record.id,
            school_name: record.school_name,
            school_abbr: record.school_abbr,
            is_official: true,
            program_name: record.program_name,
            description: record.description,
            tags: record.tags,
            deadline: record.deadline,
            status: REMOTE_DEFAULT_STATUS.to_string(),
            location: record.location,
            website_url: record.website_url,
            image_url: record.image_url,
            is_saved: false,
            saved_at: None,
        }
    }

    /// Overwrites the remote-owned fields. `is_saved`, `saved_at`, `status` and
    /// `is_official` belong to the local copy and are left alone.
    pub fn apply_remote(&mut self, record: OpportunityRecord) {
        self.school_name = record.school_name;
        self.school_abbr = record.school_abbr;
        self.program_name = record.program_name;
        self.description = record.description;
        self.location = record.location;
        self.website_url = record.website_url;
        self.deadline = record.deadline;
        self.tags = record.tags;
        if record.image_url.is_some() {
            self.image_url = record.image_url;
        }
    }

    pub fn mark_saved(&mut self, at: DateTime<Utc>) {
        self.is_saved = true;
        self.saved_at = Some(at);
    }

    pub fn unmark_saved(&mut self) {
        self.is_saved = false;
        self.saved_at = None;
    }

    /// Flips the saved flag and returns the new value.
    pub fn toggle_saved(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_saved {
            self.unmark_saved();
        } else {
            self.mark_saved(at);
        }
        self.is_saved
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.is_saved != self.saved_at.is_some() {
            return Err(ValidationError::SavedStateMismatch);
        }
        Ok(())
    }
}

/// Transfer record decoded from the remote opportunity feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityRecord {
    pub id: Uuid,
    pub school_abbr: String,
    pub school_name: String,
    pub program_name: String,
    pub location: String,
    pub description: String,
    pub website_url: String,
    #[serde(deserialize_with = "deserialize_feed_timestamp")]
    pub deadline: DateTime<Utc>,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl From<Opportunity> for OpportunityRecord {
    fn from(value: Opportunity) -> Self {
        Self {
            id: value.id,
            school_abbr: value.school_abbr,
            school_name: value.school_name,
            program_name: value.program_name,
            location: value.location,
            description: value.description,
            website_url: value.website_url,
            deadline: value.deadline,
            tags: value.tags,
            image_url: value.image_url,
        }
    }
}

/// Accepts RFC 3339 timestamps and offset-less ISO-8601 timestamps, the latter read as UTC.
pub fn parse_feed_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn deserialize_feed_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_feed_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid ISO-8601 timestamp `{raw}`")))
}

/// A user-tracked to-do item, loosely tied to a school/program by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub school_abbr: String,
    pub school_name: String,
    pub program_name: String,
    pub title: String,
    pub deadline: DateTime<Utc>,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Flips completion and returns the new value.
    pub fn toggle_completed(&mut self) -> bool {
        self.is_completed = !self.is_completed;
        self.is_completed
    }

    /// Soft link to an opportunity: same school abbreviation and program name.
    pub fn belongs_to(&self, opportunity: &Opportunity) -> bool {
        self.school_abbr == opportunity.school_abbr && self.program_name == opportunity.program_name
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::Blank { field: "title" });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContactStatus {
    Replied,
    EmailSent,
    FollowingUp,
    NotContacted,
}

impl ContactStatus {
    pub const ALL: [ContactStatus; 4] = [
        ContactStatus::Replied,
        ContactStatus::EmailSent,
        ContactStatus::FollowingUp,
        ContactStatus::NotContacted,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ContactStatus::Replied => "Replied",
            ContactStatus::EmailSent => "Email Sent",
            ContactStatus::FollowingUp => "Following Up",
            ContactStatus::NotContacted => "Not Contacted",
        }
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown contact status `{0}`")]
pub struct UnknownContactStatus(pub String);

impl FromStr for ContactStatus {
    type Err = UnknownContactStatus;

    /// Matches display labels case-insensitively, ignoring spaces, dashes and underscores,
    /// so `email-sent` and `Email Sent` both parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = squash(s);
        ContactStatus::ALL
            .into_iter()
            .find(|status| squash(status.label()) == wanted)
            .ok_or_else(|| UnknownContactStatus(s.to_string()))
    }
}

fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}

// Stored labels that no longer parse fall back to the neutral state.
impl From<String> for ContactStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or(ContactStatus::NotContacted)
    }
}

impl From<ContactStatus> for String {
    fn from(value: ContactStatus) -> Self {
        value.label().to_string()
    }
}

/// A logged outreach target, typically a professor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub status: ContactStatus,
    pub logged_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(name: impl Into<String>, title: impl Into<String>, status: ContactStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            title: title.into(),
            status,
            logged_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::Blank { field: "name" });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: Uuid) -> OpportunityRecord {
        OpportunityRecord {
            id,
            school_abbr: "CMU".into(),
            school_name: "Carnegie Mellon University".into(),
            program_name: "Robotics Institute Summer Scholars (RISS)".into(),
            location: "Pittsburgh, PA, USA".into(),
            description: "Intensive summer research program in robotics.".into(),
            website_url: "https://riss.ri.cmu.edu/".into(),
            deadline: Utc.with_ymd_and_hms(2027, 2, 1, 23, 59, 59).single().unwrap(),
            tags: vec!["Summer Research".into(), "Robotics".into()],
            image_url: None,
        }
    }

    #[test]
    fn remote_records_start_official_open_and_unsaved() {
        let opp = Opportunity::from_remote(record(Uuid::new_v4()));
        assert!(opp.is_official);
        assert_eq!(opp.status, "Open");
        assert!(!opp.is_saved);
        assert!(opp.saved_at.is_none());
        assert!(opp.validate().is_ok());
    }

    #[test]
    fn apply_remote_keeps_local_state() {
        let id = Uuid::new_v4();
        let mut opp = Opportunity::from_remote(record(id));
        let saved_at = Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).single().unwrap();
        opp.mark_saved(saved_at);
        opp.status = "Stipend + Housing".into();

        let mut incoming = record(id);
        incoming.program_name = "RISS 2027".into();
        incoming.tags = vec!["AI".into()];
        opp.apply_remote(incoming);

        assert_eq!(opp.program_name, "RISS 2027");
        assert_eq!(opp.tags, vec!["AI".to_string()]);
        assert!(opp.is_saved);
        assert_eq!(opp.saved_at, Some(saved_at));
        assert_eq!(opp.status, "Stipend + Housing");
    }

    #[test]
    fn toggle_saved_keeps_saved_at_in_step() {
        let mut opp = Opportunity::from_remote(record(Uuid::new_v4()));
        let now = Utc::now();
        assert!(opp.toggle_saved(now));
        assert_eq!(opp.saved_at, Some(now));
        assert!(!opp.toggle_saved(now));
        assert_eq!(opp.saved_at, None);

        opp.is_saved = true;
        assert_eq!(opp.validate(), Err(ValidationError::SavedStateMismatch));
    }

    #[test]
    fn feed_timestamps_accept_offsetless_iso() {
        let with_z = parse_feed_timestamp("2027-02-15T23:59:59Z").unwrap();
        let naive = parse_feed_timestamp("2027-02-15T23:59:59.000000").unwrap();
        assert_eq!(with_z, naive);
        assert!(parse_feed_timestamp("mid-April").is_none());
    }

    #[test]
    fn record_decodes_camel_case_and_ignores_extras() {
        let json = r#"{
            "id": "6f1c7b1e-8a43-4b59-9a55-0a9cf0d0c001",
            "schoolAbbr": "MIT",
            "schoolName": "Massachusetts Institute of Technology",
            "programName": "MSRP",
            "location": "Cambridge, MA, USA",
            "description": "Summer research.",
            "websiteUrl": "https://odge.mit.edu/undergraduate/msrp/",
            "deadline": "2027-01-10T12:00:00+00:00",
            "tags": ["Summer Research", "Engineering"],
            "deadline_offset_days": 15
        }"#;
        let rec: OpportunityRecord = serde_json::from_str(json).expect("decode");
        assert_eq!(rec.school_abbr, "MIT");
        assert_eq!(rec.tags.len(), 2);
        assert!(rec.image_url.is_none());
    }

    #[test]
    fn contact_status_round_trips_labels_and_tolerates_unknowns() {
        assert_eq!("email-sent".parse::<ContactStatus>(), Ok(ContactStatus::EmailSent));
        assert_eq!("Following Up".parse::<ContactStatus>(), Ok(ContactStatus::FollowingUp));
        assert!("ghosted".parse::<ContactStatus>().is_err());

        let decoded: ContactStatus = serde_json::from_str("\"ghosted\"").unwrap();
        assert_eq!(decoded, ContactStatus::NotContacted);
        assert_eq!(serde_json::to_string(&ContactStatus::Replied).unwrap(), "\"Replied\"");
    }

    #[test]
    fn blank_task_title_is_invalid() {
        let task = Task {
            id: Uuid::new_v4(),
            school_abbr: "MI".into(),
            school_name: "MIT".into(),
            program_name: "General Application".into(),
            title: "   ".into(),
            deadline: Utc::now(),
            is_completed: false,
            created_at: Utc::now(),
        };
        assert_eq!(task.validate(), Err(ValidationError::Blank { field: "title" }));
    }
}
