//! Read-only projections over stored entities. Nothing here mutates its input.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::{Contact, Opportunity, Task};

/// Tag filter value that disables tag filtering.
pub const ALL_TAGS: &str = "All";

pub fn matches_tag(opportunity: &Opportunity, tag: &str) -> bool {
    tag == ALL_TAGS || opportunity.has_tag(tag)
}

/// Case-insensitive substring match over school name, abbreviation and program name.
pub fn matches_query(opportunity: &Opportunity, query: &str) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return true;
    }
    let needle = query.to_lowercase();
    [
        &opportunity.school_name,
        &opportunity.school_abbr,
        &opportunity.program_name,
    ]
    .iter()
    .any(|field| field.to_lowercase().contains(&needle))
}

pub fn filter_by_tag<'a, I>(opportunities: I, tag: &str) -> Vec<&'a Opportunity>
where
    I: IntoIterator<Item = &'a Opportunity>,
{
    opportunities
        .into_iter()
        .filter(|o| matches_tag(o, tag))
        .collect()
}

pub fn search_text<'a, I>(opportunities: I, query: &str) -> Vec<&'a Opportunity>
where
    I: IntoIterator<Item = &'a Opportunity>,
{
    opportunities
        .into_iter()
        .filter(|o| matches_query(o, query))
        .collect()
}

/// Tag filter AND text search, in input order.
pub fn discover<'a, I>(opportunities: I, tag: Option<&str>, query: Option<&str>) -> Vec<&'a Opportunity>
where
    I: IntoIterator<Item = &'a Opportunity>,
{
    let tag = tag.unwrap_or(ALL_TAGS);
    let query = query.unwrap_or_default();
    opportunities
        .into_iter()
        .filter(|o| matches_tag(o, tag) && matches_query(o, query))
        .collect()
}

pub fn group_by_school<'a, I>(opportunities: I) -> BTreeMap<String, Vec<&'a Opportunity>>
where
    I: IntoIterator<Item = &'a Opportunity>,
{
    let mut groups: BTreeMap<String, Vec<&'a Opportunity>> = BTreeMap::new();
    for o in opportunities {
        groups.entry(o.school_abbr.clone()).or_default().push(o);
    }
    groups
}

pub fn group_tasks_by_school<'a, I>(tasks: I) -> BTreeMap<String, Vec<&'a Task>>
where
    I: IntoIterator<Item = &'a Task>,
{
    let mut groups: BTreeMap<String, Vec<&'a Task>> = BTreeMap::new();
    for t in tasks {
        groups.entry(t.school_abbr.clone()).or_default().push(t);
    }
    groups
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn remaining(&self) -> usize {
        self.total - self.completed
    }

    /// Whole-number percentage, 0 for an empty set.
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed * 100) / self.total) as u32
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompletionStats {
    pub overall: Progress,
    pub by_school: BTreeMap<String, Progress>,
}

pub fn completion_stats<'a, I>(tasks: I) -> CompletionStats
where
    I: IntoIterator<Item = &'a Task>,
{
    let mut stats = CompletionStats::default();
    for t in tasks {
        let school = stats.by_school.entry(t.school_abbr.clone()).or_default();
        school.total += 1;
        stats.overall.total += 1;
        if t.is_completed {
            school.completed += 1;
            stats.overall.completed += 1;
        }
    }
    stats
}

/// Saved opportunities, most recently saved first.
pub fn saved_opportunities<'a, I>(opportunities: I) -> Vec<&'a Opportunity>
where
    I: IntoIterator<Item = &'a Opportunity>,
{
    let mut saved: Vec<_> = opportunities.into_iter().filter(|o| o.is_saved).collect();
    saved.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
    saved
}

/// Whole days until `deadline`, truncated; negative once the deadline has passed.
pub fn days_left(deadline: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (deadline - now).num_days()
}

/// Opportunities whose deadline falls in `[now, now + days]`, soonest first.
pub fn closing_within<'a, I>(opportunities: I, now: DateTime<Utc>, days: i64) -> Vec<&'a Opportunity>
where
    I: IntoIterator<Item = &'a Opportunity>,
{
    let horizon = now + Duration::days(days);
    let mut closing: Vec<_> = opportunities
        .into_iter()
        .filter(|o| o.deadline >= now && o.deadline <= horizon)
        .collect();
    closing.sort_by_key(|o| o.deadline);
    closing
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchoolSummary {
    pub school_abbr: String,
    pub school_name: String,
    pub location: String,
    pub programs: usize,
}

/// One row per school abbreviation. The query also matches location, which the
/// plain text search does not.
pub fn school_directory<'a, I>(opportunities: I, query: &str) -> Vec<SchoolSummary>
where
    I: IntoIterator<Item = &'a Opportunity>,
{
    let needle = query.trim().to_lowercase();
    let matching = opportunities.into_iter().filter(|o| {
        needle.is_empty()
            || matches_query(o, &needle)
            || o.location.to_lowercase().contains(&needle)
    });
    group_by_school(matching)
        .into_iter()
        .filter_map(|(abbr, programs)| {
            let first = programs.first()?;
            Some(SchoolSummary {
                school_name: first.school_name.clone(),
                location: first.location.clone(),
                programs: programs.len(),
                school_abbr: abbr,
            })
        })
        .collect()
}

pub fn tasks_by_deadline<'a, I>(tasks: I) -> Vec<&'a Task>
where
    I: IntoIterator<Item = &'a Task>,
{
    let mut sorted: Vec<_> = tasks.into_iter().collect();
    sorted.sort_by_key(|t| t.deadline);
    sorted
}

pub fn contacts_by_recency<'a, I>(contacts: I) -> Vec<&'a Contact>
where
    I: IntoIterator<Item = &'a Contact>,
{
    let mut sorted: Vec<_> = contacts.into_iter().collect();
    sorted.sort_by(|a, b| b.logged_at.cmp(&a.logged_at));
    sorted
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProfileStats {
    pub saved: usize,
    pub tasks: usize,
    pub contacts: usize,
}

pub fn profile_stats(opportunities: &[Opportunity], tasks: &[Task], contacts: &[Contact]) -> ProfileStats {
    ProfileStats {
        saved: opportunities.iter().filter(|o| o.is_saved).count(),
        tasks: tasks.len(),
        contacts: contacts.len(),
    }
}
