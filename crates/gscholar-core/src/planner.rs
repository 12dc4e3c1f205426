//! Task generation from opportunities and from manual entry.
//!
//! The generator only builds `Task` values; persisting them is the caller's job.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{Opportunity, Task};

pub const DEFAULT_TITLE_TEMPLATE: &str = "Review eligibility for {programName}";
pub const GENERAL_APPLICATION: &str = "General Application";
pub const UNKNOWN_SCHOOL_ABBR: &str = "NA";

/// Words that say what kind of institution it is rather than which one.
const GENERIC_WORDS: [&str; 9] = [
    "university", "college", "institute", "school", "of", "the", "and", "at", "for",
];

/// Two-letter school abbreviation for manually entered schools.
///
/// Generic words such as "University" are skipped when anything else is left. One word
/// gives its first two characters, several words give the initials of the first two,
/// and a blank name gives `NA`.
///
/// Skipping generic words means names whose second word is generic abbreviate differently
/// from a plain first-two-initials rule: "Massachusetts Institute of Technology" gives `MT`,
/// not `MI`, and "Stanford University" gives `ST`, not `SU`.
pub fn compute_abbr(school_name: &str) -> String {
    let all: Vec<&str> = school_name.split_whitespace().collect();
    let distinctive: Vec<&str> = all.iter().copied().filter(|w| !is_generic(w)).collect();
    let words = if distinctive.is_empty() { all } else { distinctive };
    match words.as_slice() {
        [] => UNKNOWN_SCHOOL_ABBR.to_string(),
        [only] => only.chars().take(2).collect::<String>().to_uppercase(),
        [first, second, ..] => first
            .chars()
            .take(1)
            .chain(second.chars().take(1))
            .collect::<String>()
            .to_uppercase(),
    }
}

fn is_generic(word: &str) -> bool {
    GENERIC_WORDS.iter().any(|g| word.eq_ignore_ascii_case(g))
}

/// Expands `{programName}`, `{schoolName}` and `{schoolAbbr}` placeholders.
pub fn render_title(template: &str, opportunity: &Opportunity) -> String {
    template
        .replace("{programName}", &opportunity.program_name)
        .replace("{schoolName}", &opportunity.school_name)
        .replace("{schoolAbbr}", &opportunity.school_abbr)
}

#[derive(Debug, Clone)]
pub struct TaskGenerator {
    title_template: String,
}

impl Default for TaskGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_TITLE_TEMPLATE)
    }
}

impl TaskGenerator {
    pub fn new(title_template: impl Into<String>) -> Self {
        Self {
            title_template: title_template.into(),
        }
    }

    pub fn title_template(&self) -> &str {
        &self.title_template
    }

    /// Task for committing to `opportunity`, titled with the generator's template.
    pub fn for_opportunity(&self, opportunity: &Opportunity) -> Task {
        self.from_opportunity(opportunity, &self.title_template)
    }

    pub fn from_opportunity(&self, opportunity: &Opportunity, title_template: &str) -> Task {
        Task {
            id: Uuid::new_v4(),
            school_abbr: opportunity.school_abbr.clone(),
            school_name: opportunity.school_name.clone(),
            program_name: opportunity.program_name.clone(),
            title: render_title(title_template, opportunity),
            deadline: opportunity.deadline,
            is_completed: false,
            created_at: Utc::now(),
        }
    }

    pub fn from_manual_entry(
        &self,
        school_name: &str,
        program_name: Option<&str>,
        title: &str,
        deadline: DateTime<Utc>,
    ) -> Task {
        let school_name = school_name.trim();
        let program_name = match program_name.map(str::trim) {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => GENERAL_APPLICATION.to_string(),
        };
        Task {
            id: Uuid::new_v4(),
            school_abbr: compute_abbr(school_name),
            school_name: school_name.to_string(),
            program_name,
            title: title.trim().to_string(),
            deadline,
            is_completed: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn abbreviations() {
        assert_eq!(compute_abbr("Stanford University"), "ST");
        assert_eq!(compute_abbr("MIT"), "MI");
        assert_eq!(compute_abbr(""), "NA");
        assert_eq!(compute_abbr("   "), "NA");
        assert_eq!(compute_abbr("ETH"), "ET");
        assert_eq!(compute_abbr("the university of tokyo"), "TO");
        assert_eq!(compute_abbr("Carnegie Mellon University"), "CM");
        assert_eq!(compute_abbr("Massachusetts Institute of Technology"), "MT");
        assert_eq!(compute_abbr("University"), "UN");
        assert_eq!(compute_abbr("X"), "X");
        assert_eq!(compute_abbr("école polytechnique"), "ÉP");
    }

    #[test]
    fn task_from_opportunity_copies_school_and_deadline() {
        let deadline = Utc.with_ymd_and_hms(2027, 1, 15, 23, 59, 59).single().unwrap();
        let opp = Opportunity {
            id: Uuid::new_v4(),
            school_name: "Carnegie Mellon University".into(),
            school_abbr: "CMU".into(),
            is_official: false,
            program_name: "RISS".into(),
            description: String::new(),
            tags: vec!["Summer Research".into()],
            deadline,
            status: "Stipend + Housing".into(),
            location: "Pittsburgh, PA, USA".into(),
            website_url: "https://riss.ri.cmu.edu/".into(),
            image_url: None,
            is_saved: false,
            saved_at: None,
        };

        let task = TaskGenerator::default().for_opportunity(&opp);
        assert_eq!(task.title, "Review eligibility for RISS");
        assert_eq!(task.deadline, deadline);
        assert!(!task.is_completed);
        assert!(task.belongs_to(&opp));

        let custom = TaskGenerator::default().from_opportunity(&opp, "Email {schoolAbbr} about {programName}");
        assert_eq!(custom.title, "Email CMU about RISS");
    }

    #[test]
    fn manual_entry_defaults_program_and_derives_abbr() {
        let deadline = Utc::now();
        let generator = TaskGenerator::default();

        let task = generator.from_manual_entry("Stanford University", None, "Draft SOP", deadline);
        assert_eq!(task.school_abbr, "ST");
        assert_eq!(task.program_name, GENERAL_APPLICATION);
        assert_eq!(task.deadline, deadline);

        let blank_program = generator.from_manual_entry("MIT", Some("  "), "Email lab", deadline);
        assert_eq!(blank_program.program_name, GENERAL_APPLICATION);
        assert_eq!(blank_program.school_abbr, "MI");

        let named = generator.from_manual_entry("ETH Zurich", Some("SSRF"), "Apply", deadline);
        assert_eq!(named.program_name, "SSRF");
        assert_eq!(named.school_abbr, "EZ");
    }
}
