use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeSet, HashSet};

pub const OPTION_KEYS: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = OPTION_KEYS.len();

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Public,
    Shared,
    Owned,
}

impl AccessLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::Public => "public",
            AccessLevel::Shared => "shared",
            AccessLevel::Owned => "owned",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl CurrentUser {
    pub fn new(uid: impl Into<String>, email: Option<&str>) -> Self {
        Self {
            uid: uid.into(),
            email: email.map(str::to_string),
            display_name: None,
        }
    }

    pub fn sharing_key(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty())
    }

    pub fn owner_name(&self) -> String {
        self.display_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| self.uid.clone())
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSet {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub visibility: Visibility,
    pub owner_id: String,
    #[serde(default)]
    pub owner_name: String,
    #[serde(default)]
    pub shared_with: Vec<String>,
    #[serde(default)]
    pub question_count: u32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetSummary {
    pub id: String,
    pub name: String,
    pub question_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizBundle {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub question_count: u32,
    pub total_available_questions: u32,
    #[serde(default)]
    pub set_ids: Vec<String>,
    #[serde(default)]
    pub set_summaries: Vec<SetSummary>,
    #[serde(default)]
    pub visibility: Visibility,
    pub owner_id: String,
    #[serde(default)]
    pub owner_name: String,
    #[serde(default)]
    pub shared_with: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub trait Shareable {
    fn id(&self) -> &str;
    fn owner_id(&self) -> &str;
    fn shared_with(&self) -> &[String];
    fn visibility(&self) -> Visibility;
    fn updated_at(&self) -> Option<DateTime<Utc>>;
}

macro_rules! impl_shareable {
    ($ty:ty) => {
        impl Shareable for $ty {
            fn id(&self) -> &str {
                &self.id
            }
            fn owner_id(&self) -> &str {
                &self.owner_id
            }
            fn shared_with(&self) -> &[String] {
                &self.shared_with
            }
            fn visibility(&self) -> Visibility {
                self.visibility
            }
            fn updated_at(&self) -> Option<DateTime<Utc>> {
                self.updated_at
            }
        }
    };
}

impl_shareable!(QuestionSet);
impl_shareable!(QuizBundle);

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Accessible<T> {
    #[serde(flatten)]
    pub item: T,
    pub access: AccessLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuizOption {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(default)]
    pub id: String,
    pub intrebare: String,
    pub options: Vec<QuizOption>,
    pub correct_answers: Vec<String>,
    #[serde(default)]
    pub allow_multiple: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl Question {
    pub fn correct_set(&self) -> BTreeSet<String> {
        self.correct_answers.iter().map(|a| a.trim().to_lowercase()).collect()
    }

    pub fn legacy_answer_key(&self) -> String {
        self.correct_answers.join(",")
    }

    pub fn validate(&self) -> Result<(), Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        if self.intrebare.trim().is_empty() {
            issues.push(ValidationIssue::new("intrebare", "must not be empty"));
        }
        if self.options.len() < MIN_OPTIONS || self.options.len() > MAX_OPTIONS {
            issues.push(ValidationIssue::new(
                "options",
                format!("must contain between {MIN_OPTIONS} and {MAX_OPTIONS} options"),
            ));
        }

        let mut option_ids = HashSet::new();
        for (i, opt) in self.options.iter().enumerate() {
            if !OPTION_KEYS.contains(&opt.id.as_str()) {
                issues.push(ValidationIssue::new(
                    format!("options[{i}].id"),
                    "must be a letter between a and h",
                ));
            }
            if !option_ids.insert(opt.id.as_str()) {
                issues.push(ValidationIssue::new(format!("options[{i}].id"), "must be unique"));
            }
            if opt.text.trim().is_empty() {
                issues.push(ValidationIssue::new(format!("options[{i}].text"), "must not be empty"));
            }
        }

        if self.correct_answers.is_empty() {
            issues.push(ValidationIssue::new("correctAnswers", "must not be empty"));
        }
        let mut seen = HashSet::new();
        for (k, id) in self.correct_answers.iter().enumerate() {
            if !seen.insert(id.as_str()) {
                issues.push(ValidationIssue::new(format!("correctAnswers[{k}]"), "must be unique"));
            }
            if !option_ids.contains(id.as_str()) {
                issues.push(ValidationIssue::new(
                    format!("correctAnswers[{k}]"),
                    "must reference existing option id",
                ));
            }
        }
        if !self.allow_multiple && self.correct_answers.len() > 1 {
            issues.push(ValidationIssue::new(
                "allowMultiple",
                "must be enabled when more than one answer is correct",
            ));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

impl Serialize for Question {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if !self.id.is_empty() {
            map.serialize_entry("id", &self.id)?;
        }
        map.serialize_entry("intrebare", &self.intrebare)?;
        map.serialize_entry("options", &self.options)?;
        map.serialize_entry("correctAnswers", &self.correct_answers)?;
        map.serialize_entry("allowMultiple", &self.allow_multiple)?;
        map.serialize_entry("raspuns_corect", &self.legacy_answer_key())?;
        for opt in &self.options {
            map.serialize_entry(&format!("varianta_{}", opt.id), &opt.text)?;
        }
        if let Some(created_at) = &self.created_at {
            map.serialize_entry("createdAt", created_at)?;
        }
        if let Some(created_by) = &self.created_by {
            map.serialize_entry("createdBy", created_by)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Set,
    Bundle,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    pub user_id: String,
    pub source_kind: SourceKind,
    pub source_id: String,
    pub source_name: String,
    pub correct_answers: u32,
    pub total_questions: u32,
    pub passed: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub issue: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            issue: issue.into(),
        }
    }
}

// Exact set comparison, case-insensitive. No partial credit.
pub fn score_answer(question: &Question, submitted: &BTreeSet<String>) -> bool {
    !submitted.is_empty() && question.correct_set() == *submitted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opt(id: &str, text: &str) -> QuizOption {
        QuizOption { id: id.into(), text: text.into() }
    }

    fn sample_question() -> Question {
        Question {
            id: "q1".into(),
            intrebare: "Which numbers are even?".into(),
            options: vec![opt("a", "2"), opt("b", "4"), opt("c", "5")],
            correct_answers: vec!["a".into(), "b".into()],
            allow_multiple: true,
            created_at: None,
            created_by: None,
        }
    }

    fn answer(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn validate_question_ok() {
        assert!(sample_question().validate().is_ok());
    }

    #[test]
    fn validate_question_negative() {
        let mut q = sample_question();
        q.allow_multiple = false;
        q.options[1].id = "a".into();
        q.correct_answers.push("z".into());
        let issues = q.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.issue.contains("unique")));
        assert!(issues.iter().any(|i| i.field == "allowMultiple"));
        assert!(issues.iter().any(|i| i.issue.contains("existing option")));
    }

    #[test]
    fn validate_rejects_single_option() {
        let mut q = sample_question();
        q.options.truncate(1);
        q.correct_answers = vec!["a".into()];
        assert!(q.validate().unwrap_err().iter().any(|i| i.field == "options"));
    }

    #[test]
    fn scoring_requires_exact_set() {
        let q = sample_question();
        assert!(!score_answer(&q, &answer(&["a"])));
        assert!(score_answer(&q, &answer(&["b", "a"])));
        assert!(!score_answer(&q, &answer(&["a", "b", "c"])));
        assert!(!score_answer(&q, &answer(&[])));
    }

    #[test]
    fn serialization_mirrors_legacy_fields() {
        let value = serde_json::to_value(sample_question()).unwrap();
        assert_eq!(value["raspuns_corect"], "a,b");
        assert_eq!(value["varianta_a"], "2");
        assert_eq!(value["varianta_c"], "5");
        assert_eq!(value["correctAnswers"], serde_json::json!(["a", "b"]));
        assert!(value.get("varianta_d").is_none());
    }

    #[test]
    fn access_levels_rank_owned_highest() {
        assert!(AccessLevel::Owned > AccessLevel::Shared);
        assert!(AccessLevel::Shared > AccessLevel::Public);
    }

    #[test]
    fn sharing_key_is_case_folded() {
        let user = CurrentUser::new("u1", Some("  Ana@Example.COM "));
        assert_eq!(user.sharing_key().as_deref(), Some("ana@example.com"));
        assert_eq!(CurrentUser::new("u2", None).sharing_key(), None);
    }
}
