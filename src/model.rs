use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, TimeZone, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::{
    error::ValidationError,
    store::{Record, SqliteQuery},
};

/// Current time, truncated to microseconds so it survives a round trip through storage.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// Data model representing a user account
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        let created_at = now();
        Self {
            id: new_id(),
            username: username.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            created_at,
            updated_at: created_at,
        }
    }

    pub fn apply(&mut self, patch: &UserPatch) {
        if let Some(username) = &patch.username {
            self.username = username.clone();
        }
        if let Some(email) = &patch.email {
            self.email = email.clone();
        }
        self.updated_at = now();
    }
}

// Data model representing a todo list owned by a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TodoList {
    pub id: String,
    pub title: String,
    pub description: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TodoList {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        let created_at = now();
        Self {
            id: new_id(),
            title: title.into(),
            description: description.into(),
            user_id: user_id.into(),
            created_at,
            updated_at: created_at,
        }
    }

    pub fn apply(&mut self, patch: &ListPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        self.updated_at = now();
    }
}

// Data model representing a Todo item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Todo {
    pub id: String,
    pub title: String,
    pub description: String,
    pub list_id: String,
    pub user_id: String,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Todo {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        list_id: impl Into<String>,
        user_id: impl Into<String>,
        due_date: Option<DateTime<Utc>>,
        priority: Priority,
    ) -> Self {
        let created_at = now();
        Self {
            id: new_id(),
            title: title.into(),
            description: description.into(),
            list_id: list_id.into(),
            user_id: user_id.into(),
            due_date,
            priority,
            is_completed: false,
            completed_at: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Applies the fields present in `patch`. `list_id` is ignored here: moving a
    /// todo between lists is an ownership change handled by the coordinator.
    ///
    /// Nothing is modified when the patch carries an unparseable due date.
    pub fn apply(&mut self, patch: &TodoPatch) -> Result<(), ValidationError> {
        let due_date = match &patch.due_date {
            Some(due) => due.resolve()?,
            None => None,
        };

        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(due_date) = due_date {
            self.due_date = Some(due_date);
        }
        if let Some(completed) = patch.is_completed {
            self.set_completed(completed);
        }
        self.updated_at = now();
        Ok(())
    }

    pub fn toggle_completion(&mut self) {
        self.set_completed(!self.is_completed);
        self.updated_at = now();
    }

    fn set_completed(&mut self, completed: bool) {
        if self.is_completed == completed {
            return;
        }
        self.is_completed = completed;
        self.completed_at = completed.then(now);
    }
}

/// Todo priority. Stored as 1/2/3, rendered as its lowercase name.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[repr(i64)]
pub enum Priority {
    #[default]
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Priority {
    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            1 => Some(Self::Low),
            2 => Some(Self::Medium),
            3 => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "1" => Ok(Self::Low),
            "medium" | "2" => Ok(Self::Medium),
            "high" | "3" => Ok(Self::High),
            other => Err(ValidationError(format!(
                "Invalid priority '{other}', expected low, medium or high"
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Level(i64),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Level(level) => Self::from_level(level).ok_or_else(|| {
                de::Error::custom(format!("Invalid priority {level}, expected 1, 2 or 3"))
            }),
            Raw::Name(name) => name.parse().map_err(de::Error::custom),
        }
    }
}

/// A due date as supplied by a caller: already parsed, or raw ISO-8601 text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DueDate {
    At(DateTime<Utc>),
    Text(String),
}

impl DueDate {
    /// Blank text resolves to `None`, meaning "leave the due date alone".
    pub fn resolve(&self) -> Result<Option<DateTime<Utc>>, ValidationError> {
        match self {
            Self::At(at) => Ok(Some(*at)),
            Self::Text(text) if text.trim().is_empty() => Ok(None),
            Self::Text(text) => parse_timestamp(text).map(Some),
        }
    }
}

impl From<DateTime<Utc>> for DueDate {
    fn from(at: DateTime<Utc>) -> Self {
        Self::At(at)
    }
}

impl From<&str> for DueDate {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Parses an ISO-8601 timestamp. Offsets are honoured; naive values are read as UTC,
/// and a bare date means midnight.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| {
            ValidationError(format!(
                "Invalid date format '{raw}', use ISO 8601"
            ))
        })
}

// Partial updates. Absent fields are left untouched; unknown JSON fields are ignored.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    pub username: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListPatch {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TodoPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub list_id: Option<String>,
    pub priority: Option<Priority>,
    pub due_date: Option<DueDate>,
    pub is_completed: Option<bool>,
}

impl Record for User {
    const KIND: &'static str = "User";
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "username",
        "email",
        "password_hash",
        "created_at",
        "updated_at",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.id.as_str())
            .bind(self.username.as_str())
            .bind(self.email.as_str())
            .bind(self.password_hash.as_str())
            .bind(self.created_at)
            .bind(self.updated_at)
    }
}

impl Record for TodoList {
    const KIND: &'static str = "List";
    const TABLE: &'static str = "todo_lists";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "title",
        "description",
        "user_id",
        "created_at",
        "updated_at",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.id.as_str())
            .bind(self.title.as_str())
            .bind(self.description.as_str())
            .bind(self.user_id.as_str())
            .bind(self.created_at)
            .bind(self.updated_at)
    }
}

impl Record for Todo {
    const KIND: &'static str = "Todo";
    const TABLE: &'static str = "todos";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "title",
        "description",
        "list_id",
        "user_id",
        "due_date",
        "priority",
        "is_completed",
        "completed_at",
        "created_at",
        "updated_at",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.id.as_str())
            .bind(self.title.as_str())
            .bind(self.description.as_str())
            .bind(self.list_id.as_str())
            .bind(self.user_id.as_str())
            .bind(self.due_date)
            .bind(self.priority)
            .bind(self.is_completed)
            .bind(self.completed_at)
            .bind(self.created_at)
            .bind(self.updated_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn sample_todo() -> Todo {
        Todo::new("Milk", "", "list-1", "user-1", None, Priority::Low)
    }

    #[test]
    fn new_todo_starts_open() {
        let todo = sample_todo();
        assert!(!todo.is_completed);
        assert!(todo.completed_at.is_none());
        assert_eq!(todo.created_at, todo.updated_at);
    }

    #[test]
    fn toggle_sets_and_clears_completed_at() {
        let mut todo = sample_todo();

        todo.toggle_completion();
        assert!(todo.is_completed);
        assert!(todo.completed_at.is_some());

        todo.toggle_completion();
        assert!(!todo.is_completed);
        assert!(todo.completed_at.is_none());
    }

    #[test]
    fn patch_with_same_completion_keeps_completed_at() {
        let mut todo = sample_todo();
        todo.toggle_completion();
        let completed_at = todo.completed_at;

        let patch = TodoPatch {
            is_completed: Some(true),
            ..Default::default()
        };
        todo.apply(&patch).unwrap();

        assert_eq!(todo.completed_at, completed_at);
    }

    #[test]
    fn bad_due_date_leaves_todo_untouched() {
        let mut todo = sample_todo();
        let before = todo.clone();

        let patch = TodoPatch {
            title: Some("Bread".to_string()),
            due_date: Some(DueDate::from("next tuesday")),
            ..Default::default()
        };
        let err = todo.apply(&patch).unwrap_err();

        assert!(err.to_string().contains("ISO 8601"));
        assert_eq!(todo, before);
    }

    #[test]
    fn null_or_blank_due_date_is_ignored() {
        let mut todo = sample_todo();
        todo.due_date = Some(parse_timestamp("2024-05-01").unwrap());
        let due = todo.due_date;

        let patch: TodoPatch = serde_json::from_str(r#"{"due_date": null}"#).unwrap();
        todo.apply(&patch).unwrap();
        assert_eq!(todo.due_date, due);

        let patch: TodoPatch = serde_json::from_str(r#"{"due_date": ""}"#).unwrap();
        todo.apply(&patch).unwrap();
        assert_eq!(todo.due_date, due);
    }

    #[test]
    fn parses_iso_variants() {
        let with_offset = parse_timestamp("2024-05-01T10:30:00+02:00").unwrap();
        assert_eq!(with_offset.hour(), 8);

        let naive = parse_timestamp("2024-05-01T10:30:00").unwrap();
        assert_eq!(naive.hour(), 10);

        let fractional = parse_timestamp("2024-05-01 10:30:00.250").unwrap();
        assert_eq!(fractional.timestamp_subsec_millis(), 250);

        let date_only = parse_timestamp("2024-05-01").unwrap();
        assert_eq!((date_only.day(), date_only.hour()), (1, 0));

        assert!(parse_timestamp("01/05/2024").is_err());
    }

    #[test]
    fn due_date_accepts_parsed_and_text_forms() {
        let parsed: DueDate = serde_json::from_str(r#""2024-05-01T10:30:00Z""#).unwrap();
        assert!(matches!(parsed, DueDate::At(_)));

        let text: DueDate = serde_json::from_str(r#""2024-05-01""#).unwrap();
        assert!(matches!(text, DueDate::Text(_)));
        assert!(text.resolve().unwrap().is_some());
    }

    #[test]
    fn priority_is_ordered_and_accepts_names_or_levels() {
        assert!(Priority::Low < Priority::Medium && Priority::Medium < Priority::High);

        let by_level: Priority = serde_json::from_str("3").unwrap();
        let by_name: Priority = serde_json::from_str(r#""Medium""#).unwrap();
        assert_eq!(by_level, Priority::High);
        assert_eq!(by_name, Priority::Medium);

        assert!(serde_json::from_str::<Priority>("7").is_err());
        assert!(serde_json::from_str::<Priority>(r#""urgent""#).is_err());
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), r#""high""#);
    }

    #[test]
    fn user_patch_ignores_unknown_fields() {
        let mut user = User::new("alice", "alice@example.com", "hash");
        let patch: UserPatch =
            serde_json::from_str(r#"{"email": "a@example.com", "is_admin": true}"#).unwrap();

        user.apply(&patch);

        assert_eq!(user.username, "alice");
        assert_eq!(user.email, "a@example.com");
        assert!(user.updated_at >= user.created_at);
    }
}
