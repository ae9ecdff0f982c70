//! Data models shared by the repositories, the store adapters and the API
//!
//! IDs are plain strings: rows created by the remote store carry UUIDs,
//! rows created on this device carry `local_` / `local_tag_` prefixed ids.

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix of task ids generated on this device
pub const LOCAL_TASK_PREFIX: &str = "local";
/// Prefix of tag ids generated on this device
pub const LOCAL_TAG_PREFIX: &str = "local_tag";
/// Prefix of temporary identities
pub const TEMP_USER_PREFIX: &str = "temp";

/// Maximum task content length accepted at input
pub const MAX_CONTENT_CHARS: usize = 100;
/// Maximum tag name length accepted at input
pub const MAX_TAG_NAME_CHARS: usize = 20;

/// Colors a new tag is drawn from
pub const TAG_PALETTE: [&str; 8] = [
    "#3182F6", "#DC2626", "#059669", "#D97706", "#7C3AED", "#DB2777", "#0891B2", "#65A30D",
];

/// Priority level for tasks
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// The identity every repository operation is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    Authenticated { user_id: String, email: String },
    Anonymous { user_id: String },
    Temporary { local_id: String },
}

impl Identity {
    /// Owner id used for row scoping and local-storage namespacing
    pub fn id(&self) -> &str {
        match self {
            Identity::Authenticated { user_id, .. } | Identity::Anonymous { user_id } => user_id,
            Identity::Temporary { local_id } => local_id,
        }
    }

    /// Whether this identity is backed by the remote store
    pub fn is_remote(&self) -> bool {
        !matches!(self, Identity::Temporary { .. })
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Identity::Authenticated { email, .. } => Some(email),
            _ => None,
        }
    }
}

/// A task/todo item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub content: String,
    pub owner_id: String,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tag_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Build a task that lives only in local storage
    pub fn new_local(
        owner_id: &str,
        content: String,
        tag_id: Option<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: generate_local_id(LOCAL_TASK_PREFIX),
            content,
            owner_id: owner_id.to_string(),
            is_complete: false,
            completed_at: None,
            priority,
            tag_id,
            created_at: Utc::now(),
        }
    }

    /// Rows created on this device are never known to the remote store
    pub fn is_local_only(&self) -> bool {
        is_local_task_id(&self.id)
    }
}

pub fn is_local_task_id(id: &str) -> bool {
    id.starts_with("local_") && !id.starts_with("local_tag_")
}

pub fn is_local_tag_id(id: &str) -> bool {
    id.starts_with("local_tag_")
}

/// Fields for a remote task insert; the store assigns id and created_at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub owner_id: String,
    pub content: String,
    pub tag_id: Option<String>,
    pub priority: Priority,
}

/// A targeted field update, applied identically by every adapter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub content: Option<String>,
    pub priority: Option<Priority>,
    /// `Some(Some(ts))` completes at `ts`, `Some(None)` reopens
    pub completion: Option<Option<DateTime<Utc>>>,
    /// `Some(None)` detaches the tag
    pub tag_id: Option<Option<String>>,
}

impl TaskPatch {
    /// Flip the completion state of `task` as of `now`
    pub fn toggle(task: &Task, now: DateTime<Utc>) -> Self {
        let completion = if task.is_complete { None } else { Some(now) };
        Self {
            completion: Some(completion),
            ..Self::default()
        }
    }

    pub fn content(content: String) -> Self {
        Self {
            content: Some(content),
            ..Self::default()
        }
    }

    pub fn priority(priority: Priority) -> Self {
        Self {
            priority: Some(priority),
            ..Self::default()
        }
    }

    pub fn apply(&self, task: &mut Task) {
        if let Some(content) = &self.content {
            task.content = content.clone();
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(completion) = self.completion {
            // is_complete and completed_at always move together
            task.is_complete = completion.is_some();
            task.completed_at = completion;
        }
        if let Some(tag_id) = &self.tag_id {
            task.tag_id = tag_id.clone();
        }
    }
}

/// A tag that can be attached to tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

impl Tag {
    pub fn new_local(owner_id: &str, name: String) -> Self {
        Self {
            id: generate_local_id(LOCAL_TAG_PREFIX),
            name,
            owner_id: owner_id.to_string(),
            color: random_tag_color().to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Fields for a remote tag insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTag {
    pub owner_id: String,
    pub name: String,
    pub color: String,
}

/// Secondary record, one per task, stored remotely only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDetail {
    pub task_id: String,
    pub description: String,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub estimated_time: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub requires_review: bool,
    #[serde(default)]
    pub is_recurring: bool,
    pub updated_at: DateTime<Utc>,
}

/// Detail form as submitted by the presentation layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDetailInput {
    pub description: String,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub estimated_time: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub requires_review: bool,
    #[serde(default)]
    pub is_recurring: bool,
}

/// A row change pushed by the remote store's task feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ChangeEvent {
    Insert { row: Task },
    Update { row: Task },
    Delete { id: String, owner_id: String },
}

impl ChangeEvent {
    pub fn owner_id(&self) -> &str {
        match self {
            ChangeEvent::Insert { row } | ChangeEvent::Update { row } => &row.owner_id,
            ChangeEvent::Delete { owner_id, .. } => owner_id,
        }
    }
}

/// Generate `<prefix>_<unix millis>_<9 base36 chars>`
pub fn generate_local_id(prefix: &str) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let mut rng = rand::rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();

    format!("{}_{}_{}", prefix, Utc::now().timestamp_millis(), suffix)
}

pub fn random_tag_color() -> &'static str {
    let mut rng = rand::rng();
    TAG_PALETTE[rng.random_range(0..TAG_PALETTE.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new_local("temp_1", "buy milk".to_string(), None, Priority::Low)
    }

    #[test]
    fn toggle_patch_keeps_completion_fields_together() {
        let mut t = task();
        let now = Utc::now();

        TaskPatch::toggle(&t, now).apply(&mut t);
        assert!(t.is_complete);
        assert_eq!(t.completed_at, Some(now));

        TaskPatch::toggle(&t, now).apply(&mut t);
        assert!(!t.is_complete);
        assert_eq!(t.completed_at, None);
    }

    #[test]
    fn local_ids_are_distinguished_by_prefix() {
        let task_id = generate_local_id(LOCAL_TASK_PREFIX);
        let tag_id = generate_local_id(LOCAL_TAG_PREFIX);

        assert!(is_local_task_id(&task_id));
        assert!(!is_local_task_id(&tag_id));
        assert!(is_local_tag_id(&tag_id));
        assert!(!is_local_task_id("0b6f3c1e-9d7a-4c1e-8f5e-2a1b3c4d5e6f"));

        let suffix = task_id.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 9);
    }

    #[test]
    fn tag_colors_come_from_palette() {
        for _ in 0..32 {
            assert!(TAG_PALETTE.contains(&random_tag_color()));
        }
    }

    #[test]
    fn task_json_defaults_missing_fields() {
        let json = r#"{
            "id": "local_1_abc",
            "content": "water plants",
            "owner_id": "temp_1",
            "created_at": "2026-01-05T09:00:00Z"
        }"#;
        let t: Task = serde_json::from_str(json).unwrap();
        assert_eq!(t.priority, Priority::Low);
        assert!(!t.is_complete);
        assert!(t.tag_id.is_none());
    }

    #[test]
    fn identity_routing_flags() {
        let temp = Identity::Temporary {
            local_id: "temp_1".into(),
        };
        let anon = Identity::Anonymous {
            user_id: "u1".into(),
        };
        assert!(!temp.is_remote());
        assert!(anon.is_remote());
        assert_eq!(temp.id(), "temp_1");
        assert_eq!(anon.email(), None);
    }
}
