//! Remote store adapter
//!
//! [`RemoteStore`] is the narrow surface the repositories need from a hosted
//! backend: password and anonymous auth, owner-scoped row CRUD, and a task
//! change feed. [`sqlite::SqliteBackend`] implements it on a SQLite file.

pub mod sqlite;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::error::RemoteError;
use crate::models::{ChangeEvent, Identity, NewTag, NewTask, Tag, Task, TaskDetail, TaskPatch};

/// A user known to the remote store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUser {
    pub id: String,
    /// `None` for anonymous accounts
    pub email: Option<String>,
}

impl From<RemoteUser> for Identity {
    fn from(user: RemoteUser) -> Self {
        match user.email {
            Some(email) => Identity::Authenticated {
                user_id: user.id,
                email,
            },
            None => Identity::Anonymous { user_id: user.id },
        }
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// The user of the persisted session, if any
    async fn current_user(&self) -> Result<Option<RemoteUser>, RemoteError>;
    async fn sign_in_anonymously(&self) -> Result<RemoteUser, RemoteError>;
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<RemoteUser, RemoteError>;
    /// Register an account; does not open a session
    async fn sign_up(&self, email: &str, password: &str) -> Result<RemoteUser, RemoteError>;
    async fn sign_out(&self) -> Result<(), RemoteError>;

    /// Tasks owned by `owner_id`, newest first
    async fn list_tasks(&self, owner_id: &str) -> Result<Vec<Task>, RemoteError>;
    async fn insert_task(&self, task: NewTask) -> Result<Task, RemoteError>;
    async fn update_task(
        &self,
        owner_id: &str,
        task_id: &str,
        patch: &TaskPatch,
    ) -> Result<Task, RemoteError>;
    async fn delete_task(&self, owner_id: &str, task_id: &str) -> Result<(), RemoteError>;

    /// Tags owned by `owner_id`, ordered by name
    async fn list_tags(&self, owner_id: &str) -> Result<Vec<Tag>, RemoteError>;
    async fn insert_tag(&self, tag: NewTag) -> Result<Tag, RemoteError>;
    async fn rename_tag(&self, owner_id: &str, tag_id: &str, name: &str)
    -> Result<Tag, RemoteError>;
    /// Deleting a tag detaches it from every referencing task
    async fn delete_tag(&self, owner_id: &str, tag_id: &str) -> Result<(), RemoteError>;

    async fn get_task_detail(
        &self,
        owner_id: &str,
        task_id: &str,
    ) -> Result<Option<TaskDetail>, RemoteError>;
    async fn upsert_task_detail(
        &self,
        owner_id: &str,
        detail: &TaskDetail,
    ) -> Result<TaskDetail, RemoteError>;

    /// Subscribe to task row changes owned by `owner_id`
    async fn subscribe_tasks(&self, owner_id: &str) -> Result<Subscription, RemoteError>;
}

/// Task change feed filtered to one owner
pub struct Subscription {
    owner_id: String,
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn new(owner_id: &str, receiver: broadcast::Receiver<ChangeEvent>) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            receiver,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Next event for this owner, in commit order; `None` once the feed closes
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.owner_id() == self.owner_id => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(owner = %self.owner_id, skipped, "Change feed lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
