//! Task repository: routes every operation to the remote or the local
//! adapter for the active identity and keeps the in-memory list current.
//!
//! Rows created by the add fallback (`local_` ids) stay on the local
//! adapter even when the identity is remote-backed; the remote store has
//! never seen them.

use chrono::Utc;
use std::sync::Arc;

use crate::collection::OwnedCollection;
use crate::error::{RepoError, RepoResult, ValidationError};
use crate::local::{self, LocalStore};
use crate::models::{
    ChangeEvent, Identity, MAX_CONTENT_CHARS, NewTask, Priority, Task, TaskPatch, is_local_task_id,
};
use crate::notice::Notices;
use crate::remote::RemoteStore;

enum Route<'a> {
    Remote(&'a dyn RemoteStore),
    Local,
}

pub struct TaskRepository {
    remote: Option<Arc<dyn RemoteStore>>,
    local: Arc<dyn LocalStore>,
    notices: Arc<Notices>,
    tasks: OwnedCollection<Task, ChangeEvent>,
}

impl TaskRepository {
    pub fn new(
        remote: Option<Arc<dyn RemoteStore>>,
        local: Arc<dyn LocalStore>,
        notices: Arc<Notices>,
    ) -> Self {
        Self {
            remote,
            local,
            notices,
            tasks: OwnedCollection::new(local::tasks_key),
        }
    }

    fn route(&self, identity: &Identity, task_id: Option<&str>) -> Route<'_> {
        match &self.remote {
            Some(remote) if identity.is_remote() && !task_id.is_some_and(is_local_task_id) => {
                Route::Remote(remote.as_ref())
            }
            _ => Route::Local,
        }
    }

    /// Bind the in-memory list to a new identity, empty until `list`
    pub fn reset(&self, identity: &Identity) {
        self.tasks.reset(identity.id());
    }

    pub fn clear(&self) {
        self.tasks.clear();
    }

    /// Current in-memory tasks, newest first
    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.snapshot()
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.find(|t| t.id == task_id)
    }

    /// Load the identity's tasks, newest first
    pub async fn list(&self, identity: &Identity) -> RepoResult<Vec<Task>> {
        let owner = identity.id();

        if let Route::Remote(remote) = self.route(identity, None) {
            // Feed events that land while the read is in flight are replayed on top
            let load = self.tasks.begin_load();
            match remote.list_tasks(owner).await {
                Ok(rows) => {
                    let pending = match local::load_tasks(self.local.as_ref(), owner) {
                        Ok(cached) => cached.into_iter().filter(Task::is_local_only).collect(),
                        Err(e) => {
                            tracing::warn!(owner, error = %e, "Ignoring unreadable local copy");
                            Vec::new()
                        }
                    };
                    let merged = merge_pending(rows, pending);
                    let tasks = load
                        .finish(self.local.as_ref(), owner, merged, |tasks, event| {
                            *tasks = reconcile(tasks, event)
                        })
                        .ok_or(RepoError::IdentityChanged)?;
                    tracing::info!(owner, count = tasks.len(), "Loaded tasks from remote store");
                    return Ok(tasks);
                }
                Err(e) => {
                    tracing::warn!(owner, error = %e, "Remote task load failed, using local copy");
                    self.notices
                        .error("Could not load tasks; showing the copy saved on this device.");
                }
            }
        }

        let cached = match local::load_tasks(self.local.as_ref(), owner) {
            Ok(cached) => cached,
            Err(e) => {
                tracing::error!(owner, error = %e, "Local task load failed");
                self.notices.error("Could not load tasks.");
                return Err(e.into());
            }
        };
        self.tasks.replace(owner, cached.clone());
        tracing::info!(owner, count = cached.len(), "Loaded tasks from local storage");
        Ok(cached)
    }

    /// Create a task at the head of the list
    pub async fn add(
        &self,
        identity: &Identity,
        content: &str,
        tag_id: Option<String>,
        priority: Option<Priority>,
    ) -> RepoResult<Task> {
        let content = validate_content(content)?;
        let priority = priority.unwrap_or_default();
        let owner = identity.id();

        if let Route::Remote(remote) = self.route(identity, None) {
            let new = NewTask {
                owner_id: owner.to_string(),
                content: content.clone(),
                tag_id: tag_id.clone(),
                priority,
            };
            match remote.insert_task(new).await {
                Ok(task) => {
                    self.apply_event(owner, &ChangeEvent::Insert { row: task.clone() });
                    tracing::info!(owner, task_id = %task.id, "Task added");
                    return Ok(task);
                }
                Err(e) => {
                    // Never lose the user's input: keep it on this device instead
                    tracing::error!(owner, error = %e, "Remote task insert failed, saving locally");
                    self.notices
                        .error("Could not add the task online; it was saved on this device.");
                }
            }
        }

        let task = Task::new_local(owner, content, tag_id, priority);
        self.tasks
            .write_through(self.local.as_ref(), owner, |tasks| {
                prepend_unique(tasks, task.clone());
                Ok(())
            })
            .inspect_err(|e| self.local_failure("add the task", e))?;
        tracing::info!(owner, task_id = %task.id, "Task added locally");
        Ok(task)
    }

    /// Flip completion; `completed_at` is set iff the task becomes complete
    pub async fn toggle_complete(&self, identity: &Identity, task_id: &str) -> RepoResult<Task> {
        let current = self
            .get(task_id)
            .ok_or_else(|| RepoError::TaskNotFound(task_id.to_string()))?;
        let patch = TaskPatch::toggle(&current, Utc::now());
        self.patch(identity, task_id, patch, "update the task status")
            .await
    }

    pub async fn update_priority(
        &self,
        identity: &Identity,
        task_id: &str,
        priority: Priority,
    ) -> RepoResult<Task> {
        self.patch(
            identity,
            task_id,
            TaskPatch::priority(priority),
            "change the priority",
        )
        .await
    }

    pub async fn update_content(
        &self,
        identity: &Identity,
        task_id: &str,
        content: &str,
    ) -> RepoResult<Task> {
        let content = validate_content(content)?;
        self.patch(
            identity,
            task_id,
            TaskPatch::content(content),
            "edit the task",
        )
        .await
    }

    /// Delete from the backing store, then from memory
    pub async fn remove(&self, identity: &Identity, task_id: &str) -> RepoResult<()> {
        let owner = identity.id();

        match self.route(identity, Some(task_id)) {
            Route::Remote(remote) => {
                if let Err(e) = remote.delete_task(owner, task_id).await {
                    tracing::error!(owner, task_id, error = %e, "Remote task delete failed");
                    self.notices.error("Could not delete the task.");
                    return Err(e.into());
                }
                self.apply_event(
                    owner,
                    &ChangeEvent::Delete {
                        id: task_id.to_string(),
                        owner_id: owner.to_string(),
                    },
                );
            }
            Route::Local => {
                self.tasks
                    .write_through(self.local.as_ref(), owner, |tasks| {
                        let before = tasks.len();
                        tasks.retain(|t| t.id != task_id);
                        if tasks.len() == before {
                            return Err(RepoError::TaskNotFound(task_id.to_string()));
                        }
                        Ok(())
                    })
                    .inspect_err(|e| self.local_failure("delete the task", e))?;
            }
        }

        tracing::info!(owner, task_id, "Task deleted");
        Ok(())
    }

    /// Drop a deleted tag from every task that referenced it
    pub fn detach_tag(&self, identity: &Identity, tag_id: &str) -> RepoResult<usize> {
        let detach = |tasks: &mut Vec<Task>| {
            let mut count = 0;
            for task in tasks.iter_mut().filter(|t| t.tag_id.as_deref() == Some(tag_id)) {
                task.tag_id = None;
                count += 1;
            }
            count
        };

        match self.route(identity, None) {
            // The remote store cascades on its own; mirror it in memory
            Route::Remote(_) => Ok(self
                .tasks
                .commit(self.local.as_ref(), identity.id(), detach)
                .unwrap_or(0)),
            Route::Local => self
                .tasks
                .write_through(self.local.as_ref(), identity.id(), |tasks| Ok(detach(tasks))),
        }
    }

    /// Apply a pushed or confirmed change for `owner`; returns whether it
    /// was applied
    pub fn apply_event(&self, owner: &str, event: &ChangeEvent) -> bool {
        self.tasks
            .commit_change(self.local.as_ref(), owner, event.clone(), |tasks, event| {
                *tasks = reconcile(tasks, event)
            })
    }

    async fn patch(
        &self,
        identity: &Identity,
        task_id: &str,
        patch: TaskPatch,
        action: &str,
    ) -> RepoResult<Task> {
        let owner = identity.id();

        match self.route(identity, Some(task_id)) {
            Route::Remote(remote) => match remote.update_task(owner, task_id, &patch).await {
                Ok(row) => {
                    self.apply_event(owner, &ChangeEvent::Update { row: row.clone() });
                    tracing::info!(owner, task_id, "Task updated");
                    Ok(row)
                }
                Err(e) => {
                    // In-memory state stays as it was; the store did not accept the change
                    tracing::error!(owner, task_id, error = %e, "Remote task update failed");
                    self.notices.error(format!("Could not {action}."));
                    Err(e.into())
                }
            },
            Route::Local => {
                let row = self
                    .tasks
                    .write_through(self.local.as_ref(), owner, |tasks| {
                        let task = tasks
                            .iter_mut()
                            .find(|t| t.id == task_id)
                            .ok_or_else(|| RepoError::TaskNotFound(task_id.to_string()))?;
                        patch.apply(task);
                        Ok(task.clone())
                    })
                    .inspect_err(|e| self.local_failure(action, e))?;
                tracing::info!(owner, task_id, "Task updated locally");
                Ok(row)
            }
        }
    }

    fn local_failure(&self, action: &str, error: &RepoError) {
        if matches!(error, RepoError::Local(_)) {
            tracing::error!(error = %error, "Local task write failed");
            self.notices.error(format!("Could not {action}."));
        }
    }
}

/// Fold one pushed change into `current`
///
/// Inserts prepend unless the id is already present (the change may race
/// the insert's own response), updates replace by id, deletes remove by id.
pub fn reconcile(current: &[Task], event: &ChangeEvent) -> Vec<Task> {
    match event {
        ChangeEvent::Insert { row } => {
            if current.iter().any(|t| t.id == row.id) {
                current.to_vec()
            } else {
                std::iter::once(row.clone())
                    .chain(current.iter().cloned())
                    .collect()
            }
        }
        ChangeEvent::Update { row } => current
            .iter()
            .map(|t| if t.id == row.id { row.clone() } else { t.clone() })
            .collect(),
        ChangeEvent::Delete { id, .. } => current.iter().filter(|t| &t.id != id).cloned().collect(),
    }
}

fn validate_content(content: &str) -> Result<String, ValidationError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ValidationError::ContentTooLong {
            max: MAX_CONTENT_CHARS,
        });
    }
    Ok(content.to_string())
}

fn prepend_unique(tasks: &mut Vec<Task>, task: Task) {
    if !tasks.iter().any(|t| t.id == task.id) {
        tasks.insert(0, task);
    }
}

/// Remote rows plus rows only this device knows about, newest first
fn merge_pending(rows: Vec<Task>, pending: Vec<Task>) -> Vec<Task> {
    let mut merged = rows;
    for task in pending {
        if !merged.iter().any(|t| t.id == task.id) {
            merged.push(task);
        }
    }
    merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn task(id: &str, minutes_ago: i64) -> Task {
        Task {
            id: id.to_string(),
            content: id.to_string(),
            owner_id: "u1".to_string(),
            is_complete: false,
            completed_at: None,
            priority: Priority::Low,
            tag_id: None,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn insert_prepends_new_rows() {
        let current = vec![task("b", 5), task("a", 10)];
        let next = reconcile(
            &current,
            &ChangeEvent::Insert {
                row: task("c", 0),
            },
        );
        assert_eq!(ids(&next), vec!["c", "b", "a"]);
    }

    #[test]
    fn duplicate_insert_is_idempotent() {
        let current = vec![task("b", 5), task("a", 10)];
        let event = ChangeEvent::Insert {
            row: task("a", 10),
        };

        let once = reconcile(&current, &event);
        let twice = reconcile(&once, &event);
        assert_eq!(ids(&twice), vec!["b", "a"]);
    }

    #[test]
    fn update_replaces_in_place_and_ignores_unknown_ids() {
        let current = vec![task("b", 5), task("a", 10)];
        let mut changed = task("a", 10);
        changed.content = "renamed".into();

        let next = reconcile(&current, &ChangeEvent::Update { row: changed });
        assert_eq!(ids(&next), vec!["b", "a"]);
        assert_eq!(next[1].content, "renamed");

        let next = reconcile(
            &current,
            &ChangeEvent::Update {
                row: task("zzz", 0),
            },
        );
        assert_eq!(next, current);
    }

    #[test]
    fn delete_removes_by_id() {
        let current = vec![task("b", 5), task("a", 10)];
        let next = reconcile(
            &current,
            &ChangeEvent::Delete {
                id: "b".into(),
                owner_id: "u1".into(),
            },
        );
        assert_eq!(ids(&next), vec!["a"]);
    }

    #[test]
    fn pending_rows_merge_by_creation_time() {
        let rows = vec![task("r2", 1), task("r1", 20)];
        let pending = vec![task("local_1_abc", 10), task("r1", 20)];

        let merged = merge_pending(rows, pending);
        assert_eq!(ids(&merged), vec!["r2", "local_1_abc", "r1"]);
    }

    #[test]
    fn content_is_trimmed_and_bounded() {
        assert_eq!(validate_content("  buy milk ").unwrap(), "buy milk");
        assert_eq!(validate_content("   "), Err(ValidationError::EmptyContent));
        assert!(matches!(
            validate_content(&"x".repeat(MAX_CONTENT_CHARS + 1)),
            Err(ValidationError::ContentTooLong { .. })
        ));
    }
}
