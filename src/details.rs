//! Task details: one optional record per task, remote only

use chrono::Utc;
use std::sync::Arc;

use crate::error::{RepoError, RepoResult, ValidationError};
use crate::models::{Identity, TaskDetail, TaskDetailInput, is_local_task_id};
use crate::notice::Notices;
use crate::remote::RemoteStore;

pub struct DetailRepository {
    remote: Option<Arc<dyn RemoteStore>>,
    notices: Arc<Notices>,
}

impl DetailRepository {
    pub fn new(remote: Option<Arc<dyn RemoteStore>>, notices: Arc<Notices>) -> Self {
        Self { remote, notices }
    }

    fn remote_for(&self, identity: &Identity, task_id: &str) -> RepoResult<&dyn RemoteStore> {
        match self.remote.as_deref() {
            Some(remote) if identity.is_remote() && !is_local_task_id(task_id) => Ok(remote),
            _ => Err(RepoError::DetailsUnavailable),
        }
    }

    /// `Ok(None)` means the task has not been detailed yet
    pub async fn get(&self, identity: &Identity, task_id: &str) -> RepoResult<Option<TaskDetail>> {
        let remote = self.remote_for(identity, task_id)?;
        remote
            .get_task_detail(identity.id(), task_id)
            .await
            .inspect_err(|e| tracing::error!(task_id, error = %e, "Detail load failed"))
            .map_err(Into::into)
    }

    /// Upsert keyed by task id
    pub async fn save(
        &self,
        identity: &Identity,
        task_id: &str,
        input: TaskDetailInput,
    ) -> RepoResult<TaskDetail> {
        let description = input.description.trim();
        if description.is_empty() {
            return Err(ValidationError::EmptyDescription.into());
        }
        let remote = self.remote_for(identity, task_id)?;

        let detail = TaskDetail {
            task_id: task_id.to_string(),
            description: description.to_string(),
            deadline: input.deadline,
            estimated_time: non_blank(input.estimated_time),
            notes: non_blank(input.notes),
            requires_review: input.requires_review,
            is_recurring: input.is_recurring,
            updated_at: Utc::now(),
        };

        match remote.upsert_task_detail(identity.id(), &detail).await {
            Ok(saved) => {
                tracing::info!(task_id, "Task details saved");
                self.notices.success("Details saved.");
                Ok(saved)
            }
            Err(e) => {
                tracing::error!(task_id, error = %e, "Detail save failed");
                self.notices.error("Could not save the details.");
                Err(e.into())
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
