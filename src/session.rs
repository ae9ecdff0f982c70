//! The application session: one active identity, its repositories, the
//! current filter, queued notices, and the change-feed listener.
//!
//! The presentation layer holds an `Arc<Session>`, forwards intents to its
//! methods, and renders [`Session::snapshot`] after each of them.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::task::JoinHandle;

use crate::details::DetailRepository;
use crate::error::{RemoteError, RepoError, RepoResult, ValidationError};
use crate::filter::{self, FilterChange, FilterState, Stats};
use crate::identity;
use crate::local::LocalStore;
use crate::models::{Identity, Priority, Tag, Task, TaskDetail, TaskDetailInput};
use crate::notice::{Notice, Notices};
use crate::remote::{RemoteStore, Subscription};
use crate::tags::TagRepository;
use crate::tasks::TaskRepository;

/// Minimum password length accepted at sign-up
pub const MIN_PASSWORD_CHARS: usize = 6;

/// A task as rendered, with its tag resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub tag: Option<Tag>,
}

/// Everything the presentation layer needs to render
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub identity: Identity,
    pub filter: FilterState,
    pub tasks: Vec<TaskView>,
    pub tags: Vec<Tag>,
    pub stats: Stats,
}

pub struct Session {
    remote: Option<Arc<dyn RemoteStore>>,
    local: Arc<dyn LocalStore>,
    notices: Arc<Notices>,
    identity: RwLock<Identity>,
    tasks: Arc<TaskRepository>,
    tags: TagRepository,
    details: DetailRepository,
    filter: Mutex<FilterState>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Resolve the identity, subscribe to its task feed and load its data
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(
        remote: Option<Arc<dyn RemoteStore>>,
        local: Arc<dyn LocalStore>,
    ) -> Arc<Self> {
        let identity = identity::resolve(remote.as_deref(), local.as_ref()).await;
        let notices = Arc::new(Notices::new());

        let session = Arc::new(Self {
            tasks: Arc::new(TaskRepository::new(
                remote.clone(),
                local.clone(),
                notices.clone(),
            )),
            tags: TagRepository::new(remote.clone(), local.clone(), notices.clone()),
            details: DetailRepository::new(remote.clone(), notices.clone()),
            remote,
            local,
            notices,
            identity: RwLock::new(identity.clone()),
            filter: Mutex::new(FilterState::default()),
            listener: Mutex::new(None),
        });

        session.activate(identity).await;
        session
    }

    pub fn identity(&self) -> Identity {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn filter(&self) -> FilterState {
        self.lock_filter().clone()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.snapshot()
    }

    pub fn tags(&self) -> Vec<Tag> {
        self.tags.snapshot()
    }

    /// Drain queued notices
    pub fn take_notices(&self) -> Vec<Notice> {
        self.notices.take()
    }

    /// Filtered tasks, tags and counts under the current filter
    pub fn snapshot(&self) -> Snapshot {
        let tasks = self.tasks.snapshot();
        let tags = self.tags.snapshot();
        let filter = self.filter();

        let visible = filter::filtered_view(&tasks, &filter)
            .into_iter()
            .map(|task| {
                let tag = task
                    .tag_id
                    .as_ref()
                    .and_then(|id| tags.iter().find(|t| &t.id == id).cloned());
                TaskView { task, tag }
            })
            .collect();

        Snapshot {
            identity: self.identity(),
            stats: filter::stats(&tasks),
            filter,
            tasks: visible,
            tags,
        }
    }

    /// Reload tasks and tags for the active identity
    pub async fn reload(&self) {
        let identity = self.identity();
        // Failures were already surfaced as notices
        let _ = self.tasks.list(&identity).await;
        let _ = self.tags.list(&identity).await;
    }

    pub async fn add_task(
        &self,
        content: &str,
        tag_id: Option<String>,
        priority: Option<Priority>,
    ) -> RepoResult<Task> {
        let tag_id = tag_id.filter(|id| !id.is_empty());
        self.tasks
            .add(&self.identity(), content, tag_id, priority)
            .await
    }

    pub async fn toggle_task(&self, task_id: &str) -> RepoResult<Task> {
        self.tasks.toggle_complete(&self.identity(), task_id).await
    }

    pub async fn set_task_priority(&self, task_id: &str, priority: Priority) -> RepoResult<Task> {
        self.tasks
            .update_priority(&self.identity(), task_id, priority)
            .await
    }

    pub async fn set_task_content(&self, task_id: &str, content: &str) -> RepoResult<Task> {
        let task = self
            .tasks
            .update_content(&self.identity(), task_id, content)
            .await?;
        self.notices.success("Task updated.");
        Ok(task)
    }

    pub async fn remove_task(&self, task_id: &str) -> RepoResult<()> {
        self.tasks.remove(&self.identity(), task_id).await?;
        self.notices.success("Task deleted.");
        Ok(())
    }

    pub async fn task_detail(&self, task_id: &str) -> RepoResult<Option<TaskDetail>> {
        self.details.get(&self.identity(), task_id).await
    }

    pub async fn save_task_detail(
        &self,
        task_id: &str,
        input: TaskDetailInput,
    ) -> RepoResult<TaskDetail> {
        self.details.save(&self.identity(), task_id, input).await
    }

    pub async fn add_tag(&self, name: &str) -> RepoResult<Tag> {
        self.tags.add(&self.identity(), name).await
    }

    pub async fn rename_tag(&self, tag_id: &str, name: &str) -> RepoResult<Tag> {
        self.tags.rename(&self.identity(), tag_id, name).await
    }

    /// Delete a tag and detach it from every task that referenced it
    pub async fn remove_tag(&self, tag_id: &str) -> RepoResult<()> {
        let identity = self.identity();
        self.tags.remove(&identity, tag_id).await?;

        let detached = self.tasks.detach_tag(&identity, tag_id)?;
        tracing::debug!(tag_id, detached, "Detached tag from tasks");

        let mut filter = self.lock_filter();
        if filter.tag.as_deref() == Some(tag_id) {
            filter.tag = None;
        }
        Ok(())
    }

    pub fn update_filter(&self, change: FilterChange) -> FilterState {
        let mut filter = self.lock_filter();
        filter.apply(change);
        filter.clone()
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> RepoResult<Identity> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(ValidationError::MissingCredentials.into());
        }
        let remote = self.require_remote()?;

        match remote.sign_in_with_password(email, password).await {
            Ok(user) => {
                let identity: Identity = user.into();
                self.activate(identity.clone()).await;
                self.notices.success("Signed in.");
                tracing::info!(user_id = %identity.id(), "Signed in");
                Ok(identity)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Sign-in failed");
                self.notices.error(auth_failure_message(&e, "Sign-in failed."));
                Err(e.into())
            }
        }
    }

    /// Register, then sign straight in
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        confirm: &str,
    ) -> RepoResult<Identity> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() || confirm.is_empty() {
            return Err(ValidationError::MissingCredentials.into());
        }
        if password != confirm {
            return Err(ValidationError::PasswordMismatch.into());
        }
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(ValidationError::PasswordTooShort {
                min: MIN_PASSWORD_CHARS,
            }
            .into());
        }
        let remote = self.require_remote()?;

        if let Err(e) = remote.sign_up(email, password).await {
            tracing::warn!(error = %e, "Sign-up failed");
            self.notices.error(auth_failure_message(&e, "Sign-up failed."));
            return Err(e.into());
        }

        match remote.sign_in_with_password(email, password).await {
            Ok(user) => {
                let identity: Identity = user.into();
                self.activate(identity.clone()).await;
                self.notices.success("Account created and signed in.");
                Ok(identity)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Automatic sign-in after sign-up failed");
                self.notices.success("Account created. Please sign in.");
                Ok(self.identity())
            }
        }
    }

    /// End the remote session, drop in-memory data and resolve a fresh identity
    pub async fn sign_out(&self) -> RepoResult<Identity> {
        if let (Some(remote), true) = (&self.remote, self.identity().is_remote())
            && let Err(e) = remote.sign_out().await
        {
            tracing::error!(error = %e, "Sign-out failed");
            self.notices.error("Sign-out failed.");
            return Err(e.into());
        }

        self.stop_listener();
        self.tasks.clear();
        self.tags.clear();

        let identity = identity::resolve(self.remote.as_deref(), self.local.as_ref()).await;
        self.activate(identity.clone()).await;
        self.notices.success("Signed out.");
        Ok(identity)
    }

    /// Replace the active identity wholesale
    async fn activate(&self, identity: Identity) {
        self.stop_listener();

        *self
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = identity.clone();
        self.tasks.reset(&identity);
        self.tags.reset(&identity);
        // Tag ids are per identity; the other axes carry over
        self.lock_filter().tag = None;

        if let Some(remote) = self.remote.as_ref().filter(|_| identity.is_remote()) {
            match remote.subscribe_tasks(identity.id()).await {
                Ok(subscription) => {
                    let handle = tokio::spawn(listen(subscription, self.tasks.clone()));
                    *self.lock_listener() = Some(handle);
                    tracing::info!(owner = %identity.id(), "Subscribed to task changes");
                }
                Err(e) => tracing::warn!(error = %e, "Task change subscription failed"),
            }
        }

        self.reload().await;
    }

    fn require_remote(&self) -> RepoResult<&Arc<dyn RemoteStore>> {
        self.remote.as_ref().ok_or_else(|| {
            self.notices.error("Accounts are unavailable right now.");
            RepoError::Remote(RemoteError::Unavailable(
                "remote store is disabled".to_string(),
            ))
        })
    }

    fn stop_listener(&self) {
        if let Some(handle) = self.lock_listener().take() {
            handle.abort();
        }
    }

    fn lock_filter(&self) -> MutexGuard<'_, FilterState> {
        self.filter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_listener();
    }
}

/// Fold every pushed change for the subscription's owner into the repository
async fn listen(mut subscription: Subscription, tasks: Arc<TaskRepository>) {
    while let Some(event) = subscription.next().await {
        let applied = tasks.apply_event(subscription.owner_id(), &event);
        tracing::debug!(owner = %subscription.owner_id(), applied, ?event, "Task change received");
    }
    tracing::debug!(owner = %subscription.owner_id(), "Task change feed closed");
}

fn auth_failure_message(error: &RemoteError, fallback: &str) -> String {
    match error {
        RemoteError::InvalidCredentials => "Incorrect email or password.".to_string(),
        RemoteError::AlreadyRegistered => "That email is already registered.".to_string(),
        RemoteError::Unavailable(_) => "The account service is unavailable.".to_string(),
        _ => fallback.to_string(),
    }
}
