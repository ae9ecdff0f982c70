#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskpad::error::RemoteError;
use taskpad::local::{LocalStore, MemoryLocalStore};
use taskpad::models::{NewTag, NewTask, Priority, Tag, Task, TaskDetail, TaskPatch};
use taskpad::remote::sqlite::SqliteBackend;
use taskpad::remote::{RemoteStore, RemoteUser, Subscription};
use taskpad::session::Session;

/// A real backend behind a switch that makes every call fail as if the
/// network were down
pub struct Flaky {
    inner: SqliteBackend,
    offline: AtomicBool,
    /// Content another device inserts while the next task list is in flight
    racing_insert: Mutex<Option<String>>,
}

impl Flaky {
    pub fn new(allow_anonymous: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteBackend::open_in_memory(allow_anonymous).unwrap(),
            offline: AtomicBool::new(false),
            racing_insert: Mutex::new(None),
        })
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make the next `list_tasks` read its rows, then let another device
    /// insert `content` before the reply arrives, so the reply is stale
    pub fn race_next_list(&self, content: &str) {
        *self.racing_insert.lock().unwrap() = Some(content.to_string());
    }

    /// The backend itself, bypassing the switch; stands in for another device
    pub fn backend(&self) -> &SqliteBackend {
        &self.inner
    }

    fn check(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::Unavailable("network unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for Flaky {
    async fn current_user(&self) -> Result<Option<RemoteUser>, RemoteError> {
        self.check()?;
        self.inner.current_user().await
    }

    async fn sign_in_anonymously(&self) -> Result<RemoteUser, RemoteError> {
        self.check()?;
        self.inner.sign_in_anonymously().await
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<RemoteUser, RemoteError> {
        self.check()?;
        self.inner.sign_in_with_password(email, password).await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<RemoteUser, RemoteError> {
        self.check()?;
        self.inner.sign_up(email, password).await
    }

    async fn sign_out(&self) -> Result<(), RemoteError> {
        self.check()?;
        self.inner.sign_out().await
    }

    async fn list_tasks(&self, owner_id: &str) -> Result<Vec<Task>, RemoteError> {
        self.check()?;
        let rows = self.inner.list_tasks(owner_id).await?;

        let racing = self.racing_insert.lock().unwrap().take();
        if let Some(content) = racing {
            self.inner
                .insert_task(NewTask {
                    owner_id: owner_id.to_string(),
                    content,
                    tag_id: None,
                    priority: Priority::Low,
                })
                .await?;
            // Give the change-feed listener time to apply the insert first
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(rows)
    }

    async fn insert_task(&self, task: NewTask) -> Result<Task, RemoteError> {
        self.check()?;
        self.inner.insert_task(task).await
    }

    async fn update_task(
        &self,
        owner_id: &str,
        task_id: &str,
        patch: &TaskPatch,
    ) -> Result<Task, RemoteError> {
        self.check()?;
        self.inner.update_task(owner_id, task_id, patch).await
    }

    async fn delete_task(&self, owner_id: &str, task_id: &str) -> Result<(), RemoteError> {
        self.check()?;
        self.inner.delete_task(owner_id, task_id).await
    }

    async fn list_tags(&self, owner_id: &str) -> Result<Vec<Tag>, RemoteError> {
        self.check()?;
        self.inner.list_tags(owner_id).await
    }

    async fn insert_tag(&self, tag: NewTag) -> Result<Tag, RemoteError> {
        self.check()?;
        self.inner.insert_tag(tag).await
    }

    async fn rename_tag(
        &self,
        owner_id: &str,
        tag_id: &str,
        name: &str,
    ) -> Result<Tag, RemoteError> {
        self.check()?;
        self.inner.rename_tag(owner_id, tag_id, name).await
    }

    async fn delete_tag(&self, owner_id: &str, tag_id: &str) -> Result<(), RemoteError> {
        self.check()?;
        self.inner.delete_tag(owner_id, tag_id).await
    }

    async fn get_task_detail(
        &self,
        owner_id: &str,
        task_id: &str,
    ) -> Result<Option<TaskDetail>, RemoteError> {
        self.check()?;
        self.inner.get_task_detail(owner_id, task_id).await
    }

    async fn upsert_task_detail(
        &self,
        owner_id: &str,
        detail: &TaskDetail,
    ) -> Result<TaskDetail, RemoteError> {
        self.check()?;
        self.inner.upsert_task_detail(owner_id, detail).await
    }

    async fn subscribe_tasks(&self, owner_id: &str) -> Result<Subscription, RemoteError> {
        self.check()?;
        self.inner.subscribe_tasks(owner_id).await
    }
}

pub struct Harness {
    pub remote: Arc<Flaky>,
    pub local: Arc<MemoryLocalStore>,
    pub session: Arc<Session>,
}

/// Session on a fresh anonymous remote account
pub async fn online() -> Harness {
    let remote = Flaky::new(true);
    let local = Arc::new(MemoryLocalStore::new());
    let session = Session::start(
        Some(remote.clone() as Arc<dyn RemoteStore>),
        local.clone() as Arc<dyn LocalStore>,
    )
    .await;
    Harness {
        remote,
        local,
        session,
    }
}

/// Session with no remote store at all
pub async fn device_only(local: Arc<MemoryLocalStore>) -> Arc<Session> {
    Session::start(None, local as Arc<dyn LocalStore>).await
}

/// Poll `check` until it holds or a second has passed
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Let the change-feed listener drain what is already queued
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
