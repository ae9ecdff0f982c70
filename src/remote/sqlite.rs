//! SQLite-backed remote store
//!
//! Plays the role of the hosted backend: accounts, a persisted client
//! session, owner-scoped tables, and a broadcast change feed for tasks.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params, types::Type};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{RemoteStore, RemoteUser, Subscription};
use crate::error::RemoteError;
use crate::models::{ChangeEvent, NewTag, NewTask, Priority, Tag, Task, TaskDetail, TaskPatch};

const FEED_CAPACITY: usize = 256;

const TASK_COLUMNS: &str =
    "id, user_id, content, is_complete, completed_at, priority, tag_id, created_at";
const TAG_COLUMNS: &str = "id, user_id, name, color, created_at";

/// Thread-safe backend wrapper
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    events: broadcast::Sender<ChangeEvent>,
    allow_anonymous: bool,
}

impl SqliteBackend {
    /// Open or create the backend database
    pub fn open(path: &Path, allow_anonymous: bool) -> Result<Self, RemoteError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| RemoteError::Unavailable(format!("cannot create directory: {e}")))?;
        }

        let conn = Connection::open(path)?;
        Self::with_connection(conn, allow_anonymous)
    }

    pub fn open_in_memory(allow_anonymous: bool) -> Result<Self, RemoteError> {
        Self::with_connection(Connection::open_in_memory()?, allow_anonymous)
    }

    fn with_connection(conn: Connection, allow_anonymous: bool) -> Result<Self, RemoteError> {
        let (events, _) = broadcast::channel(FEED_CAPACITY);
        let backend = Self {
            conn: Mutex::new(conn),
            events,
            allow_anonymous,
        };
        backend.init()?;
        Ok(backend)
    }

    /// Initialize the database schema
    fn init(&self) -> Result<(), RemoteError> {
        let conn = self.conn();
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Accounts (anonymous accounts have no email)
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE,
                password_hash TEXT,
                is_anonymous INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            -- Persisted client session, at most one row
            CREATE TABLE IF NOT EXISTS auth_session (
                slot INTEGER PRIMARY KEY CHECK (slot = 1),
                user_id TEXT NOT NULL,
                signed_in_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Tags table
            CREATE TABLE IF NOT EXISTS tags (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                color TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Tasks table
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                content TEXT NOT NULL,
                is_complete INTEGER NOT NULL DEFAULT 0,
                completed_at TEXT,
                priority TEXT NOT NULL DEFAULT 'low',
                tag_id TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE SET NULL
            );

            -- One detail record per task
            CREATE TABLE IF NOT EXISTS task_details (
                task_id TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                deadline TEXT,
                estimated_time TEXT,
                notes TEXT,
                requires_review INTEGER NOT NULL DEFAULT 0,
                is_recurring INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_tasks_user_created ON tasks(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_tasks_tag ON tasks(tag_id);
            CREATE INDEX IF NOT EXISTS idx_tags_user_name ON tags(user_id, name);
            "#,
        )?;

        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: ChangeEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    fn open_session(&self, conn: &Connection, user_id: &str) -> Result<(), RemoteError> {
        conn.execute(
            "INSERT OR REPLACE INTO auth_session (slot, user_id, signed_in_at) VALUES (1, ?1, ?2)",
            params![user_id, ts(&Utc::now())],
        )?;
        Ok(())
    }

    fn fetch_task(
        &self,
        conn: &Connection,
        owner_id: &str,
        task_id: &str,
    ) -> Result<Task, RemoteError> {
        conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND user_id = ?2"),
            params![task_id, owner_id],
            task_from_row,
        )
        .optional()?
        .ok_or(RemoteError::NotFound)
    }

    fn ensure_tag_owned(
        &self,
        conn: &Connection,
        owner_id: &str,
        tag_id: &str,
    ) -> Result<(), RemoteError> {
        let owned: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM tags WHERE id = ?1 AND user_id = ?2",
                params![tag_id, owner_id],
                |row| row.get(0),
            )
            .optional()?;
        owned.map(|_| ()).ok_or(RemoteError::NotFound)
    }
}

#[async_trait]
impl RemoteStore for SqliteBackend {
    async fn current_user(&self) -> Result<Option<RemoteUser>, RemoteError> {
        let conn = self.conn();
        let user = conn
            .query_row(
                "SELECT u.id, u.email FROM auth_session s JOIN users u ON u.id = s.user_id",
                [],
                |row| {
                    Ok(RemoteUser {
                        id: row.get(0)?,
                        email: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    async fn sign_in_anonymously(&self) -> Result<RemoteUser, RemoteError> {
        if !self.allow_anonymous {
            return Err(RemoteError::AnonymousDisabled);
        }

        let conn = self.conn();
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO users (id, email, password_hash, is_anonymous, created_at)
             VALUES (?1, NULL, NULL, 1, ?2)",
            params![&id, ts(&Utc::now())],
        )?;
        self.open_session(&conn, &id)?;

        tracing::info!(user_id = %id, "Anonymous account created");
        Ok(RemoteUser { id, email: None })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<RemoteUser, RemoteError> {
        let email = normalize_email(email);
        let conn = self.conn();

        let account: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT id, password_hash FROM users WHERE email = ?1",
                params![&email],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (id, stored_hash) = account.ok_or(RemoteError::InvalidCredentials)?;
        let stored_hash = stored_hash.ok_or(RemoteError::InvalidCredentials)?;
        if !verify_password(password, &stored_hash) {
            return Err(RemoteError::InvalidCredentials);
        }

        self.open_session(&conn, &id)?;
        Ok(RemoteUser {
            id,
            email: Some(email),
        })
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<RemoteUser, RemoteError> {
        let email = normalize_email(email);
        let conn = self.conn();

        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM users WHERE email = ?1",
                params![&email],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(RemoteError::AlreadyRegistered);
        }

        let id = Uuid::new_v4().to_string();
        let password_hash = hash_password(password)?;
        conn.execute(
            "INSERT INTO users (id, email, password_hash, is_anonymous, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![&id, &email, &password_hash, ts(&Utc::now())],
        )?;

        tracing::info!(user_id = %id, "Account registered");
        Ok(RemoteUser {
            id,
            email: Some(email),
        })
    }

    async fn sign_out(&self) -> Result<(), RemoteError> {
        self.conn().execute("DELETE FROM auth_session", [])?;
        Ok(())
    }

    async fn list_tasks(&self, owner_id: &str) -> Result<Vec<Task>, RemoteError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![owner_id], task_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    async fn insert_task(&self, task: NewTask) -> Result<Task, RemoteError> {
        let conn = self.conn();
        if let Some(tag_id) = &task.tag_id {
            self.ensure_tag_owned(&conn, &task.owner_id, tag_id)?;
        }

        let row = Task {
            id: Uuid::new_v4().to_string(),
            content: task.content,
            owner_id: task.owner_id,
            is_complete: false,
            completed_at: None,
            priority: task.priority,
            tag_id: task.tag_id,
            created_at: Utc::now(),
        };
        conn.execute(
            r#"INSERT INTO tasks (id, user_id, content, is_complete, completed_at, priority, tag_id, created_at)
               VALUES (?1, ?2, ?3, 0, NULL, ?4, ?5, ?6)"#,
            params![
                &row.id,
                &row.owner_id,
                &row.content,
                row.priority.as_str(),
                &row.tag_id,
                ts(&row.created_at),
            ],
        )?;

        // Published under the connection lock so the feed order matches commit order
        self.publish(ChangeEvent::Insert { row: row.clone() });
        Ok(row)
    }

    async fn update_task(
        &self,
        owner_id: &str,
        task_id: &str,
        patch: &TaskPatch,
    ) -> Result<Task, RemoteError> {
        let conn = self.conn();
        let mut row = self.fetch_task(&conn, owner_id, task_id)?;
        if let Some(Some(tag_id)) = &patch.tag_id {
            self.ensure_tag_owned(&conn, owner_id, tag_id)?;
        }
        patch.apply(&mut row);

        conn.execute(
            r#"UPDATE tasks SET content = ?3, is_complete = ?4, completed_at = ?5,
               priority = ?6, tag_id = ?7
               WHERE id = ?1 AND user_id = ?2"#,
            params![
                &row.id,
                owner_id,
                &row.content,
                row.is_complete as i32,
                row.completed_at.as_ref().map(ts),
                row.priority.as_str(),
                &row.tag_id,
            ],
        )?;

        self.publish(ChangeEvent::Update { row: row.clone() });
        Ok(row)
    }

    async fn delete_task(&self, owner_id: &str, task_id: &str) -> Result<(), RemoteError> {
        let conn = self.conn();
        let deleted = conn.execute(
            "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
            params![task_id, owner_id],
        )?;
        if deleted == 0 {
            return Err(RemoteError::NotFound);
        }

        self.publish(ChangeEvent::Delete {
            id: task_id.to_string(),
            owner_id: owner_id.to_string(),
        });
        Ok(())
    }

    async fn list_tags(&self, owner_id: &str) -> Result<Vec<Tag>, RemoteError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TAG_COLUMNS} FROM tags WHERE user_id = ?1 ORDER BY name"
        ))?;
        let rows = stmt.query_map(params![owner_id], tag_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    async fn insert_tag(&self, tag: NewTag) -> Result<Tag, RemoteError> {
        let row = Tag {
            id: Uuid::new_v4().to_string(),
            name: tag.name,
            owner_id: tag.owner_id,
            color: tag.color,
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO tags (id, user_id, name, color, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &row.id,
                &row.owner_id,
                &row.name,
                &row.color,
                ts(&row.created_at)
            ],
        )?;
        Ok(row)
    }

    async fn rename_tag(
        &self,
        owner_id: &str,
        tag_id: &str,
        name: &str,
    ) -> Result<Tag, RemoteError> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE tags SET name = ?3 WHERE id = ?1 AND user_id = ?2",
            params![tag_id, owner_id, name],
        )?;
        if updated == 0 {
            return Err(RemoteError::NotFound);
        }

        conn.query_row(
            &format!("SELECT {TAG_COLUMNS} FROM tags WHERE id = ?1"),
            params![tag_id],
            tag_from_row,
        )
        .map_err(Into::into)
    }

    async fn delete_tag(&self, owner_id: &str, tag_id: &str) -> Result<(), RemoteError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM tasks WHERE tag_id = ?1 AND user_id = ?2")?;
        let ids: Vec<String> = stmt
            .query_map(params![tag_id, owner_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        // ON DELETE SET NULL clears tasks.tag_id
        let deleted = conn.execute(
            "DELETE FROM tags WHERE id = ?1 AND user_id = ?2",
            params![tag_id, owner_id],
        )?;
        if deleted == 0 {
            return Err(RemoteError::NotFound);
        }

        let detached = ids
            .iter()
            .map(|id| self.fetch_task(&conn, owner_id, id))
            .collect::<Result<Vec<_>, _>>()?;
        for row in detached {
            self.publish(ChangeEvent::Update { row });
        }
        Ok(())
    }

    async fn get_task_detail(
        &self,
        owner_id: &str,
        task_id: &str,
    ) -> Result<Option<TaskDetail>, RemoteError> {
        let conn = self.conn();
        self.fetch_task(&conn, owner_id, task_id)?;

        let detail = conn
            .query_row(
                "SELECT task_id, description, deadline, estimated_time, notes, requires_review,
                 is_recurring, updated_at FROM task_details WHERE task_id = ?1",
                params![task_id],
                detail_from_row,
            )
            .optional()?;
        Ok(detail)
    }

    async fn upsert_task_detail(
        &self,
        owner_id: &str,
        detail: &TaskDetail,
    ) -> Result<TaskDetail, RemoteError> {
        let conn = self.conn();
        self.fetch_task(&conn, owner_id, &detail.task_id)?;

        conn.execute(
            r#"INSERT INTO task_details (task_id, description, deadline, estimated_time, notes,
               requires_review, is_recurring, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
               ON CONFLICT(task_id) DO UPDATE SET
                   description = excluded.description,
                   deadline = excluded.deadline,
                   estimated_time = excluded.estimated_time,
                   notes = excluded.notes,
                   requires_review = excluded.requires_review,
                   is_recurring = excluded.is_recurring,
                   updated_at = excluded.updated_at"#,
            params![
                &detail.task_id,
                &detail.description,
                detail.deadline.map(|d| d.to_string()),
                &detail.estimated_time,
                &detail.notes,
                detail.requires_review as i32,
                detail.is_recurring as i32,
                ts(&detail.updated_at),
            ],
        )?;

        Ok(detail.clone())
    }

    async fn subscribe_tasks(&self, owner_id: &str) -> Result<Subscription, RemoteError> {
        Ok(Subscription::new(owner_id, self.events.subscribe()))
    }
}

/// Fixed-width UTC timestamps sort lexicographically
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let priority_str: String = row.get(5)?;
    let priority = priority_str.parse().unwrap_or(Priority::Low);
    let completed_at: Option<String> = row.get(4)?;
    let created_at: String = row.get(7)?;

    Ok(Task {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        content: row.get(2)?,
        is_complete: row.get::<_, i32>(3)? != 0,
        completed_at: completed_at.map(|raw| parse_ts(4, &raw)).transpose()?,
        priority,
        tag_id: row.get(6)?,
        created_at: parse_ts(7, &created_at)?,
    })
}

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    let created_at: String = row.get(4)?;
    Ok(Tag {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        color: row.get(3)?,
        created_at: parse_ts(4, &created_at)?,
    })
}

fn detail_from_row(row: &Row<'_>) -> rusqlite::Result<TaskDetail> {
    let deadline: Option<String> = row.get(2)?;
    let deadline = deadline
        .map(|raw| {
            raw.parse::<NaiveDate>()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))
        })
        .transpose()?;
    let updated_at: String = row.get(7)?;

    Ok(TaskDetail {
        task_id: row.get(0)?,
        description: row.get(1)?,
        deadline,
        estimated_time: row.get(3)?,
        notes: row.get(4)?,
        requires_review: row.get::<_, i32>(5)? != 0,
        is_recurring: row.get::<_, i32>(6)? != 0,
        updated_at: parse_ts(7, &updated_at)?,
    })
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn hash_password(password: &str) -> Result<String, RemoteError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| RemoteError::Hash(e.to_string()))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> SqliteBackend {
        SqliteBackend::open_in_memory(true).unwrap()
    }

    fn new_task(owner: &str, content: &str) -> NewTask {
        NewTask {
            owner_id: owner.to_string(),
            content: content.to_string(),
            tag_id: None,
            priority: Priority::Low,
        }
    }

    #[tokio::test]
    async fn password_sign_in_opens_a_session() {
        let db = backend();
        let registered = db.sign_up("Ada@Example.com ", "secret1").await.unwrap();
        assert_eq!(registered.email.as_deref(), Some("ada@example.com"));
        assert!(db.current_user().await.unwrap().is_none());

        let user = db
            .sign_in_with_password("ada@example.com", "secret1")
            .await
            .unwrap();
        assert_eq!(user.id, registered.id);
        assert_eq!(db.current_user().await.unwrap(), Some(user));

        db.sign_out().await.unwrap();
        assert!(db.current_user().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn auth_failures_are_distinguished() {
        let db = backend();
        db.sign_up("ada@example.com", "secret1").await.unwrap();

        assert!(matches!(
            db.sign_up("ada@example.com", "other12").await,
            Err(RemoteError::AlreadyRegistered)
        ));
        assert!(matches!(
            db.sign_in_with_password("ada@example.com", "wrong").await,
            Err(RemoteError::InvalidCredentials)
        ));
        assert!(matches!(
            db.sign_in_with_password("nobody@example.com", "secret1").await,
            Err(RemoteError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn anonymous_sign_in_can_be_disabled() {
        let db = SqliteBackend::open_in_memory(false).unwrap();
        assert!(matches!(
            db.sign_in_anonymously().await,
            Err(RemoteError::AnonymousDisabled)
        ));

        let db = backend();
        let anon = db.sign_in_anonymously().await.unwrap();
        assert!(anon.email.is_none());
        assert_eq!(db.current_user().await.unwrap(), Some(anon));
    }

    #[tokio::test]
    async fn tasks_are_scoped_to_owner_and_newest_first() {
        let db = backend();
        let a = db.sign_in_anonymously().await.unwrap();
        let b = db.sign_in_anonymously().await.unwrap();

        let first = db.insert_task(new_task(&a.id, "first")).await.unwrap();
        let second = db.insert_task(new_task(&a.id, "second")).await.unwrap();
        db.insert_task(new_task(&b.id, "other")).await.unwrap();

        let listed = db.list_tasks(&a.id).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);

        assert!(matches!(
            db.update_task(&b.id, &first.id, &TaskPatch::content("hijack".into()))
                .await,
            Err(RemoteError::NotFound)
        ));
        assert!(matches!(
            db.delete_task(&b.id, &first.id).await,
            Err(RemoteError::NotFound)
        ));
    }

    #[tokio::test]
    async fn update_round_trips_completion() {
        let db = backend();
        let a = db.sign_in_anonymously().await.unwrap();
        let task = db.insert_task(new_task(&a.id, "file taxes")).await.unwrap();

        let done = db
            .update_task(&a.id, &task.id, &TaskPatch::toggle(&task, Utc::now()))
            .await
            .unwrap();
        assert!(done.is_complete);

        let stored = db.list_tasks(&a.id).await.unwrap().remove(0);
        assert!(stored.is_complete);
        assert_eq!(stored.completed_at, done.completed_at);
    }

    #[tokio::test]
    async fn deleting_a_tag_detaches_tasks_and_publishes_updates() {
        let db = backend();
        let a = db.sign_in_anonymously().await.unwrap();
        let tag = db
            .insert_tag(NewTag {
                owner_id: a.id.clone(),
                name: "home".into(),
                color: "#3182F6".into(),
            })
            .await
            .unwrap();
        let mut new = new_task(&a.id, "paint fence");
        new.tag_id = Some(tag.id.clone());
        let task = db.insert_task(new).await.unwrap();

        let mut feed = db.subscribe_tasks(&a.id).await.unwrap();
        db.delete_tag(&a.id, &tag.id).await.unwrap();

        let stored = db.list_tasks(&a.id).await.unwrap().remove(0);
        assert_eq!(stored.tag_id, None);
        match feed.next().await {
            Some(ChangeEvent::Update { row }) => {
                assert_eq!(row.id, task.id);
                assert_eq!(row.tag_id, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn task_insert_rejects_foreign_tag_reference() {
        let db = backend();
        let a = db.sign_in_anonymously().await.unwrap();
        let b = db.sign_in_anonymously().await.unwrap();
        let tag = db
            .insert_tag(NewTag {
                owner_id: b.id.clone(),
                name: "work".into(),
                color: "#DC2626".into(),
            })
            .await
            .unwrap();

        let mut new = new_task(&a.id, "sneaky");
        new.tag_id = Some(tag.id);
        assert!(matches!(
            db.insert_task(new).await,
            Err(RemoteError::NotFound)
        ));
    }

    #[tokio::test]
    async fn tags_list_in_name_order() {
        let db = backend();
        let a = db.sign_in_anonymously().await.unwrap();
        for name in ["work", "errands", "home"] {
            db.insert_tag(NewTag {
                owner_id: a.id.clone(),
                name: name.into(),
                color: "#059669".into(),
            })
            .await
            .unwrap();
        }

        let names: Vec<_> = db
            .list_tags(&a.id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["errands", "home", "work"]);
    }

    #[tokio::test]
    async fn detail_upsert_replaces_existing_record() {
        let db = backend();
        let a = db.sign_in_anonymously().await.unwrap();
        let task = db.insert_task(new_task(&a.id, "plan trip")).await.unwrap();
        assert!(db.get_task_detail(&a.id, &task.id).await.unwrap().is_none());

        let mut detail = TaskDetail {
            task_id: task.id.clone(),
            description: "book flights".into(),
            deadline: NaiveDate::from_ymd_opt(2026, 11, 1),
            estimated_time: Some("2h".into()),
            notes: None,
            requires_review: false,
            is_recurring: false,
            updated_at: Utc::now(),
        };
        db.upsert_task_detail(&a.id, &detail).await.unwrap();
        detail.description = "book flights and hotel".into();
        detail.requires_review = true;
        db.upsert_task_detail(&a.id, &detail).await.unwrap();

        let stored = db.get_task_detail(&a.id, &task.id).await.unwrap().unwrap();
        assert_eq!(stored.description, "book flights and hotel");
        assert!(stored.requires_review);
        assert_eq!(stored.deadline, NaiveDate::from_ymd_opt(2026, 11, 1));
    }

    #[tokio::test]
    async fn subscription_only_sees_own_rows() {
        let db = backend();
        let a = db.sign_in_anonymously().await.unwrap();
        let b = db.sign_in_anonymously().await.unwrap();
        let mut feed = db.subscribe_tasks(&a.id).await.unwrap();

        db.insert_task(new_task(&b.id, "not mine")).await.unwrap();
        let mine = db.insert_task(new_task(&a.id, "mine")).await.unwrap();

        match feed.next().await {
            Some(ChangeEvent::Insert { row }) => assert_eq!(row.id, mine.id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_reach_the_feed_in_commit_order() {
        let db = std::sync::Arc::new(backend());
        let a = db.sign_in_anonymously().await.unwrap();
        let task = db.insert_task(new_task(&a.id, "draft")).await.unwrap();
        let mut feed = db.subscribe_tasks(&a.id).await.unwrap();

        let writers: Vec<_> = (0..16)
            .map(|n| {
                let db = db.clone();
                let owner = a.id.clone();
                let id = task.id.clone();
                tokio::spawn(async move {
                    let patch = if n % 2 == 0 {
                        TaskPatch::content(format!("edit {n}"))
                    } else {
                        TaskPatch::priority(Priority::High)
                    };
                    db.update_task(&owner, &id, &patch).await.unwrap()
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let mut folded = vec![task];
        for _ in 0..16 {
            let event = feed.next().await.unwrap();
            folded = crate::tasks::reconcile(&folded, &event);
        }

        assert_eq!(folded, db.list_tasks(&a.id).await.unwrap());
    }
}
