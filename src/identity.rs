//! Startup identity resolution
//!
//! Degrade-on-failure chain, first success wins:
//! 1. the remote store's persisted session
//! 2. a fresh anonymous remote account
//! 3. a temporary identity kept in local storage
//!
//! Failures of steps 1 and 2 are logged and fall through; the caller
//! always receives a usable identity.

use crate::local::{LocalStore, TEMP_USER_KEY};
use crate::models::{Identity, TEMP_USER_PREFIX, generate_local_id};
use crate::remote::RemoteStore;

pub async fn resolve(remote: Option<&dyn RemoteStore>, local: &dyn LocalStore) -> Identity {
    if let Some(remote) = remote {
        match remote.current_user().await {
            Ok(Some(user)) => {
                tracing::info!(user_id = %user.id, "Resumed remote session");
                return user.into();
            }
            Ok(None) => tracing::debug!("No remote session"),
            Err(e) => tracing::warn!(error = %e, "Remote session lookup failed"),
        }

        match remote.sign_in_anonymously().await {
            Ok(user) => {
                tracing::info!(user_id = %user.id, "Signed in anonymously");
                return user.into();
            }
            Err(e) => tracing::warn!(error = %e, "Anonymous sign-in failed, using a temporary identity"),
        }
    }

    temporary_identity(local)
}

/// Reuse the device's temporary identity, creating it on first use
pub fn temporary_identity(local: &dyn LocalStore) -> Identity {
    match local.get(TEMP_USER_KEY) {
        Ok(Some(id)) if !id.trim().is_empty() => {
            return Identity::Temporary { local_id: id };
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to read temporary identity"),
    }

    let local_id = generate_local_id(TEMP_USER_PREFIX);
    if let Err(e) = local.set(TEMP_USER_KEY, &local_id) {
        tracing::warn!(error = %e, "Failed to persist temporary identity");
    }
    tracing::info!(local_id = %local_id, "Created temporary identity");

    Identity::Temporary { local_id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::MemoryLocalStore;
    use crate::remote::sqlite::SqliteBackend;

    #[tokio::test]
    async fn no_remote_yields_stable_temporary_identity() {
        let local = MemoryLocalStore::new();

        let first = resolve(None, &local).await;
        let second = resolve(None, &local).await;

        assert!(matches!(first, Identity::Temporary { .. }));
        assert!(first.id().starts_with("temp_"));
        assert_eq!(first, second);
        assert_eq!(local.get(TEMP_USER_KEY).unwrap().as_deref(), Some(first.id()));
    }

    #[tokio::test]
    async fn persisted_session_wins() {
        let remote = SqliteBackend::open_in_memory(true).unwrap();
        remote.sign_up("ada@example.com", "secret1").await.unwrap();
        remote
            .sign_in_with_password("ada@example.com", "secret1")
            .await
            .unwrap();

        let identity = resolve(Some(&remote), &MemoryLocalStore::new()).await;
        assert_eq!(identity.email(), Some("ada@example.com"));
    }

    #[tokio::test]
    async fn falls_back_to_anonymous_then_temporary() {
        let local = MemoryLocalStore::new();

        let open = SqliteBackend::open_in_memory(true).unwrap();
        let identity = resolve(Some(&open), &local).await;
        assert!(matches!(identity, Identity::Anonymous { .. }));

        let closed = SqliteBackend::open_in_memory(false).unwrap();
        let identity = resolve(Some(&closed), &local).await;
        assert!(matches!(identity, Identity::Temporary { .. }));
    }
}
