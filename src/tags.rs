//! Tag repository, the same remote/local routing as tasks without the
//! completion and change-feed parts.

use std::sync::Arc;

use crate::collection::OwnedCollection;
use crate::error::{RepoError, RepoResult, ValidationError};
use crate::local::{self, LocalStore};
use crate::models::{Identity, MAX_TAG_NAME_CHARS, NewTag, Tag, is_local_tag_id, random_tag_color};
use crate::notice::Notices;
use crate::remote::RemoteStore;

pub struct TagRepository {
    remote: Option<Arc<dyn RemoteStore>>,
    local: Arc<dyn LocalStore>,
    notices: Arc<Notices>,
    tags: OwnedCollection<Tag, TagChange>,
}

/// A confirmed remote tag change, replayed onto a reload that raced it
#[derive(Debug, Clone)]
enum TagChange {
    Upsert(Tag),
    Remove(String),
}

fn apply_change(tags: &mut Vec<Tag>, change: &TagChange) {
    match change {
        TagChange::Upsert(tag) => {
            tags.retain(|t| t.id != tag.id);
            insert_by_name(tags, tag.clone());
        }
        TagChange::Remove(tag_id) => tags.retain(|t| &t.id != tag_id),
    }
}

/// Insert among the remote rows, which are ordered by name; `local_tag_`
/// rows stay appended after them in creation order
fn insert_by_name(tags: &mut Vec<Tag>, tag: Tag) {
    let end = tags
        .iter()
        .position(|t| is_local_tag_id(&t.id))
        .unwrap_or(tags.len());
    let at = tags[..end].partition_point(|t| t.name <= tag.name);
    tags.insert(at, tag);
}

impl TagRepository {
    pub fn new(
        remote: Option<Arc<dyn RemoteStore>>,
        local: Arc<dyn LocalStore>,
        notices: Arc<Notices>,
    ) -> Self {
        Self {
            remote,
            local,
            notices,
            tags: OwnedCollection::new(local::tags_key),
        }
    }

    fn remote_for(&self, identity: &Identity, tag_id: Option<&str>) -> Option<&dyn RemoteStore> {
        self.remote
            .as_deref()
            .filter(|_| identity.is_remote() && !tag_id.is_some_and(is_local_tag_id))
    }

    pub fn reset(&self, identity: &Identity) {
        self.tags.reset(identity.id());
    }

    pub fn clear(&self) {
        self.tags.clear();
    }

    pub fn snapshot(&self) -> Vec<Tag> {
        self.tags.snapshot()
    }

    pub fn get(&self, tag_id: &str) -> Option<Tag> {
        self.tags.find(|t| t.id == tag_id)
    }

    /// Load the identity's tags; remote tags come back ordered by name
    pub async fn list(&self, identity: &Identity) -> RepoResult<Vec<Tag>> {
        let owner = identity.id();

        if let Some(remote) = self.remote_for(identity, None) {
            let load = self.tags.begin_load();
            match remote.list_tags(owner).await {
                Ok(rows) => {
                    let mut merged = rows;
                    if let Ok(cached) = local::load_tags(self.local.as_ref(), owner) {
                        for tag in cached.into_iter().filter(|t| is_local_tag_id(&t.id)) {
                            merged.push(tag);
                        }
                    }
                    let tags = load
                        .finish(self.local.as_ref(), owner, merged, apply_change)
                        .ok_or(RepoError::IdentityChanged)?;
                    tracing::info!(owner, count = tags.len(), "Loaded tags from remote store");
                    return Ok(tags);
                }
                Err(e) => {
                    tracing::warn!(owner, error = %e, "Remote tag load failed, using local copy");
                    self.notices
                        .error("Could not load tags; showing the copy saved on this device.");
                }
            }
        }

        let cached = local::load_tags(self.local.as_ref(), owner).inspect_err(|e| {
            tracing::error!(owner, error = %e, "Local tag load failed");
            self.notices.error("Could not load tags.");
        })?;
        self.tags.replace(owner, cached.clone());
        Ok(cached)
    }

    pub async fn add(&self, identity: &Identity, name: &str) -> RepoResult<Tag> {
        let name = validate_name(name)?;
        let owner = identity.id();

        if let Some(remote) = self.remote_for(identity, None) {
            let new = NewTag {
                owner_id: owner.to_string(),
                name: name.clone(),
                color: random_tag_color().to_string(),
            };
            match remote.insert_tag(new).await {
                Ok(tag) => {
                    self.tags.commit_change(
                        self.local.as_ref(),
                        owner,
                        TagChange::Upsert(tag.clone()),
                        apply_change,
                    );
                    tracing::info!(owner, tag_id = %tag.id, "Tag added");
                    return Ok(tag);
                }
                Err(e) => {
                    tracing::error!(owner, error = %e, "Remote tag insert failed, saving locally");
                    self.notices
                        .error("Could not add the tag online; it was saved on this device.");
                }
            }
        }

        let tag = Tag::new_local(owner, name);
        self.tags
            .write_through(self.local.as_ref(), owner, |tags| {
                tags.push(tag.clone());
                Ok(())
            })
            .inspect_err(|e| self.local_failure("add the tag", e))?;
        tracing::info!(owner, tag_id = %tag.id, "Tag added locally");
        Ok(tag)
    }

    pub async fn rename(&self, identity: &Identity, tag_id: &str, name: &str) -> RepoResult<Tag> {
        let name = validate_name(name)?;
        let owner = identity.id();

        if let Some(remote) = self.remote_for(identity, Some(tag_id)) {
            let tag = remote
                .rename_tag(owner, tag_id, &name)
                .await
                .inspect_err(|e| {
                    tracing::error!(owner, tag_id, error = %e, "Remote tag rename failed");
                    self.notices.error("Could not rename the tag.");
                })?;
            self.tags.commit_change(
                self.local.as_ref(),
                owner,
                TagChange::Upsert(tag.clone()),
                apply_change,
            );
            return Ok(tag);
        }

        self.tags
            .write_through(self.local.as_ref(), owner, |tags| {
                let tag = tags
                    .iter_mut()
                    .find(|t| t.id == tag_id)
                    .ok_or_else(|| RepoError::TagNotFound(tag_id.to_string()))?;
                tag.name = name.clone();
                Ok(tag.clone())
            })
            .inspect_err(|e| self.local_failure("rename the tag", e))
    }

    /// Remove the tag; the caller detaches it from tasks
    pub async fn remove(&self, identity: &Identity, tag_id: &str) -> RepoResult<()> {
        let owner = identity.id();

        if let Some(remote) = self.remote_for(identity, Some(tag_id)) {
            remote.delete_tag(owner, tag_id).await.inspect_err(|e| {
                tracing::error!(owner, tag_id, error = %e, "Remote tag delete failed");
                self.notices.error("Could not delete the tag.");
            })?;
            self.tags.commit_change(
                self.local.as_ref(),
                owner,
                TagChange::Remove(tag_id.to_string()),
                apply_change,
            );
        } else {
            self.tags
                .write_through(self.local.as_ref(), owner, |tags| {
                    let before = tags.len();
                    tags.retain(|t| t.id != tag_id);
                    if tags.len() == before {
                        return Err(RepoError::TagNotFound(tag_id.to_string()));
                    }
                    Ok(())
                })
                .inspect_err(|e| self.local_failure("delete the tag", e))?;
        }

        tracing::info!(owner, tag_id, "Tag deleted");
        Ok(())
    }

    fn local_failure(&self, action: &str, error: &RepoError) {
        if matches!(error, RepoError::Local(_)) {
            tracing::error!(error = %error, "Local tag write failed");
            self.notices.error(format!("Could not {action}."));
        }
    }
}

fn validate_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyTagName);
    }
    if name.chars().count() > MAX_TAG_NAME_CHARS {
        return Err(ValidationError::TagNameTooLong {
            max: MAX_TAG_NAME_CHARS,
        });
    }
    Ok(name.to_string())
}
