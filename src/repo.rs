use async_trait::async_trait;

use crate::credential;
use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("forbidden")] Forbidden,
    #[error("{0}")] Invalid(String),
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Comment persistence. Every operation is scoped to a normalized thread key;
/// an id that exists only in another thread is `NotFound`.
#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn create_comment(&self, thread: &str, new: NewComment, owner_token: &str) -> RepoResult<Comment>;
    async fn get_comment(&self, thread: &str, id: Id) -> RepoResult<Comment>;
    /// Ascending by id, tombstones included.
    async fn list_comments(&self, thread: &str) -> RepoResult<Vec<Comment>>;
    async fn update_comment(&self, thread: &str, id: Id, actor: Actor, upd: UpdateComment) -> RepoResult<Comment>;
    /// `Ok(None)` when the comment was erased, `Ok(Some(tombstone))` when replies keep it alive.
    async fn delete_comment(&self, thread: &str, id: Id, actor: Actor) -> RepoResult<Option<Comment>>;
}

fn authorize(actor: &Actor, owner_token: &str) -> RepoResult<()> {
    match actor {
        Actor::Privileged => Ok(()),
        Actor::Owner(Some(token)) if credential::validate(owner_token, token) => Ok(()),
        Actor::Owner(_) => Err(RepoError::Forbidden),
    }
}

fn missing_parent(parent: Id) -> RepoError {
    RepoError::Invalid(format!("parent comment {parent} does not exist"))
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::collections::{BTreeMap, HashMap};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct StoredComment {
        comment: Comment,
        email: Option<String>,
        owner_token: String,
    }

    type ThreadComments = BTreeMap<Id, StoredComment>;

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        threads: HashMap<String, ThreadComments>,
    }

    /// Comment store held in memory and mirrored to a JSON snapshot after
    /// every write. All writers serialize on one lock, which also makes
    /// per-thread id assignment atomic. A write whose snapshot fails is
    /// rolled back.
    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        /// Load (or start) the snapshot at `path`.
        pub fn new(path: impl Into<PathBuf>) -> Self {
            let path = path.into();
            let state = Self::load_state_from(&path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(path)),
            }
        }

        /// No snapshot: state lives and dies with the process.
        pub fn ephemeral() -> Self {
            Self {
                state: Arc::new(RwLock::new(State::default())),
                snapshot_path: None,
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        tracing::info!(path = %path.display(), threads = s.threads.len(), "loaded comment snapshot");
                        s
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "unreadable snapshot, starting empty");
                        State::default()
                    }
                },
                Err(e) => {
                    tracing::info!(path = %path.display(), error = %e, "no snapshot, starting empty");
                    State::default()
                }
            }
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        /// Copy of one thread taken before a write, for rolling it back.
        fn before(&self, state: &State, thread: &str) -> Option<ThreadComments> {
            self.snapshot_path.as_ref()?;
            state.threads.get(thread).cloned()
        }

        /// Persist the snapshot while still holding the write lock. On failure
        /// `thread` is restored to `before` and the write is reported as failed.
        fn commit(
            &self,
            mut state: RwLockWriteGuard<'_, State>,
            thread: &str,
            before: Option<ThreadComments>,
        ) -> RepoResult<()> {
            let Some(path) = self.snapshot_path.as_deref() else { return Ok(()) };
            let written = serde_json::to_vec(&*state)
                .map_err(std::io::Error::from)
                .and_then(|bytes| write_atomically(path, &bytes));
            if let Err(e) = written {
                tracing::error!(path = %path.display(), error = %e, "failed to write snapshot, rolling back");
                match before {
                    Some(comments) => state.threads.insert(thread.to_owned(), comments),
                    None => state.threads.remove(thread),
                };
                return Err(RepoError::Internal("snapshot write failed".into()));
            }
            Ok(())
        }
    }

    fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)
    }

    /// Erase tombstones up the parent chain once their last reply is gone.
    fn prune_stale(comments: &mut ThreadComments, mut parent: Option<Id>) {
        while let Some(pid) = parent {
            let stale = comments.get(&pid).is_some_and(|p| p.comment.deleted)
                && !comments.values().any(|c| c.comment.parent == Some(pid));
            if !stale {
                break;
            }
            parent = comments.remove(&pid).and_then(|p| p.comment.parent);
        }
    }

    fn live_mut<'a>(state: &'a mut State, thread: &str, id: Id) -> RepoResult<&'a mut StoredComment> {
        state
            .threads
            .get_mut(thread)
            .and_then(|c| c.get_mut(&id))
            .filter(|c| !c.comment.deleted)
            .ok_or(RepoError::NotFound)
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn create_comment(&self, thread: &str, new: NewComment, owner_token: &str) -> RepoResult<Comment> {
            new.validate().map_err(RepoError::Invalid)?;
            let mut s = self.write()?;
            let before = self.before(&s, thread);
            if let Some(parent) = new.parent {
                let exists = s.threads.get(thread).is_some_and(|c| c.contains_key(&parent));
                if !exists {
                    return Err(missing_parent(parent));
                }
            }
            let comments = s.threads.entry(thread.to_owned()).or_default();
            let id = comments.last_key_value().map_or(1, |(last, _)| last + 1);
            let comment = Comment {
                id,
                thread: thread.to_owned(),
                parent: new.parent,
                text: new.text,
                author: new.author,
                website: new.website,
                created: Utc::now(),
                modified: None,
                pending: false,
                deleted: false,
            };
            comments.insert(id, StoredComment {
                comment: comment.clone(),
                email: new.email,
                owner_token: owner_token.to_owned(),
            });
            self.commit(s, thread, before)?;
            Ok(comment)
        }

        async fn get_comment(&self, thread: &str, id: Id) -> RepoResult<Comment> {
            let s = self.read()?;
            s.threads
                .get(thread)
                .and_then(|c| c.get(&id))
                .map(|c| c.comment.clone())
                .ok_or(RepoError::NotFound)
        }

        async fn list_comments(&self, thread: &str) -> RepoResult<Vec<Comment>> {
            let s = self.read()?;
            Ok(s.threads
                .get(thread)
                .map(|c| c.values().map(|c| c.comment.clone()).collect())
                .unwrap_or_default())
        }

        async fn update_comment(&self, thread: &str, id: Id, actor: Actor, upd: UpdateComment) -> RepoResult<Comment> {
            let mut s = self.write()?;
            let before = self.before(&s, thread);
            let stored = live_mut(&mut s, thread, id)?;
            authorize(&actor, &stored.owner_token)?;
            upd.validate().map_err(RepoError::Invalid)?;
            upd.apply(&mut stored.comment);
            let updated = stored.comment.clone();
            self.commit(s, thread, before)?;
            Ok(updated)
        }

        async fn delete_comment(&self, thread: &str, id: Id, actor: Actor) -> RepoResult<Option<Comment>> {
            let mut s = self.write()?;
            authorize(&actor, &live_mut(&mut s, thread, id)?.owner_token)?;
            let before = self.before(&s, thread);

            let comments = s.threads.get_mut(thread).ok_or(RepoError::NotFound)?;
            let has_replies = comments.values().any(|c| c.comment.parent == Some(id));
            let outcome = if has_replies {
                let stored = comments.get_mut(&id).ok_or(RepoError::NotFound)?;
                stored.comment.redact();
                stored.email = None;
                Some(stored.comment.clone())
            } else {
                let parent = comments.remove(&id).and_then(|c| c.comment.parent);
                prune_stale(comments, parent);
                None
            };
            if comments.is_empty() {
                s.threads.remove(thread);
            }
            self.commit(s, thread, before)?;
            Ok(outcome)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres, Transaction};

    const COLUMNS: &str =
        "id, thread_key AS thread, parent, text, author, website, created, modified, pending, deleted";

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
            sqlx::migrate!("./migrations").run(&self.pool).await
        }
    }

    fn internal(e: sqlx::Error) -> RepoError {
        RepoError::Internal(e.to_string())
    }

    /// Row-lock the thread so id assignment and delete decisions within it
    /// are serialized. Returns false when the thread does not exist.
    async fn lock_thread(tx: &mut Transaction<'_, Postgres>, thread: &str) -> RepoResult<bool> {
        let row = sqlx::query("SELECT key FROM threads WHERE key = $1 FOR UPDATE")
            .bind(thread)
            .fetch_optional(&mut **tx).await.map_err(internal)?;
        Ok(row.is_some())
    }

    /// Owner token of a live (not tombstoned) comment.
    async fn live_owner(tx: &mut Transaction<'_, Postgres>, thread: &str, id: Id) -> RepoResult<String> {
        if !lock_thread(tx, thread).await? {
            return Err(RepoError::NotFound);
        }
        let row = sqlx::query_as::<_, (String, bool)>(
            "SELECT owner_token, deleted FROM comments WHERE thread_key = $1 AND id = $2 FOR UPDATE",
        )
        .bind(thread)
        .bind(id)
        .fetch_optional(&mut **tx).await.map_err(internal)?;
        match row {
            Some((token, false)) => Ok(token),
            _ => Err(RepoError::NotFound),
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn create_comment(&self, thread: &str, new: NewComment, owner_token: &str) -> RepoResult<Comment> {
            new.validate().map_err(RepoError::Invalid)?;
            let mut tx = self.pool.begin().await.map_err(internal)?;
            sqlx::query("INSERT INTO threads (key) VALUES ($1) ON CONFLICT (key) DO NOTHING")
                .bind(thread)
                .execute(&mut *tx).await.map_err(internal)?;
            lock_thread(&mut tx, thread).await?;
            if let Some(parent) = new.parent {
                let exists: bool = sqlx::query_scalar(
                    "SELECT EXISTS (SELECT 1 FROM comments WHERE thread_key = $1 AND id = $2)",
                )
                .bind(thread)
                .bind(parent)
                .fetch_one(&mut *tx).await.map_err(internal)?;
                if !exists {
                    return Err(missing_parent(parent));
                }
            }
            let id: Id = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) + 1 FROM comments WHERE thread_key = $1")
                .bind(thread)
                .fetch_one(&mut *tx).await.map_err(internal)?;
            let comment = sqlx::query_as::<_, Comment>(&format!(
                "INSERT INTO comments (thread_key, id, parent, text, author, email, website, owner_token)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {COLUMNS}"
            ))
            .bind(thread)
            .bind(id)
            .bind(new.parent)
            .bind(&new.text)
            .bind(new.author.as_ref())
            .bind(new.email.as_ref())
            .bind(new.website.as_ref())
            .bind(owner_token)
            .fetch_one(&mut *tx).await.map_err(internal)?;
            tx.commit().await.map_err(internal)?;
            Ok(comment)
        }

        async fn get_comment(&self, thread: &str, id: Id) -> RepoResult<Comment> {
            sqlx::query_as::<_, Comment>(&format!(
                "SELECT {COLUMNS} FROM comments WHERE thread_key = $1 AND id = $2"
            ))
            .bind(thread)
            .bind(id)
            .fetch_optional(&self.pool).await.map_err(internal)?
            .ok_or(RepoError::NotFound)
        }

        async fn list_comments(&self, thread: &str) -> RepoResult<Vec<Comment>> {
            sqlx::query_as::<_, Comment>(&format!(
                "SELECT {COLUMNS} FROM comments WHERE thread_key = $1 ORDER BY id ASC"
            ))
            .bind(thread)
            .fetch_all(&self.pool).await.map_err(internal)
        }

        async fn update_comment(&self, thread: &str, id: Id, actor: Actor, upd: UpdateComment) -> RepoResult<Comment> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            let owner = live_owner(&mut tx, thread, id).await?;
            authorize(&actor, &owner)?;
            upd.validate().map_err(RepoError::Invalid)?;
            let comment = sqlx::query_as::<_, Comment>(&format!(
                "UPDATE comments
                 SET text = COALESCE($3, text), author = COALESCE($4, author),
                     website = COALESCE($5, website), modified = now()
                 WHERE thread_key = $1 AND id = $2 RETURNING {COLUMNS}"
            ))
            .bind(thread)
            .bind(id)
            .bind(upd.text.as_ref())
            .bind(upd.author.as_ref())
            .bind(upd.website.as_ref())
            .fetch_one(&mut *tx).await.map_err(internal)?;
            tx.commit().await.map_err(internal)?;
            Ok(comment)
        }

        async fn delete_comment(&self, thread: &str, id: Id, actor: Actor) -> RepoResult<Option<Comment>> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            let owner = live_owner(&mut tx, thread, id).await?;
            authorize(&actor, &owner)?;
            let has_replies: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM comments WHERE thread_key = $1 AND parent = $2)",
            )
            .bind(thread)
            .bind(id)
            .fetch_one(&mut *tx).await.map_err(internal)?;

            let outcome = if has_replies {
                let tombstone = sqlx::query_as::<_, Comment>(&format!(
                    "UPDATE comments
                     SET deleted = TRUE, text = '', author = NULL, email = NULL, website = NULL
                     WHERE thread_key = $1 AND id = $2 RETURNING {COLUMNS}"
                ))
                .bind(thread)
                .bind(id)
                .fetch_one(&mut *tx).await.map_err(internal)?;
                Some(tombstone)
            } else {
                let mut parent: Option<Id> = sqlx::query_scalar(
                    "DELETE FROM comments WHERE thread_key = $1 AND id = $2 RETURNING parent",
                )
                .bind(thread)
                .bind(id)
                .fetch_one(&mut *tx).await.map_err(internal)?;
                // walk up, erasing tombstones left without replies
                while let Some(pid) = parent {
                    parent = sqlx::query_scalar::<_, Option<Id>>(
                        "DELETE FROM comments c
                         WHERE c.thread_key = $1 AND c.id = $2 AND c.deleted
                           AND NOT EXISTS (SELECT 1 FROM comments k WHERE k.thread_key = $1 AND k.parent = $2)
                         RETURNING c.parent",
                    )
                    .bind(thread)
                    .bind(pid)
                    .fetch_optional(&mut *tx).await.map_err(internal)?
                    .flatten();
                }
                None
            };
            tx.commit().await.map_err(internal)?;
            Ok(outcome)
        }
    }
}
