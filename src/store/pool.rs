// src/store/pool.rs
// Async connection pool using deadpool-sqlite.
//
// Database access goes through `interact()` (closure on a blocking
// thread) so the async runtime is never blocked on SQLite. In-memory
// pools use a shared-cache URI so every pooled connection sees the same
// database - required for tests.

use super::schema;
use anyhow::{Context, Result};
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::{Path, PathBuf};
use std::sync::Once;

/// Registers the sqlite-vec extension globally (once per process).
/// Must run before any SQLite connection is opened.
static SQLITE_VEC_INIT: Once = Once::new();

#[allow(clippy::missing_transmute_annotations)]
fn ensure_sqlite_vec_registered() {
    SQLITE_VEC_INIT.call_once(|| {
        // SAFETY: sqlite3_vec_init has the signature sqlite3_auto_extension
        // expects; the transmute converts the fn pointer into the
        // Option<extern "C" fn()> form. The pointer targets a
        // statically-linked symbol, valid for the process lifetime.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite3_vec_init as *const (),
            )));
        }
        tracing::debug!("sqlite-vec extension registered globally");
    });
}

/// Check if a rusqlite error is SQLITE_BUSY or SQLITE_LOCKED.
fn is_contention(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

/// Walk an anyhow chain looking for a SQLite contention error.
fn chain_has_contention(err: &anyhow::Error) -> bool {
    err.downcast_ref::<rusqlite::Error>().is_some_and(is_contention)
}

/// Retry delays for SQLite contention backoff.
const RETRY_DELAYS: [std::time::Duration; 3] = [
    std::time::Duration::from_millis(100),
    std::time::Duration::from_millis(500),
    std::time::Duration::from_millis(2000),
];

/// Pooled store handle. One pool = one corpus.
pub struct StorePool {
    pool: Pool,
    path: Option<PathBuf>,
    /// URI for in-memory databases (shared-cache, test state)
    memory_uri: Option<String>,
    embedding_dim: usize,
}

impl StorePool {
    /// Open a pooled store at the given path, running migrations.
    pub async fn open(path: &Path, embedding_dim: usize) -> Result<Self> {
        ensure_sqlite_vec_registered();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn_str = path.to_string_lossy().into_owned();
        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(post_create_hook())
            .build()
            .context("Failed to build connection pool")?;

        let store = Self {
            pool,
            path: Some(path.to_path_buf()),
            memory_uri: None,
            embedding_dim,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Open a pooled in-memory store (for tests).
    ///
    /// Uses a shared-cache URI so all pooled connections share state.
    pub async fn open_in_memory(embedding_dim: usize) -> Result<Self> {
        ensure_sqlite_vec_registered();

        let uri = format!("file:memdb_{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let cfg = Config::new(&uri);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(post_create_hook())
            .build()
            .context("Failed to build connection pool")?;

        let store = Self {
            pool,
            path: None,
            memory_uri: Some(uri),
            embedding_dim,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        let dim = self.embedding_dim;
        self.interact(move |conn| schema::run_migrations(conn, dim))
            .await
    }

    /// Run a closure with a connection from the pool. Primary access API.
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get connection from pool")?;

        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("interact failed: {e}"))?
    }

    /// Run a closure, logging failure at debug level instead of
    /// propagating. For best-effort operations (access tracking).
    pub async fn try_interact<F, R>(&self, label: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let label = label.to_string();
        match self.interact(f).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!("{label}: {e}");
                None
            }
        }
    }

    /// Run a closure with retry on SQLite contention (100ms/500ms/2s
    /// backoff). Use for writes that must not be lost.
    pub async fn interact_with_retry<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + Clone + 'static,
        R: Send + 'static,
    {
        for delay in RETRY_DELAYS {
            match self.interact(f.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) if chain_has_contention(&e) => {
                    tracing::warn!("SQLite contention, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        self.interact(f).await
    }

    /// Database file path (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Embedding dimensionality this corpus was opened with.
    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Stable identity for this corpus, used to name the consolidation
    /// run lock.
    pub fn corpus_key(&self) -> String {
        if let Some(path) = &self.path {
            return path.to_string_lossy().into_owned();
        }
        self.memory_uri
            .clone()
            .unwrap_or_else(|| "in-memory".to_string())
    }
}

/// Per-connection setup: WAL (no-op for in-memory), FK enforcement, and
/// a busy timeout to ride out short write contention.
fn post_create_hook() -> Hook {
    Hook::async_fn(|conn, _metrics| {
        Box::pin(async move {
            conn.interact(|conn| {
                conn.execute_batch(
                    "PRAGMA journal_mode=WAL; \
                     PRAGMA foreign_keys=ON; \
                     PRAGMA busy_timeout=5000; \
                     PRAGMA synchronous=NORMAL;",
                )?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_in_memory() {
        let pool = StorePool::open_in_memory(4)
            .await
            .expect("Failed to open in-memory pool");

        let id = pool
            .interact(|conn| {
                conn.execute(
                    "INSERT INTO memories (content, created_at) VALUES (?, ?)",
                    rusqlite::params!["hello", "2026-01-01T00:00:00+00:00"],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .expect("Failed to insert");
        assert!(id > 0);

        // Visible from another pooled connection (shared cache)
        let content: String = pool
            .interact(move |conn| {
                conn.query_row("SELECT content FROM memories WHERE id = ?", [id], |row| {
                    row.get(0)
                })
                .map_err(Into::into)
            })
            .await
            .expect("Failed to query");
        assert_eq!(content, "hello");
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let pool = std::sync::Arc::new(
            StorePool::open_in_memory(4)
                .await
                .expect("Failed to open pool"),
        );

        let mut handles = Vec::new();
        for i in 0..10 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.interact_with_retry(move |conn| {
                    conn.execute(
                        "INSERT INTO memories (content, created_at) VALUES (?, ?)",
                        rusqlite::params![format!("m{i}"), "2026-01-01T00:00:00+00:00"],
                    )?;
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().expect("Insert failed");
        }

        let count: i64 = pool
            .interact(|conn| {
                conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
                    .map_err(Into::into)
            })
            .await
            .expect("Count failed");
        assert_eq!(count, 10);
    }

    #[tokio::test]
    async fn test_non_contention_error_fails_fast() {
        let pool = StorePool::open_in_memory(4)
            .await
            .expect("Failed to open pool");

        let result = pool
            .interact_with_retry(|conn| {
                conn.execute("INSERT INTO no_such_table VALUES (1)", [])?;
                Ok(())
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_file_backed_pool() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("engram.db");
        let pool = StorePool::open(&db_path, 4).await.expect("open file pool");
        assert_eq!(pool.path(), Some(db_path.as_path()));
        assert_eq!(pool.corpus_key(), db_path.to_string_lossy());
    }

    #[test]
    fn test_contention_detection() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::DatabaseBusy,
                extended_code: 5,
            },
            Some("database is locked".to_string()),
        );
        assert!(is_contention(&busy));

        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::ConstraintViolation,
                extended_code: 19,
            },
            None,
        );
        assert!(!is_contention(&constraint));

        // String-only errors must not trigger retry
        assert!(!chain_has_contention(&anyhow::anyhow!("database is locked")));
    }
}
