use crate::error::Result;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const CHAT_MESSAGES_KEY: &str = "chat_messages";

pub fn default_db_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("com", "example", "PersonaChat")?;
    Some(proj.data_dir().join("session.sqlite"))
}

fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Durable string key/value store. Every write is committed before returning.
pub struct KvStore {
    conn: Mutex<Connection>,
}

impl KvStore {
    pub fn open(path: &Path) -> Result<Self> {
        ensure_dir(path)?;
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.write(&[(key, Some(value))])
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.write(&[(key, None)])
    }

    /// Applies all entries in one transaction; `None` deletes the key.
    pub fn write(&self, entries: &[(&str, Option<&str>)]) -> Result<()> {
        self.write_if(None, entries).map(|_| ())
    }

    /// Like [`KvStore::write`], but only when `guard` still holds its expected
    /// value. The check and the write share one transaction.
    pub fn write_if(
        &self,
        guard: Option<(&str, &str)>,
        entries: &[(&str, Option<&str>)],
    ) -> Result<bool> {
        let now = now_secs();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        if let Some((key, expected)) = guard {
            let current: Option<String> = tx
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?;
            if current.as_deref() != Some(expected) {
                return Ok(false);
            }
        }
        for (key, value) in entries {
            match value {
                Some(v) => {
                    tx.execute(
                        r#"
                        INSERT INTO kv (key, value, updated_at)
                        VALUES (?1, ?2, ?3)
                        ON CONFLICT(key) DO UPDATE SET
                            value=excluded.value,
                            updated_at=excluded.updated_at
                        "#,
                        params![key, v, now],
                    )?;
                }
                None => {
                    tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                }
            }
        }
        tx.commit()?;
        Ok(true)
    }
}

/// Access and refresh token. Either both are present or neither is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    tokens: Option<(String, String)>,
}

impl Credentials {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self { tokens: Some((access.into(), refresh.into())) }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn access(&self) -> Option<&str> {
        self.tokens.as_ref().map(|(a, _)| a.as_str())
    }

    pub fn refresh(&self) -> Option<&str> {
        self.tokens.as_ref().map(|(_, r)| r.as_str())
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_some()
    }
}

/// Opaque holder for the session tokens on top of a [`KvStore`].
#[derive(Clone)]
pub struct CredentialStore {
    kv: Arc<KvStore>,
}

impl CredentialStore {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    /// A half-written pair (only one key on disk) reads back as logged out.
    pub fn get(&self) -> Result<Credentials> {
        let access = self.kv.get(ACCESS_TOKEN_KEY)?;
        let refresh = self.kv.get(REFRESH_TOKEN_KEY)?;
        Ok(match (access, refresh) {
            (Some(a), Some(r)) => Credentials::new(a, r),
            _ => Credentials::empty(),
        })
    }

    pub fn set(&self, creds: &Credentials) -> Result<()> {
        match &creds.tokens {
            Some((access, refresh)) => self.kv.write(&[
                (ACCESS_TOKEN_KEY, Some(access.as_str())),
                (REFRESH_TOKEN_KEY, Some(refresh.as_str())),
            ]),
            None => self.clear(),
        }
    }

    /// Stores `next` only if the refresh token on disk is still `expected`.
    /// Returns `false` when a logout or a new log-in got there first.
    pub fn replace_if_refresh(&self, expected: &str, next: &Credentials) -> Result<bool> {
        let Some((access, refresh)) = &next.tokens else {
            return Ok(false);
        };
        self.kv.write_if(
            Some((REFRESH_TOKEN_KEY, expected)),
            &[
                (ACCESS_TOKEN_KEY, Some(access.as_str())),
                (REFRESH_TOKEN_KEY, Some(refresh.as_str())),
            ],
        )
    }

    pub fn clear(&self) -> Result<()> {
        log::info!("Clearing stored credentials");
        self.kv.write(&[(ACCESS_TOKEN_KEY, None), (REFRESH_TOKEN_KEY, None)])
    }

    pub fn kv(&self) -> &Arc<KvStore> {
        &self.kv
    }
}
