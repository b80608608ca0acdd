//! Session credential storage.
//!
//! The UI layer receives a [`SessionStore`] explicitly; nothing reads
//! credentials from ambient global state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use thiserror::Error;

use crate::db::{Database, DbError};
use crate::models::AuthSession;

/// Store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Session store lock poisoned")]
    Poisoned,
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::Poisoned
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The persisted credential values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKey {
    Token,
    Username,
    FullName,
}

impl SessionKey {
    pub const ALL: [SessionKey; 3] = [SessionKey::Token, SessionKey::Username, SessionKey::FullName];

    /// Storage key name.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionKey::Token => "token",
            SessionKey::Username => "username",
            SessionKey::FullName => "fullName",
        }
    }
}

/// Typed get/set/clear access to session credentials.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: SessionKey) -> StoreResult<Option<String>>;

    fn set(&self, key: SessionKey, value: &str) -> StoreResult<()>;

    /// Remove token, username and full name together.
    fn clear(&self) -> StoreResult<()>;

    /// Write all three values of a session.
    fn save(&self, session: &AuthSession) -> StoreResult<()> {
        self.set(SessionKey::Token, &session.token)?;
        self.set(SessionKey::Username, &session.username)?;
        self.set(SessionKey::FullName, &session.full_name)
    }

    /// The stored session, if all three values are present.
    fn load(&self) -> StoreResult<Option<AuthSession>> {
        let token = self.get(SessionKey::Token)?;
        let username = self.get(SessionKey::Username)?;
        let full_name = self.get(SessionKey::FullName)?;
        Ok(match (token, username, full_name) {
            (Some(token), Some(username), Some(full_name)) => Some(AuthSession {
                token,
                username,
                full_name,
                role: None,
            }),
            _ => None,
        })
    }

    fn token(&self) -> StoreResult<Option<String>> {
        self.get(SessionKey::Token)
    }
}

impl<S: SessionStore + ?Sized> SessionStore for std::sync::Arc<S> {
    fn get(&self, key: SessionKey) -> StoreResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: SessionKey, value: &str) -> StoreResult<()> {
        (**self).set(key, value)
    }

    fn clear(&self) -> StoreResult<()> {
        (**self).clear()
    }

    fn save(&self, session: &AuthSession) -> StoreResult<()> {
        (**self).save(session)
    }
}

/// Process-local store; forgets everything on exit.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<SessionKey, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: SessionKey) -> StoreResult<Option<String>> {
        Ok(self.values.lock()?.get(&key).cloned())
    }

    fn set(&self, key: SessionKey, value: &str) -> StoreResult<()> {
        self.values.lock()?.insert(key, value.to_string());
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        self.values.lock()?.clear();
        Ok(())
    }

    fn save(&self, session: &AuthSession) -> StoreResult<()> {
        let mut values = self.values.lock()?;
        values.insert(SessionKey::Token, session.token.clone());
        values.insert(SessionKey::Username, session.username.clone());
        values.insert(SessionKey::FullName, session.full_name.clone());
        Ok(())
    }
}

/// SQLite-backed store that survives restarts.
pub struct SqliteSessionStore {
    db: Mutex<Database>,
}

impl SqliteSessionStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Ok(Self::from_database(Database::open(path)?))
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    pub fn from_database(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }
}

impl SessionStore for SqliteSessionStore {
    fn get(&self, key: SessionKey) -> StoreResult<Option<String>> {
        Ok(self.db.lock()?.get_client_state(key.as_str())?)
    }

    fn set(&self, key: SessionKey, value: &str) -> StoreResult<()> {
        Ok(self.db.lock()?.set_client_state(key.as_str(), value)?)
    }

    fn clear(&self) -> StoreResult<()> {
        let keys = SessionKey::ALL.map(SessionKey::as_str);
        self.db.lock()?.clear_client_state(&keys)?;
        Ok(())
    }

    fn save(&self, session: &AuthSession) -> StoreResult<()> {
        self.db.lock()?.set_client_state_many(&[
            (SessionKey::Token.as_str(), session.token.as_str()),
            (SessionKey::Username.as_str(), session.username.as_str()),
            (SessionKey::FullName.as_str(), session.full_name.as_str()),
        ])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> AuthSession {
        AuthSession {
            token: "tok".into(),
            username: "reg1".into(),
            full_name: "Registrar One".into(),
            role: Some("ROLE_RECEPTIONIST".into()),
        }
    }

    fn exercise(store: &dyn SessionStore) {
        assert!(store.load().unwrap().is_none());

        store.save(&session()).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.token, "tok");
        assert_eq!(loaded.username, "reg1");
        assert_eq!(loaded.full_name, "Registrar One");
        assert_eq!(store.token().unwrap().as_deref(), Some("tok"));

        store.clear().unwrap();
        for key in SessionKey::ALL {
            assert_eq!(store.get(key).unwrap(), None, "{key:?} survived clear");
        }
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemorySessionStore::new());
    }

    #[test]
    fn test_sqlite_store() {
        exercise(&SqliteSessionStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_partial_session_does_not_load() {
        let store = MemorySessionStore::new();
        store.set(SessionKey::Token, "tok").unwrap();
        store.set(SessionKey::Username, "reg1").unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.db");

        SqliteSessionStore::open(&path).unwrap().save(&session()).unwrap();

        let reopened = SqliteSessionStore::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap().unwrap().username, "reg1");

        reopened.clear().unwrap();
        let again = SqliteSessionStore::open(&path).unwrap();
        assert!(again.load().unwrap().is_none());
    }

    #[test]
    fn test_key_names() {
        let names: Vec<_> = SessionKey::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names, ["token", "username", "fullName"]);
    }
}
