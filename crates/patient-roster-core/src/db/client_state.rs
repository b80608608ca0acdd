//! Client state key-value operations.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult};

impl Database {
    /// Get a client state value.
    pub fn get_client_state(&self, key: &str) -> DbResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM client_state WHERE key = ?",
                [key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Set a client state value.
    pub fn set_client_state(&self, key: &str, value: &str) -> DbResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO client_state (key, value, updated_at) VALUES (?, ?, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }

    /// Set several values in one transaction.
    pub fn set_client_state_many(&mut self, entries: &[(&str, &str)]) -> DbResult<()> {
        let tx = self.conn.transaction()?;
        for &(key, value) in entries {
            tx.execute(
                "INSERT OR REPLACE INTO client_state (key, value, updated_at) VALUES (?, ?, datetime('now'))",
                params![key, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete the given keys in one transaction. Returns the number removed.
    pub fn clear_client_state(&mut self, keys: &[&str]) -> DbResult<usize> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        for &key in keys {
            removed += tx.execute("DELETE FROM client_state WHERE key = ?", [key])?;
        }
        tx.commit()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_get_missing() {
        let db = setup_db();
        assert_eq!(db.get_client_state("token").unwrap(), None);
    }

    #[test]
    fn test_set_and_overwrite() {
        let db = setup_db();

        db.set_client_state("token", "abc").unwrap();
        assert_eq!(db.get_client_state("token").unwrap(), Some("abc".to_string()));

        db.set_client_state("token", "def").unwrap();
        assert_eq!(db.get_client_state("token").unwrap(), Some("def".to_string()));
    }

    #[test]
    fn test_many_and_clear() {
        let mut db = setup_db();

        db.set_client_state_many(&[("token", "t"), ("username", "u"), ("other", "o")])
            .unwrap();
        let removed = db.clear_client_state(&["token", "username", "fullName"]).unwrap();
        assert_eq!(removed, 2);

        assert_eq!(db.get_client_state("token").unwrap(), None);
        assert_eq!(db.get_client_state("username").unwrap(), None);
        assert_eq!(db.get_client_state("other").unwrap(), Some("o".to_string()));
    }
}
