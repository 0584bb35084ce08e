//! The `users` collection
//!
//! Lookups run over the service connection, which is bound to the configured
//! keyspace, so table names are unqualified.

use crate::database::Database;
use crate::error::Result;
use crate::query::{ResultSet, Statement};

/// Lookup of one user by username
pub const USER_BY_USERNAME_CQL: &str = "SELECT * FROM users WHERE username = ?";

/// Queries against the `users` table
#[derive(Clone, Copy)]
pub struct Users<'d> {
    db: &'d Database,
}

impl<'d> Users<'d> {
    pub(crate) fn new(db: &'d Database) -> Self {
        Self { db }
    }

    /// Fetches the user named `username`
    ///
    /// `None` when no user (or, for a corrupt table, more than one) matches.
    /// Read the columns through [`ResultSet::single`].
    pub async fn get_user(&self, username: &str) -> Result<Option<ResultSet>> {
        let statement = Statement::new(USER_BY_USERNAME_CQL)
            .bind(username)
            .idempotent();
        self.db.fetch_one(&statement).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::error::Error;
    use crate::migration::UP_DIR;
    use crate::query::Value;
    use crate::test_utils::MemoryDriver;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn user_rows(usernames: &[&str]) -> ResultSet {
        let mut rows = ResultSet::new(vec!["username".into(), "email".into()]);
        for username in usernames {
            rows.push_row(vec![
                Value::from(*username),
                Value::from(format!("{username}@example.org")),
            ]);
        }
        rows
    }

    async fn ready_db(driver: &MemoryDriver) -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join(UP_DIR)).unwrap();
        let config = DatabaseConfig::builder()
            .contact_point("127.0.0.1:9042")
            .keyspace("app")
            .migrations_root(temp_dir.path())
            .build()
            .unwrap();
        let db = Database::new(config, Arc::new(driver.clone())).unwrap();
        db.initialize().await.unwrap();
        (temp_dir, db)
    }

    #[tokio::test]
    async fn test_get_user_found() {
        let driver = MemoryDriver::new()
            .with_keyspace("app")
            .with_rows("from users where username", user_rows(&["alice"]));
        let (_dir, db) = ready_db(&driver).await;

        let user = db.users().get_user("alice").await.unwrap().unwrap();
        let row = user.single().unwrap();
        assert_eq!(row.text("email"), Some("alice@example.org"));
        assert_eq!(
            driver.user_statements().last().map(String::as_str),
            Some(USER_BY_USERNAME_CQL)
        );
    }

    #[tokio::test]
    async fn test_get_user_missing() {
        let driver = MemoryDriver::new().with_keyspace("app");
        let (_dir, db) = ready_db(&driver).await;

        assert!(db.users().get_user("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_user_ambiguous() {
        let driver = MemoryDriver::new()
            .with_keyspace("app")
            .with_rows("from users where username", user_rows(&["alice", "alice"]));
        let (_dir, db) = ready_db(&driver).await;

        assert!(db.users().get_user("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_user_errors() {
        let driver = MemoryDriver::new()
            .with_keyspace("app")
            .fail_on("from users");
        let (_dir, db) = ready_db(&driver).await;

        let err = db.users().get_user("alice").await.unwrap_err();
        assert!(matches!(err, Error::Query(_)));

        db.shutdown().await.unwrap();
        let err = db.users().get_user("alice").await.unwrap_err();
        assert!(matches!(err, Error::NotReady));
    }
}
