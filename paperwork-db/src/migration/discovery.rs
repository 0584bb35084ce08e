//! Migration discovery on the filesystem
//!
//! Scripts live in `<root>/up/`, one statement per file. Directory order is
//! irrelevant; callers sort filenames to get application order.

use super::{MigrationError, MigrationFile};
use std::path::{Path, PathBuf};

/// Name of the directory holding forward migrations
pub const UP_DIR: &str = "up";

/// A migrations root directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSource {
    root: PathBuf,
}

impl MigrationSource {
    /// Creates a source for the given migrations root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The migrations root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory scripts are read from
    pub fn up_dir(&self) -> PathBuf {
        self.root.join(UP_DIR)
    }

    /// Lists every entry of the `up/` directory
    pub async fn list_available(&self) -> Result<Vec<MigrationFile>, MigrationError> {
        let dir = self.up_dir();
        let discovery_err = |source| MigrationError::Discovery {
            path: dir.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&dir).await.map_err(discovery_err)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(discovery_err)? {
            let filename = entry
                .file_name()
                .into_string()
                .map_err(MigrationError::InvalidFilename)?;
            files.push(MigrationFile::new(filename));
        }
        Ok(files)
    }

    /// Reads one script verbatim
    pub async fn read_content(&self, filename: &str) -> Result<String, MigrationError> {
        let path = self.up_dir().join(filename);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| MigrationError::Discovery { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup(files: &[(&str, &str)]) -> (TempDir, MigrationSource) {
        let temp_dir = TempDir::new().unwrap();
        let up = temp_dir.path().join(UP_DIR);
        std::fs::create_dir_all(&up).unwrap();
        for (name, content) in files {
            std::fs::write(up.join(name), content).unwrap();
        }
        let source = MigrationSource::new(temp_dir.path());
        (temp_dir, source)
    }

    #[tokio::test]
    async fn test_list_available() {
        let (_dir, source) = setup(&[
            ("002_add_email.cql", "ALTER TABLE app.users ADD email text;"),
            ("001_create_users.cql", "CREATE TABLE app.users (id uuid PRIMARY KEY);"),
        ]);

        let mut files = source.list_available().await.unwrap();
        files.sort();
        assert_eq!(
            files,
            vec![
                MigrationFile::new("001_create_users.cql"),
                MigrationFile::new("002_add_email.cql"),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_empty_directory() {
        let (_dir, source) = setup(&[]);
        assert!(source.list_available().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let source = MigrationSource::new(temp_dir.path().join("nope"));

        let err = source.list_available().await.unwrap_err();
        match err {
            MigrationError::Discovery { path, .. } => assert!(path.ends_with("nope/up")),
            other => panic!("Expected Discovery error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_content_verbatim() {
        let script = "CREATE TABLE app.notes (\n  id uuid PRIMARY KEY,\n  body text\n);\n";
        let (_dir, source) = setup(&[("001_notes.cql", script)]);

        let content = source.read_content("001_notes.cql").await.unwrap();
        assert_eq!(content, script);
    }

    #[tokio::test]
    async fn test_read_content_missing_file() {
        let (_dir, source) = setup(&[]);
        let err = source.read_content("404.cql").await.unwrap_err();
        assert!(matches!(err, MigrationError::Discovery { .. }));
    }

    #[test]
    fn test_up_dir() {
        let source = MigrationSource::new("/srv/migrations/cql");
        assert_eq!(source.root(), Path::new("/srv/migrations/cql"));
        assert_eq!(source.up_dir(), PathBuf::from("/srv/migrations/cql/up"));
    }
}
