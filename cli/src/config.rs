use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

pub struct Config {
    pub db_path: PathBuf,
}

impl Config {
    /// Resolve the database file: an explicit path wins, otherwise
    /// `nutri.db` in the per-user data directory.
    pub fn load(db_override: Option<PathBuf>) -> Result<Self> {
        let db_path = match db_override {
            Some(path) => path,
            None => {
                let proj_dirs = ProjectDirs::from("", "", "nutri")
                    .context("Could not determine home directory")?;
                proj_dirs.data_dir().join("nutri.db")
            }
        };

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create data directory: {}", parent.display())
            })?;
        }

        Ok(Config { db_path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("plans.db");
        let config = Config::load(Some(path.clone())).unwrap();
        assert_eq!(config.db_path, path);
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn test_bare_file_name() {
        let config = Config::load(Some(PathBuf::from("plans.db"))).unwrap();
        assert_eq!(config.db_path, PathBuf::from("plans.db"));
    }
}
