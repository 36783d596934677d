use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const DEFAULT_THEME_CSS: &str = "app/globals.css";
pub const DEFAULT_TOKENS_OUT: &str = "figma-tokens.json";

/// Resolved file locations. Explicit values (flags or their env vars, via
/// clap) win over the platform directories.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub preferences_path: PathBuf,
}

impl Config {
    pub fn resolve(database: Option<PathBuf>, preferences: Option<PathBuf>) -> Self {
        let dirs = directories::ProjectDirs::from("", "", "jobsearch");
        let database_path = database.unwrap_or_else(|| match &dirs {
            Some(d) => d.data_dir().join("jobsearch.db"),
            None => PathBuf::from("jobsearch.db"),
        });
        let preferences_path = preferences.unwrap_or_else(|| match &dirs {
            Some(d) => d.config_dir().join("preferences.json"),
            None => PathBuf::from("preferences.json"),
        });
        Self {
            database_path,
            preferences_path,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for path in [&self.database_path, &self.preferences_path] {
            ensure_parent(path)?;
        }
        Ok(())
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}
