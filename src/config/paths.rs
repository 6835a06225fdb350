use std::fs;
use std::path::PathBuf;

use crate::error::{AppError, AppResult};

const APP_DIR: &str = "inbox-insights";

#[derive(Debug, Clone)]
pub struct AppPaths {
    profiles_dir: PathBuf,
    credentials_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> AppResult<Self> {
        let config_root = dirs::config_dir()
            .ok_or_else(|| AppError::Config("unable to resolve config directory".to_string()))?;
        let data_root = dirs::data_dir()
            .ok_or_else(|| AppError::Config("unable to resolve data directory".to_string()))?;

        Self::rooted(config_root.join(APP_DIR), data_root.join(APP_DIR))
    }

    pub fn rooted(config_dir: PathBuf, data_dir: PathBuf) -> AppResult<Self> {
        let profiles_dir = config_dir.join("profiles");
        let credentials_dir = data_dir.join("credentials");

        fs::create_dir_all(&profiles_dir)?;
        fs::create_dir_all(&credentials_dir)?;

        Ok(Self {
            profiles_dir,
            credentials_dir,
        })
    }

    pub fn settings_file(&self, profile: &str) -> PathBuf {
        self.profiles_dir.join(format!("{profile}.json"))
    }

    /// Credential files for one profile; the store names files by key.
    pub fn credentials_dir(&self, profile: &str) -> PathBuf {
        self.credentials_dir.join(profile)
    }
}
