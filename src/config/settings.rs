use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::analytics::topics::TopicRule;
use crate::auth::manager::DEFAULT_REFRESH_BUFFER_MINUTES;
use crate::error::{AppError, AppResult};

const DEFAULT_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_WINDOW_DAYS: u32 = 7;
const DEFAULT_SCORER_CONCURRENCY: usize = 8;
const MAX_SCORER_CONCURRENCY: usize = 16;
const DEFAULT_SCORER_TIMEOUT_SECS: u64 = 10;
const DEFAULT_REPORT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_PIPELINE_TIMEOUT_SECS: u64 = 60;
const MAX_WINDOW_DAYS: u32 = 366;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub refresh_buffer_minutes: Option<i64>,
    #[serde(default)]
    pub user_address: Option<String>,
    #[serde(default)]
    pub window_days: Option<u32>,
    #[serde(default)]
    pub scorer_concurrency: Option<usize>,
    #[serde(default)]
    pub scorer_timeout_secs: Option<u64>,
    #[serde(default)]
    pub scorer_url: Option<String>,
    #[serde(default)]
    pub report_cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub pipeline_timeout_secs: Option<u64>,
    #[serde(default)]
    pub topics: Option<Vec<TopicRule>>,
}

impl Settings {
    pub fn client_id(&self) -> AppResult<&str> {
        self.client_id.as_deref().ok_or_else(|| {
            AppError::Config(
                "missing oauth client_id in profile settings. add it to your profile json"
                    .to_string(),
            )
        })
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    pub fn token_endpoint(&self) -> String {
        self.token_endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_TOKEN_ENDPOINT.to_string())
    }

    pub fn provider(&self) -> &str {
        self.provider.as_deref().unwrap_or("google")
    }

    pub fn refresh_buffer_minutes(&self) -> i64 {
        self.refresh_buffer_minutes
            .unwrap_or(DEFAULT_REFRESH_BUFFER_MINUTES)
    }

    pub fn window_days(&self) -> u32 {
        self.window_days.unwrap_or(DEFAULT_WINDOW_DAYS)
    }

    pub fn scorer_concurrency(&self) -> usize {
        self.scorer_concurrency
            .unwrap_or(DEFAULT_SCORER_CONCURRENCY)
            .clamp(1, MAX_SCORER_CONCURRENCY)
    }

    pub fn scorer_timeout_secs(&self) -> u64 {
        self.scorer_timeout_secs
            .unwrap_or(DEFAULT_SCORER_TIMEOUT_SECS)
    }

    pub fn report_cache_ttl_secs(&self) -> u64 {
        self.report_cache_ttl_secs
            .unwrap_or(DEFAULT_REPORT_CACHE_TTL_SECS)
    }

    pub fn pipeline_timeout_secs(&self) -> u64 {
        self.pipeline_timeout_secs
            .unwrap_or(DEFAULT_PIPELINE_TIMEOUT_SECS)
    }

    pub fn validate(&self) -> AppResult<()> {
        if let Some(minutes) = self.refresh_buffer_minutes {
            if minutes < 0 {
                return Err(AppError::Config(
                    "refresh_buffer_minutes must not be negative".to_string(),
                ));
            }
        }

        check_window_days(self.window_days())
            .map_err(|err| AppError::Config(format!("window_days: {err}")))?;

        if let Some(url) = &self.scorer_url {
            url::Url::parse(url)
                .map_err(|err| AppError::Config(format!("invalid scorer_url `{url}`: {err}")))?;
        }

        Ok(())
    }
}

pub fn check_window_days(days: u32) -> AppResult<u32> {
    if days == 0 || days > MAX_WINDOW_DAYS {
        return Err(AppError::InvalidInput(format!(
            "window must be between 1 and {MAX_WINDOW_DAYS} days, got {days}"
        )));
    }
    Ok(days)
}

pub fn load(path: PathBuf) -> AppResult<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let raw = fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&raw)?;
    settings.validate()?;
    Ok(settings)
}
