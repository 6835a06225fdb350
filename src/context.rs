use std::sync::Arc;
use std::time::Duration;

use crate::analytics::ReportCache;
use crate::analytics::sentiment::{HttpScorer, LexiconScorer, SentimentOptions, SentimentScorer};
use crate::analytics::topics;
use crate::auth::{CredentialKey, CredentialManager, FileCredentialStore, OAuthRefresher};
use crate::config::{self, AppPaths, Settings};
use crate::error::AppResult;
use crate::output::Output;
use crate::service::{AnalyticsService, ServiceOptions};

pub type ProfileCredentials = CredentialManager<FileCredentialStore, OAuthRefresher>;

pub struct AppContext {
    pub profile: String,
    pub paths: AppPaths,
    pub settings: Settings,
    pub credentials: ProfileCredentials,
    pub output: Output,
}

impl AppContext {
    pub fn bootstrap(profile: String, json: bool) -> AppResult<Self> {
        let profile = config::resolve_profile(&profile);
        let paths = AppPaths::discover()?;
        Self::with_paths(profile, json, paths)
    }

    pub fn with_paths(profile: String, json: bool, paths: AppPaths) -> AppResult<Self> {
        let settings = config::load_settings(&paths, &profile)?;
        let store = FileCredentialStore::new(paths.credentials_dir(&profile));
        let credentials = CredentialManager::new(store, OAuthRefresher::from_settings(&settings)?)
            .with_buffer_minutes(settings.refresh_buffer_minutes());
        let output = Output::new(json);

        Ok(Self {
            profile,
            paths,
            settings,
            credentials,
            output,
        })
    }

    /// The profile's credential is keyed by the configured address, falling
    /// back to the profile name.
    pub fn credential_key(&self) -> CredentialKey {
        let user_id = self
            .settings
            .user_address
            .clone()
            .unwrap_or_else(|| self.profile.clone());
        CredentialKey::new(user_id, self.settings.provider())
    }

    pub fn scorer(&self) -> AppResult<Arc<dyn SentimentScorer>> {
        Ok(match self.settings.scorer_url.as_deref() {
            Some(url) => Arc::new(HttpScorer::new(url)?),
            None => Arc::new(LexiconScorer),
        })
    }

    pub fn analytics_service(&self) -> AppResult<AnalyticsService> {
        let options = ServiceOptions {
            timeout: Duration::from_secs(self.settings.pipeline_timeout_secs()),
            sentiment: SentimentOptions {
                concurrency: self.settings.scorer_concurrency(),
                timeout: Duration::from_secs(self.settings.scorer_timeout_secs()),
            },
            topics: self
                .settings
                .topics
                .clone()
                .unwrap_or_else(topics::default_rules),
            ..ServiceOptions::default()
        };
        let cache = ReportCache::new(Duration::from_secs(self.settings.report_cache_ttl_secs()));

        Ok(AnalyticsService::new(self.scorer()?, cache, options))
    }
}
