//! The request-level entry point: credential check, fetch, compute, cache,
//! and insight recording, all under one deadline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, Offset, Utc};
use tracing::{info, warn};

use crate::analytics::insights::{InsightSink, derive_insights};
use crate::analytics::sentiment::{SentimentOptions, SentimentScorer};
use crate::analytics::topics::{self, TopicRule};
use crate::analytics::{
    AnalyticsDeps, AnalyticsInput, AnalyticsReport, ReportCache, compute_analytics,
};
use crate::auth::{CredentialKey, CredentialManager, CredentialStore, TokenRefresher, ValidAccessToken};
use crate::error::{AppError, AppResult};
use crate::mail::{RawCalendarEvent, RawMessage};

/// Raw records for one window, as delivered by a fetch collaborator.
#[derive(Debug, Clone, Default)]
pub struct FetchedBatch {
    pub messages: Vec<RawMessage>,
    pub events: Vec<RawCalendarEvent>,
}

/// Fetches a user's messages and events with a token the manager vouched for.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn fetch(&self, token: &ValidAccessToken, window_days: u32) -> AppResult<FetchedBatch>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CredentialFailurePolicy {
    /// Surface the credential error to the caller.
    #[default]
    Fail,
    /// Return an empty report flagged `unavailable` instead.
    Degrade,
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub timeout: Duration,
    pub sentiment: SentimentOptions,
    pub topics: Vec<TopicRule>,
    pub credential_policy: CredentialFailurePolicy,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            sentiment: SentimentOptions::default(),
            topics: topics::default_rules(),
            credential_policy: CredentialFailurePolicy::Fail,
        }
    }
}

pub struct AnalyticsService {
    scorer: Arc<dyn SentimentScorer>,
    cache: ReportCache,
    sink: Option<Arc<dyn InsightSink>>,
    options: ServiceOptions,
}

impl AnalyticsService {
    pub fn new(scorer: Arc<dyn SentimentScorer>, cache: ReportCache, options: ServiceOptions) -> Self {
        Self {
            scorer,
            cache,
            sink: None,
            options,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn InsightSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn cache(&self) -> &ReportCache {
        &self.cache
    }

    /// Full request: cached report if fresh, otherwise a valid token, a fetch
    /// and a computed report. Either completes within the deadline or fails.
    pub async fn report_for<S, R, M>(
        &self,
        credentials: &CredentialManager<S, R>,
        source: &M,
        key: &CredentialKey,
        window_days: u32,
        user_address: Option<String>,
    ) -> AppResult<AnalyticsReport>
    where
        S: CredentialStore,
        R: TokenRefresher,
        M: MessageSource + ?Sized,
    {
        if let Some(report) = self.cache.get(&key.user_id, window_days) {
            return Ok(report);
        }

        let work = async {
            let credential = credentials.load(key)?;
            let token = match credentials.ensure_valid_access_token(&credential).await {
                Ok(token) => token,
                Err(err) if err.is_credential_failure() => return self.on_credential_failure(err, window_days),
                Err(err) => return Err(err),
            };

            let batch = source.fetch(&token, window_days).await?;
            self.compute(&key.user_id, batch, window_days, user_address).await
        };

        let report = self.with_deadline(work).await?;
        self.cache.insert(&key.user_id, &report);
        Ok(report)
    }

    /// Computes a report from records the caller already has.
    pub async fn report_from_batch(
        &self,
        user_id: &str,
        batch: FetchedBatch,
        window_days: u32,
        user_address: Option<String>,
    ) -> AppResult<AnalyticsReport> {
        let report = self
            .with_deadline(self.compute(user_id, batch, window_days, user_address))
            .await?;
        self.cache.insert(user_id, &report);
        Ok(report)
    }

    async fn compute(
        &self,
        user_id: &str,
        batch: FetchedBatch,
        window_days: u32,
        user_address: Option<String>,
    ) -> AppResult<AnalyticsReport> {
        let input = AnalyticsInput::from_raw(batch.messages, batch.events, window_days)
            .with_user(user_address);
        let deps = AnalyticsDeps::new(self.scorer.as_ref(), &self.options.topics)
            .with_sentiment(self.options.sentiment);

        let report = compute_analytics(&input, &deps).await;

        if let Some(sink) = &self.sink {
            let insights = derive_insights(user_id, &report);
            if let Err(err) = sink.record(&insights).await {
                warn!(user = user_id, error = %err, "failed to record insights");
            }
        }

        Ok(report)
    }

    fn on_credential_failure(&self, err: AppError, window_days: u32) -> AppResult<AnalyticsReport> {
        match self.options.credential_policy {
            CredentialFailurePolicy::Fail => Err(err),
            CredentialFailurePolicy::Degrade => {
                warn!(error = %err, "credential unusable, returning unavailable report");
                Ok(AnalyticsReport::unavailable(
                    window_days,
                    Utc::now(),
                    Local::now().offset().fix(),
                ))
            }
        }
    }

    async fn with_deadline<F>(&self, work: F) -> AppResult<AnalyticsReport>
    where
        F: Future<Output = AppResult<AnalyticsReport>>,
    {
        let timeout = self.options.timeout;
        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                info!(timeout_secs = timeout.as_secs(), "analytics request timed out");
                Err(AppError::Timeout(timeout.as_secs()))
            }
        }
    }
}
