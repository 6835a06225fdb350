//! Sentiment rollup over a delegated per-message scorer.
//!
//! Scoring fans out to the scorer with a fixed concurrency limit and joins
//! before anything is aggregated. Each message ends up as exactly one
//! [`ScoreOutcome`]; failures are excluded from the percentages rather than
//! counted as neutral.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{AppError, AppResult};
use crate::mail::Message;

/// Scores between -0.1 and 0.1 inclusive are neutral.
pub const NEUTRAL_BAND: f64 = 0.1;

/// Maps text to a signed score in `[-1, 1]`.
#[async_trait]
pub trait SentimentScorer: Send + Sync {
    async fn score(&self, text: &str) -> AppResult<f64>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    Scored(f64),
    Failed(String),
    /// No text to score.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn for_score(score: f64) -> Self {
        if score > NEUTRAL_BAND {
            Self::Positive
        } else if score < -NEUTRAL_BAND {
            Self::Negative
        } else {
            Self::Neutral
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentDistribution {
    pub positive_pct: u32,
    pub neutral_pct: u32,
    pub negative_pct: u32,
    pub trend: SentimentLabel,
    pub average_score: f64,
    pub scored: usize,
    /// Everything not scored: empty text plus scorer failures.
    pub unscored: usize,
    pub failed: usize,
    /// True when nothing could be scored; the percentages are then a
    /// placeholder, not a measurement.
    pub all_unscored: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SentimentOptions {
    pub concurrency: usize,
    pub timeout: Duration,
}

impl Default for SentimentOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            timeout: Duration::from_secs(10),
        }
    }
}

pub async fn aggregate<S>(
    messages: &[Message],
    scorer: &S,
    options: &SentimentOptions,
) -> SentimentDistribution
where
    S: SentimentScorer + ?Sized,
{
    let outcomes = score_all(messages, scorer, options).await;
    summarize(&outcomes)
}

/// Runs the scorer over every message with at most `options.concurrency`
/// calls in flight. Outcomes come back in input order.
pub async fn score_all<S>(
    messages: &[Message],
    scorer: &S,
    options: &SentimentOptions,
) -> Vec<ScoreOutcome>
where
    S: SentimentScorer + ?Sized,
{
    let limit = options.concurrency.max(1);
    let timeout = options.timeout;

    stream::iter(messages.iter())
        .map(|message| async move {
            let text = message.combined_text();
            if text.is_empty() {
                return ScoreOutcome::Empty;
            }

            match tokio::time::timeout(timeout, scorer.score(&text)).await {
                Ok(Ok(score)) if score.is_finite() && (-1.0..=1.0).contains(&score) => {
                    ScoreOutcome::Scored(score)
                }
                Ok(Ok(score)) => {
                    warn!(id = %message.id, score, "scorer returned out-of-range score");
                    ScoreOutcome::Failed(format!("score {score} outside [-1, 1]"))
                }
                Ok(Err(err)) => {
                    warn!(id = %message.id, error = %err, "scorer failed");
                    ScoreOutcome::Failed(err.to_string())
                }
                Err(_) => {
                    warn!(id = %message.id, "scorer timed out");
                    ScoreOutcome::Failed(format!("timed out after {timeout:?}"))
                }
            }
        })
        .buffered(limit)
        .collect()
        .await
}

pub fn summarize(outcomes: &[ScoreOutcome]) -> SentimentDistribution {
    let mut counts = [0_usize; 3];
    let mut total_score = 0.0;
    let mut scored = 0;
    let mut failed = 0;
    let mut empty = 0;

    for outcome in outcomes {
        match outcome {
            ScoreOutcome::Scored(score) => {
                scored += 1;
                total_score += score;
                let slot = match SentimentLabel::for_score(*score) {
                    SentimentLabel::Positive => 0,
                    SentimentLabel::Neutral => 1,
                    SentimentLabel::Negative => 2,
                };
                counts[slot] += 1;
            }
            ScoreOutcome::Failed(_) => failed += 1,
            ScoreOutcome::Empty => empty += 1,
        }
    }

    let unscored = failed + empty;
    if scored == 0 {
        debug!(unscored, "no messages could be scored");
        return SentimentDistribution {
            positive_pct: 0,
            neutral_pct: 100,
            negative_pct: 0,
            trend: SentimentLabel::Neutral,
            average_score: 0.0,
            scored,
            unscored,
            failed,
            all_unscored: true,
        };
    }

    let average_score = total_score / scored as f64;
    let [positive_pct, neutral_pct, negative_pct] = percentages(counts, scored);

    SentimentDistribution {
        positive_pct,
        neutral_pct,
        negative_pct,
        trend: SentimentLabel::for_score(average_score),
        average_score,
        scored,
        unscored,
        failed,
        all_unscored: false,
    }
}

/// Whole percentages that always sum to 100, assigning the rounding
/// leftovers to the largest remainders.
fn percentages(counts: [usize; 3], total: usize) -> [u32; 3] {
    let mut result = [0_u32; 3];
    let mut remainders = [(0_usize, 0_usize); 3];

    for (index, count) in counts.iter().enumerate() {
        let scaled = count * 100;
        result[index] = (scaled / total) as u32;
        remainders[index] = (scaled % total, index);
    }

    let assigned: u32 = result.iter().sum();
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    for (_, index) in remainders.iter().take(100_u32.saturating_sub(assigned) as usize) {
        result[*index] += 1;
    }

    result
}

const POSITIVE_WORDS: &[&str] = &[
    "thanks", "thank", "great", "good", "excellent", "appreciate", "awesome", "happy",
    "glad", "love", "perfect", "congrats", "congratulations", "well done", "excited",
    "pleased", "helpful", "wonderful", "success", "nice",
];

const NEGATIVE_WORDS: &[&str] = &[
    "problem", "issue", "concern", "disappointed", "unfortunately", "delay", "delayed",
    "frustrated", "angry", "bad", "wrong", "fail", "failed", "failure", "broken",
    "complaint", "urgent", "blocked", "sorry", "escalate",
];

/// Word-list scorer used when no remote model is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexiconScorer;

impl LexiconScorer {
    pub fn score_text(text: &str) -> f64 {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|ch: char| !ch.is_alphanumeric() && ch != '\'')
            .filter(|word| !word.is_empty())
            .collect();

        let mut positive = 0_i32;
        let mut negative = 0_i32;
        for (index, word) in words.iter().enumerate() {
            let negated = index > 0 && matches!(words[index - 1], "not" | "no" | "never" | "don't");
            let polarity = if POSITIVE_WORDS.contains(word) {
                1
            } else if NEGATIVE_WORDS.contains(word) {
                -1
            } else {
                0
            };
            let polarity = if negated { -polarity } else { polarity };
            match polarity {
                1 => positive += 1,
                -1 => negative += 1,
                _ => {}
            }
        }

        for phrase in POSITIVE_WORDS.iter().filter(|word| word.contains(' ')) {
            positive += lowered.matches(phrase).count() as i32;
        }

        let hits = positive + negative;
        if hits == 0 {
            return 0.0;
        }
        f64::from(positive - negative) / f64::from(hits)
    }
}

#[async_trait]
impl SentimentScorer for LexiconScorer {
    async fn score(&self, text: &str) -> AppResult<f64> {
        Ok(Self::score_text(text))
    }
}

/// Posts `{ "text": ... }` to a remote model and reads `{ "score": f64 }`.
#[derive(Debug, Clone)]
pub struct HttpScorer {
    http: reqwest::Client,
    endpoint: Url,
}

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: f64,
}

impl HttpScorer {
    pub fn new(endpoint: &str) -> AppResult<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: Url::parse(endpoint)?,
        })
    }
}

#[async_trait]
impl SentimentScorer for HttpScorer {
    async fn score(&self, text: &str) -> AppResult<f64> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&ScoreRequest { text })
            .send()
            .await
            .map_err(|err| AppError::ScorerUnavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::ScorerUnavailable(format!(
                "scorer returned {status}"
            )));
        }

        let payload: ScoreResponse = response
            .json()
            .await
            .map_err(|err| AppError::ScorerUnavailable(err.to_string()))?;
        Ok(payload.score)
    }
}
