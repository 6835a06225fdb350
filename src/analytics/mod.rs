pub mod cache;
pub mod insights;
pub mod priority;
pub mod sentiment;
pub mod threads;
pub mod timeseries;
pub mod topics;

use std::borrow::Cow;
use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, Offset, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::mail::{self, CalendarEvent, Message, RawCalendarEvent, RawMessage};

use priority::{LatencySummary, PriorityItem};
use sentiment::{SentimentDistribution, SentimentOptions, SentimentScorer};
use timeseries::{ChannelMix, SenderCount, Window};
use topics::{TopicCount, TopicRule};

pub use cache::ReportCache;
pub use insights::{AnalyticsInsight, InsightSink, MemoryInsightSink, derive_insights};

/// Everything one report is computed from.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsInput {
    pub messages: Vec<Message>,
    pub events: Vec<CalendarEvent>,
    pub window_days: u32,
    pub user_address: Option<String>,
    /// Records dropped during ingestion, carried onto the report.
    pub malformed_messages: usize,
}

impl AnalyticsInput {
    pub fn new(messages: Vec<Message>, events: Vec<CalendarEvent>, window_days: u32) -> Self {
        Self {
            messages,
            events,
            window_days,
            ..Self::default()
        }
    }

    /// Builds input from fetched records, converting at the boundary and
    /// counting what had to be dropped. Whole-day events resolve against the
    /// local zone.
    pub fn from_raw(
        messages: Vec<RawMessage>,
        events: Vec<RawCalendarEvent>,
        window_days: u32,
    ) -> Self {
        let (messages, malformed_messages) = mail::message::ingest(messages);
        let (events, malformed_events) = mail::event::ingest_events(events, &Local);

        Self {
            messages,
            events,
            window_days,
            user_address: None,
            malformed_messages: malformed_messages + malformed_events,
        }
    }

    pub fn with_user(mut self, user_address: Option<String>) -> Self {
        self.user_address = user_address;
        self
    }
}

/// Collaborators and knobs for one computation.
pub struct AnalyticsDeps<'a> {
    pub scorer: &'a dyn SentimentScorer,
    pub sentiment: SentimentOptions,
    pub topics: &'a [TopicRule],
    pub now: DateTime<Utc>,
    /// Zone used for day and hour buckets.
    pub offset: FixedOffset,
}

impl<'a> AnalyticsDeps<'a> {
    pub fn new(scorer: &'a dyn SentimentScorer, topics: &'a [TopicRule]) -> Self {
        Self {
            scorer,
            sentiment: SentimentOptions::default(),
            topics,
            now: Utc::now(),
            offset: Local::now().offset().fix(),
        }
    }

    pub fn with_sentiment(mut self, options: SentimentOptions) -> Self {
        self.sentiment = options;
        self
    }

    pub fn at(mut self, now: DateTime<Utc>, offset: FixedOffset) -> Self {
        self.now = now;
        self.offset = offset;
        self
    }

    fn window(&self, days: u32) -> Window {
        let today = self.now.with_timezone(&self.offset).date_naive();
        Window::new(days, today, self.offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Live,
    Cached,
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub window_days: u32,
    pub generated_at: DateTime<Utc>,
    pub data_source: DataSource,
    pub total_messages: usize,
    pub inbound: usize,
    pub outbound: usize,
    pub thread_count: usize,
    pub malformed_messages: usize,
    pub average_reply_latency_minutes: f64,
    pub latency: LatencySummary,
    pub series_start: NaiveDate,
    pub daily_counts: Vec<usize>,
    pub hourly_histogram: BTreeMap<String, usize>,
    pub top_senders: Vec<SenderCount>,
    pub awaiting_my_reply: Vec<PriorityItem>,
    pub awaiting_their_reply: Vec<PriorityItem>,
    pub sentiment: SentimentDistribution,
    pub channel_mix: ChannelMix,
    pub meeting_count: usize,
    pub meeting_minutes: i64,
    pub topics: Vec<TopicCount>,
}

impl AnalyticsReport {
    /// An empty report for when the data could not be fetched. The shape
    /// matches a live report so consumers need no special casing beyond
    /// `data_source`.
    pub fn unavailable(window_days: u32, now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let window = Window::new(window_days, now.with_timezone(&offset).date_naive(), offset);
        let series = timeseries::aggregate(&[], &[], &window);
        let latency = priority::Classification::default().latency_summary();

        Self {
            window_days: window.days,
            generated_at: now,
            data_source: DataSource::Unavailable,
            total_messages: 0,
            inbound: 0,
            outbound: 0,
            thread_count: 0,
            malformed_messages: 0,
            average_reply_latency_minutes: latency.average_minutes,
            latency,
            series_start: series.series_start,
            daily_counts: series.daily_counts,
            hourly_histogram: series.hourly_histogram,
            top_senders: Vec::new(),
            awaiting_my_reply: Vec::new(),
            awaiting_their_reply: Vec::new(),
            sentiment: sentiment::summarize(&[]),
            channel_mix: series.channel_mix,
            meeting_count: 0,
            meeting_minutes: 0,
            topics: Vec::new(),
        }
    }
}

/// Messages every aggregator may see. Ones without an id are left out of
/// all of them, not just threading.
fn usable_messages(messages: &[Message]) -> Cow<'_, [Message]> {
    if messages.iter().all(Message::has_id) {
        return Cow::Borrowed(messages);
    }
    let usable: Vec<Message> = messages.iter().filter(|m| m.has_id()).cloned().collect();
    warn!(
        dropped = messages.len() - usable.len(),
        "dropping messages without id"
    );
    Cow::Owned(usable)
}

/// Runs every aggregator over the same input and assembles the report.
/// Per-item problems end up as counters; nothing here fails the request.
pub async fn compute_analytics(input: &AnalyticsInput, deps: &AnalyticsDeps<'_>) -> AnalyticsReport {
    let user = input.user_address.as_deref();
    let window = deps.window(input.window_days);
    let messages = usable_messages(&input.messages);
    let dropped = input.messages.len() - messages.len();

    let threads = threads::group_into_threads(&messages);
    let classification = priority::classify(&threads, user);
    let latency = classification.latency_summary();
    let series = timeseries::aggregate(&messages, &input.events, &window);
    let topics = topics::tally(&messages, deps.topics);

    debug!(
        messages = messages.len(),
        events = input.events.len(),
        threads = threads.len(),
        "scoring sentiment"
    );
    let sentiment = sentiment::aggregate(&messages, deps.scorer, &deps.sentiment).await;

    let outbound = messages
        .iter()
        .filter(|message| message.is_from(user))
        .count();

    let report = AnalyticsReport {
        window_days: window.days,
        generated_at: deps.now,
        data_source: DataSource::Live,
        total_messages: messages.len(),
        inbound: messages.len() - outbound,
        outbound,
        thread_count: threads.len(),
        malformed_messages: input.malformed_messages + dropped,
        average_reply_latency_minutes: latency.average_minutes,
        latency,
        series_start: series.series_start,
        daily_counts: series.daily_counts,
        hourly_histogram: series.hourly_histogram,
        top_senders: series.top_senders,
        awaiting_my_reply: classification.awaiting_my_reply,
        awaiting_their_reply: classification.awaiting_their_reply,
        sentiment,
        channel_mix: series.channel_mix,
        meeting_count: series.meeting_count,
        meeting_minutes: series.meeting_minutes,
        topics,
    };

    info!(
        messages = report.total_messages,
        threads = report.thread_count,
        malformed = report.malformed_messages,
        unscored = report.sentiment.unscored,
        "analytics report computed"
    );
    report
}
