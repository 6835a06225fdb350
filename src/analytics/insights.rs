//! Derived insight records written alongside a report.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::error::{AppError, AppResult};

use super::AnalyticsReport;

pub const DECISION_VELOCITY: &str = "decision_velocity";
pub const RELATIONSHIP_HEALTH: &str = "relationship_health";
pub const STRATEGIC_VS_REACTIVE: &str = "strategic_vs_reactive";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsInsight {
    pub user_id: String,
    pub insight_type: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Where derived insights are persisted. The core only writes.
#[async_trait]
pub trait InsightSink: Send + Sync {
    async fn record(&self, insights: &[AnalyticsInsight]) -> AppResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryInsightSink {
    rows: Mutex<Vec<AnalyticsInsight>>,
}

impl MemoryInsightSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<AnalyticsInsight> {
        self.rows
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl InsightSink for MemoryInsightSink {
    async fn record(&self, insights: &[AnalyticsInsight]) -> AppResult<()> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| AppError::InvalidInput("insight sink lock poisoned".to_string()))?;
        rows.extend_from_slice(insights);
        Ok(())
    }
}

/// One insight per category. Reports flagged unavailable yield nothing.
pub fn derive_insights(user_id: &str, report: &AnalyticsReport) -> Vec<AnalyticsInsight> {
    if report.data_source == super::DataSource::Unavailable {
        return Vec::new();
    }

    let row = |insight_type: &str, value: serde_json::Value| AnalyticsInsight {
        user_id: user_id.to_string(),
        insight_type: insight_type.to_string(),
        value,
        created_at: report.generated_at,
    };

    vec![
        row(DECISION_VELOCITY, decision_velocity(report)),
        row(RELATIONSHIP_HEALTH, relationship_health(report)),
        row(STRATEGIC_VS_REACTIVE, strategic_vs_reactive(report)),
    ]
}

fn decision_velocity(report: &AnalyticsReport) -> serde_json::Value {
    let latency = &report.latency;
    let rating = if latency.insufficient_data {
        "unknown"
    } else if latency.average_minutes <= 60.0 {
        "fast"
    } else if latency.average_minutes <= 24.0 * 60.0 {
        "steady"
    } else {
        "slow"
    };

    json!({
        "averageReplyMinutes": latency.average_minutes,
        "samples": latency.samples,
        "insufficientData": latency.insufficient_data,
        "rating": rating,
    })
}

fn relationship_health(report: &AnalyticsReport) -> serde_json::Value {
    let pending = report.awaiting_my_reply.len();
    let contacts: Vec<&str> = report
        .top_senders
        .iter()
        .map(|sender| sender.address.as_str())
        .collect();
    let response_ratio = if report.inbound == 0 {
        0.0
    } else {
        report.outbound as f64 / report.inbound as f64
    };

    json!({
        "responseRatio": response_ratio,
        "pendingReplies": pending,
        "awaitingOthers": report.awaiting_their_reply.len(),
        "sentimentTrend": report.sentiment.trend,
        "topContacts": contacts,
    })
}

/// Planned work (meetings and planning threads) against inbound demand.
fn strategic_vs_reactive(report: &AnalyticsReport) -> serde_json::Value {
    let planning = report
        .topics
        .iter()
        .find(|topic| topic.topic == "planning")
        .map_or(0, |topic| topic.count);
    let strategic = report.meeting_count + planning;
    let reactive = report.inbound;
    let total = strategic + reactive;
    let strategic_pct = if total == 0 {
        0.0
    } else {
        (strategic as f64 / total as f64 * 100.0).round()
    };

    json!({
        "strategic": strategic,
        "reactive": reactive,
        "strategicPct": strategic_pct,
    })
}

#[cfg(test)]
mod tests {
    use chrono::FixedOffset;

    use super::*;
    use crate::analytics::DataSource;
    use crate::analytics::topics::TopicCount;

    fn report() -> AnalyticsReport {
        let mut report = AnalyticsReport::unavailable(7, Utc::now(), FixedOffset::east_opt(0).unwrap());
        report.data_source = DataSource::Live;
        report
    }

    #[test]
    fn derives_one_row_per_category() {
        let mut report = report();
        report.inbound = 6;
        report.outbound = 3;
        report.meeting_count = 2;
        report.topics = vec![TopicCount {
            topic: "planning".to_string(),
            count: 2,
        }];

        let insights = derive_insights("me@co.com", &report);
        let types: Vec<_> = insights.iter().map(|i| i.insight_type.as_str()).collect();
        assert_eq!(types, [DECISION_VELOCITY, RELATIONSHIP_HEALTH, STRATEGIC_VS_REACTIVE]);

        assert_eq!(insights[0].value["rating"], "unknown");
        assert_eq!(insights[1].value["responseRatio"], 0.5);
        assert_eq!(insights[2].value["strategic"], 4);
        assert_eq!(insights[2].value["strategicPct"], 40.0);
        assert!(insights.iter().all(|i| i.created_at == report.generated_at));
    }

    #[test]
    fn unavailable_reports_produce_no_insights() {
        let mut report = report();
        report.data_source = DataSource::Unavailable;
        assert!(derive_insights("me@co.com", &report).is_empty());
    }

    #[tokio::test]
    async fn memory_sink_appends() {
        let sink = MemoryInsightSink::new();
        sink.record(&derive_insights("u", &report())).await.expect("record");
        sink.record(&derive_insights("u", &report())).await.expect("record");
        assert_eq!(sink.rows().len(), 6);
    }
}
