use crate::analytics::AnalyticsReport;
use crate::analytics::priority::PriorityItem;
use crate::error::AppResult;

pub fn print_line(line: &str) -> AppResult<()> {
    println!("{line}");
    Ok(())
}

pub fn render_report(report: &AnalyticsReport) -> String {
    let mut lines = vec![
        format!(
            "window: {} days from {} ({}, generated {})",
            report.window_days,
            report.series_start,
            data_source_label(report),
            report.generated_at.format("%Y-%m-%d %H:%M UTC"),
        ),
        format!(
            "messages: {} total, {} inbound, {} outbound, {} threads",
            report.total_messages, report.inbound, report.outbound, report.thread_count
        ),
    ];

    if report.malformed_messages > 0 {
        lines.push(format!("skipped: {} malformed records", report.malformed_messages));
    }

    lines.push(if report.latency.insufficient_data {
        "reply latency: insufficient data".to_string()
    } else {
        format!(
            "reply latency: {:.1} min average over {} replies",
            report.latency.average_minutes, report.latency.samples
        )
    });

    lines.push(format!(
        "daily: {}",
        report
            .daily_counts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    ));

    if let Some((hour, count)) = report
        .hourly_histogram
        .iter()
        .filter(|(_, count)| **count > 0)
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
    {
        lines.push(format!("busiest hour: {hour} ({count})"));
    }

    if !report.top_senders.is_empty() {
        lines.push("top senders:".to_string());
        for sender in &report.top_senders {
            lines.push(format!("  {} ({})", sender.address, sender.count));
        }
    }

    push_queue(&mut lines, "awaiting my reply", &report.awaiting_my_reply);
    push_queue(&mut lines, "awaiting their reply", &report.awaiting_their_reply);

    let sentiment = &report.sentiment;
    lines.push(if sentiment.all_unscored {
        format!("sentiment: unscored ({} messages could not be scored)", sentiment.unscored)
    } else {
        format!(
            "sentiment: {}% positive, {}% neutral, {}% negative, trend {} ({} scored, {} unscored)",
            sentiment.positive_pct,
            sentiment.neutral_pct,
            sentiment.negative_pct,
            serde_label(&sentiment.trend),
            sentiment.scored,
            sentiment.unscored,
        )
    });

    lines.push(format!(
        "channels: {} email, {} calendar ({} meetings, {} min)",
        report.channel_mix.email, report.channel_mix.calendar, report.meeting_count, report.meeting_minutes
    ));

    if !report.topics.is_empty() {
        lines.push(format!(
            "topics: {}",
            report
                .topics
                .iter()
                .map(|topic| format!("{} {}", topic.topic, topic.count))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    lines.join("\n")
}

fn push_queue(lines: &mut Vec<String>, title: &str, items: &[PriorityItem]) {
    if items.is_empty() {
        lines.push(format!("{title}: none"));
        return;
    }

    lines.push(format!("{title}:"));
    for item in items {
        let subject = if item.subject.trim().is_empty() {
            "(no subject)"
        } else {
            item.subject.as_str()
        };
        lines.push(format!(
            "  [{}] {} from {} at {}",
            serde_label(&item.priority),
            subject,
            item.from,
            item.last_message_at.format("%Y-%m-%d %H:%M")
        ));
    }
}

fn data_source_label(report: &AnalyticsReport) -> String {
    serde_label(&report.data_source)
}

/// The serialized name of a unit enum variant.
fn serde_label<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|value| value.as_str().map(ToOwned::to_owned))
        .unwrap_or_default()
}
