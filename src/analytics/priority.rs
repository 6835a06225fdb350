//! Reply latency measurement and the two "who owes a reply" queues.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::mail::Message;

use super::threads::{Thread, ThreadSet};

pub const URGENCY_KEYWORDS: [&str; 4] = ["urgent", "asap", "important", "priority"];
/// Samples above 30 days are resumed stale threads, not reply behavior.
pub const MAX_LATENCY_MINUTES: f64 = 43_200.0;
pub const QUEUE_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityItem {
    pub thread_id: String,
    pub message_id: String,
    pub subject: String,
    pub snippet: String,
    pub from: String,
    pub last_message_at: DateTime<Utc>,
    pub message_count: usize,
    pub priority: Priority,
    pub is_urgent: bool,
    pub is_question: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub reply_latencies_minutes: Vec<f64>,
    pub awaiting_my_reply: Vec<PriorityItem>,
    pub awaiting_their_reply: Vec<PriorityItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    pub average_minutes: f64,
    pub samples: usize,
    /// Set when there were no samples, so a zero average is not mistaken
    /// for instant replies.
    pub insufficient_data: bool,
}

impl Classification {
    pub fn latency_summary(&self) -> LatencySummary {
        let samples = self.reply_latencies_minutes.len();
        if samples == 0 {
            return LatencySummary {
                average_minutes: 0.0,
                samples,
                insufficient_data: true,
            };
        }

        let total: f64 = self.reply_latencies_minutes.iter().sum();
        LatencySummary {
            average_minutes: total / samples as f64,
            samples,
            insufficient_data: false,
        }
    }
}

pub fn classify(threads: &ThreadSet, user_address: Option<&str>) -> Classification {
    let mut result = Classification::default();

    for thread in threads.iter() {
        result
            .reply_latencies_minutes
            .extend(reply_latencies(thread, user_address));

        match classify_thread(thread, user_address) {
            Some((Queue::AwaitingMine, item)) => result.awaiting_my_reply.push(item),
            Some((Queue::AwaitingTheirs, item)) => result.awaiting_their_reply.push(item),
            None => {}
        }
    }

    truncate_by_recency(&mut result.awaiting_my_reply);
    truncate_by_recency(&mut result.awaiting_their_reply);
    result
}

/// Incoming message starts the clock, the user's next message stops it.
pub fn reply_latencies(thread: &Thread, user_address: Option<&str>) -> Vec<f64> {
    let mut samples = Vec::new();
    let mut last_incoming: Option<DateTime<Utc>> = None;

    for message in &thread.messages {
        if !message.is_from(user_address) {
            last_incoming = Some(message.timestamp);
            continue;
        }

        if let Some(incoming) = last_incoming.take() {
            let minutes = (message.timestamp - incoming).num_seconds() as f64 / 60.0;
            if minutes > 0.0 && minutes <= MAX_LATENCY_MINUTES {
                samples.push(minutes);
            }
        }
    }

    samples
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Queue {
    AwaitingMine,
    AwaitingTheirs,
}

fn classify_thread(thread: &Thread, user_address: Option<&str>) -> Option<(Queue, PriorityItem)> {
    let last = thread.last_message()?;
    let is_urgent = is_urgent(last);
    let is_question = is_question(last);

    let (queue, priority) = if !last.is_from(user_address) {
        if !is_urgent && !is_question {
            return None;
        }
        let priority = if is_urgent {
            Priority::High
        } else {
            Priority::Medium
        };
        (Queue::AwaitingMine, priority)
    } else if is_question {
        (Queue::AwaitingTheirs, Priority::Medium)
    } else {
        return None;
    };

    Some((
        queue,
        PriorityItem {
            thread_id: thread.id.clone(),
            message_id: last.id.clone(),
            subject: last.subject.clone(),
            snippet: last.snippet.clone(),
            from: last.from.clone(),
            last_message_at: last.timestamp,
            message_count: thread.len(),
            priority,
            is_urgent,
            is_question,
        },
    ))
}

pub fn is_urgent(message: &Message) -> bool {
    let headline = message.headline().to_lowercase();
    URGENCY_KEYWORDS
        .iter()
        .any(|keyword| headline.contains(keyword))
}

pub fn is_question(message: &Message) -> bool {
    message.subject.contains('?') || message.snippet.contains('?')
}

fn truncate_by_recency(items: &mut Vec<PriorityItem>) {
    items.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
    items.truncate(QUEUE_LIMIT);
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::analytics::threads::group_into_threads;

    const ME: &str = "me@co.com";

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn single_exchange_yields_exact_sample() {
        let messages = vec![
            Message::new("1", Some("t"), at(0), "them@co.com"),
            Message::new("2", Some("t"), at(30), "Me <me@co.com>"),
        ];
        let result = classify(&group_into_threads(&messages), Some(ME));
        assert_eq!(result.reply_latencies_minutes, [30.0]);
    }

    #[test]
    fn out_of_range_samples_are_discarded() {
        let messages = vec![
            Message::new("1", Some("stale"), at(0), "them@co.com"),
            Message::new("2", Some("stale"), at(43_201), ME),
            Message::new("3", Some("same"), at(5), "them@co.com"),
            Message::new("4", Some("same"), at(5), ME),
        ];
        let result = classify(&group_into_threads(&messages), Some(ME));
        assert!(result.reply_latencies_minutes.is_empty());

        let summary = result.latency_summary();
        assert_eq!(summary.average_minutes, 0.0);
        assert!(summary.insufficient_data);
    }

    #[test]
    fn only_first_reply_after_incoming_counts() {
        let messages = vec![
            Message::new("1", Some("t"), at(0), "them@co.com"),
            Message::new("2", Some("t"), at(10), ME),
            Message::new("3", Some("t"), at(20), ME),
        ];
        let result = classify(&group_into_threads(&messages), Some(ME));
        assert_eq!(result.reply_latencies_minutes, [10.0]);
    }

    #[test]
    fn urgent_incoming_is_high_priority() {
        let messages = vec![
            Message::new("1", Some("t"), at(0), "them@co.com").with_subject("URGENT: contract"),
        ];
        let result = classify(&group_into_threads(&messages), Some(ME));
        assert_eq!(result.awaiting_my_reply.len(), 1);
        assert_eq!(result.awaiting_my_reply[0].priority, Priority::High);
        assert!(result.awaiting_their_reply.is_empty());
    }

    #[test]
    fn my_open_question_awaits_their_reply() {
        let messages = vec![
            Message::new("1", Some("t"), at(0), "them@co.com").with_subject("Update"),
            Message::new("2", Some("t"), at(5), ME).with_snippet("Can you confirm?"),
        ];
        let result = classify(&group_into_threads(&messages), Some(ME));
        assert!(result.awaiting_my_reply.is_empty());
        assert_eq!(result.awaiting_their_reply.len(), 1);
        assert_eq!(result.awaiting_their_reply[0].priority, Priority::Medium);
    }

    #[test]
    fn plain_threads_are_not_surfaced() {
        let messages = vec![
            Message::new("1", Some("a"), at(0), "them@co.com").with_subject("FYI"),
            Message::new("2", Some("b"), at(0), ME).with_subject("Notes"),
        ];
        let result = classify(&group_into_threads(&messages), Some(ME));
        assert!(result.awaiting_my_reply.is_empty());
        assert!(result.awaiting_their_reply.is_empty());
    }

    #[test]
    fn queues_are_capped_and_most_recent_first() {
        let messages: Vec<_> = (0..8)
            .map(|i| {
                Message::new(format!("m{i}"), Some(format!("t{i}").as_str()), at(i), "them@co.com")
                    .with_subject("Quick question?")
            })
            .collect();
        let result = classify(&group_into_threads(&messages), Some(ME));

        assert_eq!(result.awaiting_my_reply.len(), QUEUE_LIMIT);
        let ids: Vec<_> = result
            .awaiting_my_reply
            .iter()
            .map(|item| item.thread_id.as_str())
            .collect();
        assert_eq!(ids, ["t7", "t6", "t5", "t4", "t3"]);
    }
}
