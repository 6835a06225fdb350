use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Timelike, Utc};
use serde::Serialize;

use crate::mail::{CalendarEvent, Message};

pub const TOP_SENDERS_LIMIT: usize = 5;

/// The reporting window: `days` calendar days ending with `today`. Hours
/// are bucketed in `offset`; days in the offset each item was stamped with,
/// falling back to `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub days: u32,
    pub today: NaiveDate,
    pub offset: FixedOffset,
}

impl Window {
    pub fn new(days: u32, today: NaiveDate, offset: FixedOffset) -> Self {
        Self {
            days: days.max(1),
            today,
            offset,
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        self.today - Duration::days(i64::from(self.days) - 1)
    }

    fn slot(&self, instant: DateTime<Utc>, stated: Option<FixedOffset>) -> Option<(usize, u32)> {
        let day = instant
            .with_timezone(&stated.unwrap_or(self.offset))
            .date_naive();
        let index = (day - self.first_day()).num_days();
        if index < 0 || index >= i64::from(self.days) {
            return None;
        }
        Some((index as usize, instant.with_timezone(&self.offset).hour()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenderCount {
    pub address: String,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelMix {
    pub email: usize,
    pub calendar: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeries {
    pub series_start: NaiveDate,
    /// One entry per window day, oldest first; the last entry is today.
    pub daily_counts: Vec<usize>,
    /// Keyed `HH:00`, all 24 hours present.
    pub hourly_histogram: BTreeMap<String, usize>,
    pub top_senders: Vec<SenderCount>,
    pub channel_mix: ChannelMix,
    pub meeting_count: usize,
    pub meeting_minutes: i64,
}

pub fn aggregate(messages: &[Message], events: &[CalendarEvent], window: &Window) -> TimeSeries {
    let mut daily_counts = vec![0_usize; window.days as usize];
    let mut hourly = [0_usize; 24];

    let stamps = messages
        .iter()
        .map(|message| (message.timestamp, message.offset))
        .chain(events.iter().map(|event| (event.start, event.offset)));
    for (instant, stated) in stamps {
        if let Some((day, hour)) = window.slot(instant, stated) {
            daily_counts[day] += 1;
            hourly[hour as usize] += 1;
        }
    }

    let hourly_histogram = hourly
        .iter()
        .enumerate()
        .map(|(hour, count)| (format!("{hour:02}:00"), *count))
        .collect();

    TimeSeries {
        series_start: window.first_day(),
        daily_counts,
        hourly_histogram,
        top_senders: top_senders(messages, TOP_SENDERS_LIMIT),
        channel_mix: ChannelMix {
            email: messages.len(),
            calendar: events.len(),
        },
        meeting_count: events.len(),
        meeting_minutes: events.iter().map(CalendarEvent::duration_minutes).sum(),
    }
}

/// Most frequent sender addresses, ties in first-seen order.
pub fn top_senders(messages: &[Message], limit: usize) -> Vec<SenderCount> {
    let mut tally: Vec<SenderCount> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for address in messages.iter().filter_map(Message::sender_address) {
        match index.get(&address) {
            Some(&slot) => tally[slot].count += 1,
            None => {
                index.insert(address.clone(), tally.len());
                tally.push(SenderCount { address, count: 1 });
            }
        }
    }

    tally.sort_by(|a, b| b.count.cmp(&a.count));
    tally.truncate(limit);
    tally
}
