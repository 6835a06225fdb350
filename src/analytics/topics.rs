use serde::{Deserialize, Serialize};

use crate::mail::Message;

/// A named topic and the keywords that mark a message as belonging to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRule {
    pub name: String,
    pub keywords: Vec<String>,
}

impl TopicRule {
    pub fn new(name: &str, keywords: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|kw| kw.to_lowercase()).collect(),
        }
    }

    fn matches(&self, lowered_text: &str) -> bool {
        self.keywords
            .iter()
            .any(|keyword| !keyword.is_empty() && lowered_text.contains(&keyword.to_lowercase()))
    }
}

pub fn default_rules() -> Vec<TopicRule> {
    vec![
        TopicRule::new("planning", &["roadmap", "plan", "strategy"]),
        TopicRule::new("meetings", &["meeting", "call", "sync"]),
        TopicRule::new("finance", &["invoice", "budget", "payment"]),
        TopicRule::new("hiring", &["interview", "candidate", "offer"]),
        TopicRule::new("support", &["issue", "bug", "ticket"]),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicCount {
    pub topic: String,
    pub count: usize,
}

/// Messages per topic. A message counts once per topic it matches and may
/// match several. Topics nobody mentioned are left out; the rest are ordered
/// by count, ties in table order.
pub fn tally(messages: &[Message], rules: &[TopicRule]) -> Vec<TopicCount> {
    let texts: Vec<String> = messages
        .iter()
        .map(|message| message.combined_text().to_lowercase())
        .collect();

    let mut counts: Vec<TopicCount> = rules
        .iter()
        .map(|rule| TopicCount {
            topic: rule.name.clone(),
            count: texts.iter().filter(|text| rule.matches(text)).count(),
        })
        .filter(|entry| entry.count > 0)
        .collect();

    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts
}
