//! Best-effort plain text from a provider's multi-part message payload.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub headers: Vec<PartHeader>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartBody {
    #[serde(default)]
    pub data: Option<String>,
}

impl MessagePart {
    pub fn header(&self, target: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(target))
            .map(|header| header.value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn is(&self, mime: &str) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|value| value.eq_ignore_ascii_case(mime))
    }

    fn decoded_body(&self) -> Option<String> {
        let data = self.body.as_ref()?.data.as_deref()?;
        decode_body_data(data)
    }
}

/// Prefers the first `text/plain` part; falls back to the first `text/html`
/// part with markup stripped.
pub fn extract_plain_text(root: &MessagePart) -> Option<String> {
    if let Some(text) = find_part(root, "text/plain").and_then(MessagePart::decoded_body) {
        let text = collapse_whitespace(&text);
        if !text.is_empty() {
            return Some(text);
        }
    }

    let html = find_part(root, "text/html").and_then(MessagePart::decoded_body)?;
    let text = strip_html(&html);
    (!text.is_empty()).then_some(text)
}

fn find_part<'a>(part: &'a MessagePart, mime: &str) -> Option<&'a MessagePart> {
    if part.is(mime) && part.decoded_body().is_some() {
        return Some(part);
    }

    part.parts.iter().find_map(|child| find_part(child, mime))
}

fn decode_body_data(data: &str) -> Option<String> {
    let normalized: String = data
        .trim()
        .trim_end_matches('=')
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .map(|ch| match ch {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    let bytes = URL_SAFE_NO_PAD.decode(normalized).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut skip_until: Option<&str> = None;
    let lower = html.to_ascii_lowercase();
    let mut index = 0;

    while index < html.len() {
        if let Some(end_tag) = skip_until {
            match lower[index..].find(end_tag) {
                Some(offset) => {
                    index += offset + end_tag.len();
                    skip_until = None;
                    out.push(' ');
                    continue;
                }
                None => break,
            }
        }

        let Some(ch) = html[index..].chars().next() else {
            break;
        };

        if !in_tag && ch == '<' {
            if lower[index..].starts_with("<script") {
                skip_until = Some("</script>");
                continue;
            }
            if lower[index..].starts_with("<style") {
                skip_until = Some("</style>");
                continue;
            }
            in_tag = true;
        } else if in_tag && ch == '>' {
            in_tag = false;
            out.push(' ');
        } else if !in_tag {
            out.push(ch);
        }

        index += ch.len_utf8();
    }

    let decoded = html_escape::decode_html_entities(&out).to_string();
    collapse_whitespace(&decoded)
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(text: &str) -> Option<PartBody> {
        Some(PartBody {
            data: Some(URL_SAFE_NO_PAD.encode(text.as_bytes())),
        })
    }

    fn part(mime: &str, text: &str) -> MessagePart {
        MessagePart {
            mime_type: Some(mime.to_string()),
            body: encoded(text),
            ..MessagePart::default()
        }
    }

    #[test]
    fn prefers_plain_text_in_multipart() {
        let root = MessagePart {
            mime_type: Some("multipart/alternative".to_string()),
            parts: vec![
                part("text/html", "<p>Hello <b>html</b></p>"),
                part("text/plain", "Hello\r\n  plain"),
            ],
            ..MessagePart::default()
        };

        assert_eq!(extract_plain_text(&root).as_deref(), Some("Hello plain"));
    }

    #[test]
    fn falls_back_to_stripped_html() {
        let root = MessagePart {
            mime_type: Some("multipart/mixed".to_string()),
            parts: vec![MessagePart {
                mime_type: Some("multipart/alternative".to_string()),
                parts: vec![part(
                    "text/html",
                    "<style>p{color:red}</style><p>Q3 plan &amp; budget</p>",
                )],
                ..MessagePart::default()
            }],
            ..MessagePart::default()
        };

        assert_eq!(
            extract_plain_text(&root).as_deref(),
            Some("Q3 plan & budget")
        );
    }

    #[test]
    fn undecodable_body_yields_none() {
        let root = MessagePart {
            mime_type: Some("text/plain".to_string()),
            body: Some(PartBody {
                data: Some("***".to_string()),
            }),
            ..MessagePart::default()
        };
        assert!(extract_plain_text(&root).is_none());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let root = MessagePart {
            headers: vec![PartHeader {
                name: "sUbJeCt".to_string(),
                value: "case test".to_string(),
            }],
            ..MessagePart::default()
        };

        assert_eq!(root.header("Subject").as_deref(), Some("case test"));
    }
}
