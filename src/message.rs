//! Captured message record and the pure helpers that derive its metadata

use std::collections::BTreeMap;

use chrono::Utc;
use rand::Rng;
use serde::{Serialize, Serializer};

/// Subject used when the body carries no `Subject:` line
pub const NO_SUBJECT: &str = "(no subject)";

/// Length of generated message identifiers
pub const ID_LENGTH: usize = 8;

/// Alphabet generated message identifiers are drawn from
pub const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Headers copied into [`Message::headers`] for the display layer
const SUPPLEMENTARY_HEADERS: &[&str] = &["Content-Type"];

/// HTTP-date layout, e.g. `Mon, 02 Jan 2006 15:04:05 GMT`
const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// A message captured by the SMTP listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Short identifier assigned at commit time
    pub id: String,

    /// Envelope sender as presented by the client
    pub from: String,

    /// Envelope recipient (the last `RCPT TO` of the transaction)
    pub to: String,

    /// Subject derived from the body
    pub subject: String,

    /// Raw message content, headers included
    #[serde(serialize_with = "serialize_body")]
    pub body: Vec<u8>,

    /// Capture timestamp as an HTTP-date
    pub date: String,

    /// Supplementary headers for display (currently Content-Type only)
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl Message {
    /// Build a message from a completed transaction.
    ///
    /// Assigns a fresh identifier and timestamp and derives the subject and
    /// supplementary headers from `body`.
    pub fn capture(from: String, to: String, body: Vec<u8>) -> Self {
        let (subject, headers) = {
            let text = String::from_utf8_lossy(&body);
            (extract_subject(&text), supplementary_headers(&text))
        };

        Self {
            id: generate_id(),
            from,
            to,
            subject,
            body,
            date: capture_date(),
            headers,
        }
    }

    /// Size of the raw body in bytes
    pub fn size(&self) -> usize {
        self.body.len()
    }

    /// Content-Type header value, if one was captured
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type").map(String::as_str)
    }
}

fn serialize_body<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(body))
}

/// Generate an 8-character lowercase alphanumeric identifier.
///
/// Uniqueness is not guaranteed; the store rejects duplicates.
pub fn generate_id() -> String {
    let mut rng = rand::rng();
    (0..ID_LENGTH)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Return the trimmed value of the first `Subject:` line, matched
/// case-insensitively, or [`NO_SUBJECT`].
///
/// Only the first colon splits the line. Folded lines and encoded words are
/// left as they are.
pub fn extract_subject(body: &str) -> String {
    for line in body.split('\n') {
        if !has_prefix_ignore_case(line, "subject:") {
            continue;
        }
        if let Some((_, value)) = line.split_once(':') {
            return value.trim().to_string();
        }
    }
    NO_SUBJECT.to_string()
}

/// Collect the supplementary headers from the top-level header block
pub fn supplementary_headers(body: &str) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();

    for line in body.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            // End of headers
            break;
        }
        for name in SUPPLEMENTARY_HEADERS {
            if headers.contains_key(*name) {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            if key.trim().eq_ignore_ascii_case(name) {
                headers.insert((*name).to_string(), value.trim().to_string());
            }
        }
    }

    headers
}

fn has_prefix_ignore_case(line: &str, prefix: &str) -> bool {
    line.as_bytes()
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix.as_bytes()))
}

fn capture_date() -> String {
    Utc::now().format(DATE_FORMAT).to_string()
}
