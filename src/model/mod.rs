//! Platform entities the engine reasons about.
//!
//! Both types are built from remote API objects. Missing optional fields fall
//! back to their zero values instead of failing construction, because the
//! platform omits fields freely depending on account state and requested
//! expansions.

pub mod account;
pub mod post;

pub use account::{Account, Withheld};
pub use post::{
    AnnotationEntity, ContextAnnotation, Media, Place, Poll, PollOption, Post, PostMetrics,
    ReferenceType, ReferencedPost, ReplySettings,
};

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Platform ids arrive as decimal strings; fixtures sometimes use numbers.
pub(crate) fn parse_id(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        _ => 0,
    }
}

pub(crate) fn parse_optional_id(value: Option<&Value>) -> Option<u64> {
    match parse_id(value) {
        0 => None,
        id => Some(id),
    }
}

pub(crate) fn parse_time(value: Option<&Value>) -> DateTime<Utc> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

pub(crate) fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn u64_field(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

pub(crate) fn bool_field(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}
