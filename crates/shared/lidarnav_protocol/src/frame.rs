//! Frames of the streaming segmentation endpoint.
//!
//! The server emits `data: <json>\n\n` segments:
//!
//! ```text
//! data: {"total_batches": 2}
//! data: {"batch": 1, "preds": [1, 1, 2]}
//! data: {"batch": 2, "preds": [2, 3]}
//! data: {"done": true, "final": [1, 1, 2, 2, 3]}
//! ```
//!
//! Splitting bytes into segments is the client's job; this module only turns one
//! JSON payload into a [`Payload`].

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::api;
use crate::classes::ClassId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Announces how many batches follow. At most once, first.
    Header { total_batches: u32 },
    /// Predictions for one batch of points.
    Batch { index: u32, labels: Vec<ClassId> },
    /// The complete, authoritative label sequence. Exactly once, last.
    Final { labels: Vec<ClassId> },
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Header { .. } => "header",
            Frame::Batch { .. } => "batch",
            Frame::Final { .. } => "final",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Frame::Final { .. })
    }

    /// Server-side encoding, including the trailing delimiter.
    pub fn to_event(&self) -> String {
        let body = match self {
            Frame::Header { total_batches } => json!({ "total_batches": total_batches }),
            Frame::Batch { index, labels } => json!({ "batch": index, "preds": labels }),
            Frame::Final { labels } => json!({ "done": true, "final": labels }),
        };
        format!("data: {body}\n\n")
    }
}

/// What a `data:` payload turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Frame(Frame),
    /// Failure reported in-band, e.g. an upload without a `points` array.
    Error(String),
    /// Well-formed JSON matching no known frame shape.
    Unrecognized,
}

#[derive(Deserialize)]
struct HeaderBody {
    total_batches: u32,
}

#[derive(Deserialize)]
struct BatchBody {
    batch: u32,
    preds: Vec<ClassId>,
}

#[derive(Deserialize)]
struct FinalBody {
    #[serde(rename = "final")]
    labels: Vec<ClassId>,
}

/// Parses and classifies one payload (the text after `data:`).
pub fn parse_payload(text: &str) -> Result<Payload, serde_json::Error> {
    classify(serde_json::from_str(text)?)
}

/// Classifies by key presence, checked in order: `total_batches`, then
/// `batch`+`preds`, then `done`+`final`, then `error`.
///
/// A recognised key with an ill-typed value is an error, not `Unrecognized`.
pub fn classify(value: Value) -> Result<Payload, serde_json::Error> {
    let Value::Object(obj) = value else {
        return Ok(Payload::Unrecognized);
    };

    if obj.contains_key("total_batches") {
        let body: HeaderBody = from_object(obj)?;
        return Ok(Payload::Frame(Frame::Header {
            total_batches: body.total_batches,
        }));
    }
    if has_keys(&obj, &["batch", "preds"]) {
        let body: BatchBody = from_object(obj)?;
        return Ok(Payload::Frame(Frame::Batch {
            index: body.batch,
            labels: body.preds,
        }));
    }
    if has_keys(&obj, &["done", "final"]) {
        let body: FinalBody = from_object(obj)?;
        return Ok(Payload::Frame(Frame::Final {
            labels: body.labels,
        }));
    }

    let value = Value::Object(obj);
    match api::error_message(&value) {
        Some(message) => Ok(Payload::Error(message)),
        None => Ok(Payload::Unrecognized),
    }
}

fn has_keys(obj: &Map<String, Value>, keys: &[&str]) -> bool {
    keys.iter().all(|k| obj.contains_key(*k))
}

fn from_object<T: DeserializeOwned>(obj: Map<String, Value>) -> Result<T, serde_json::Error> {
    serde_json::from_value(Value::Object(obj))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_frame_shape() {
        assert_eq!(
            parse_payload(r#"{"total_batches": 2}"#).unwrap(),
            Payload::Frame(Frame::Header { total_batches: 2 })
        );
        assert_eq!(
            parse_payload(r#"{"batch": 1, "preds": [1, 1, 2]}"#).unwrap(),
            Payload::Frame(Frame::Batch {
                index: 1,
                labels: vec![1, 1, 2]
            })
        );
        assert_eq!(
            parse_payload(r#"{"done": true, "final": [1, 2]}"#).unwrap(),
            Payload::Frame(Frame::Final { labels: vec![1, 2] })
        );
    }

    #[test]
    fn zero_values_still_classify_by_key() {
        assert_eq!(
            parse_payload(r#"{"total_batches": 0}"#).unwrap(),
            Payload::Frame(Frame::Header { total_batches: 0 })
        );
        assert_eq!(
            parse_payload(r#"{"batch": 0, "preds": []}"#).unwrap(),
            Payload::Frame(Frame::Batch {
                index: 0,
                labels: vec![]
            })
        );
    }

    #[test]
    fn partial_shapes_are_unrecognized() {
        assert_eq!(parse_payload(r#"{"batch": 1}"#).unwrap(), Payload::Unrecognized);
        assert_eq!(parse_payload(r#"{"done": true}"#).unwrap(), Payload::Unrecognized);
        assert_eq!(parse_payload("[1, 2, 3]").unwrap(), Payload::Unrecognized);
        assert_eq!(parse_payload("17").unwrap(), Payload::Unrecognized);
    }

    #[test]
    fn in_band_error_is_reported() {
        assert_eq!(
            parse_payload(r#"{"error": "points missing"}"#).unwrap(),
            Payload::Error("points missing".to_string())
        );
    }

    #[test]
    fn ill_typed_known_keys_are_errors() {
        assert!(parse_payload(r#"{"total_batches": "two"}"#).is_err());
        assert!(parse_payload(r#"{"batch": 1, "preds": "oops"}"#).is_err());
        assert!(parse_payload(r#"{"done": true, "final": null}"#).is_err());
        assert!(parse_payload(r#"{"batch": 1, "preds": [1,"#).is_err());
    }

    #[test]
    fn event_encoding_classifies_back() {
        let frame = Frame::Batch {
            index: 4,
            labels: vec![0, 7, 3],
        };
        let event = frame.to_event();
        assert!(event.starts_with("data: "));
        assert!(event.ends_with("\n\n"));

        let body = event.trim_start_matches("data:").trim();
        assert_eq!(parse_payload(body).unwrap(), Payload::Frame(frame));
    }
}
