use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classes::ClassId;
use crate::env::Grid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Reply of the one-shot `segment` / `segment_random` endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentResponse {
    pub num_points: u64,
    #[serde(default)]
    pub labels: Vec<ClassId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapResponse {
    pub grid: Grid,
}

/// Extracts the message of an in-band `{"error": ...}` reply.
///
/// The server answers some failures with status 200 and this shape instead of
/// the regular body.
pub fn error_message(value: &Value) -> Option<String> {
    match value.as_object()?.get("error")? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
