//! Core data models for the CanonKeeper pipeline.
//!
//! Row types mirror the SQLite schema one-to-one; status fields are stored as
//! strings at the persistence edge and converted through the enums below at
//! the logic boundary. Claim values travel as [`ClaimValue`], a tagged type
//! that is serialized to JSON only when a row is written.
//!
//! All character offsets (`start_char`, `end_char`, quote spans) are byte
//! offsets into the document's UTF-8 text.

use serde::{Deserialize, Serialize};

/// Lifecycle of a claim about one (entity, field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Inferred,
    Confirmed,
    Rejected,
    Superseded,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Inferred => "inferred",
            ClaimStatus::Confirmed => "confirmed",
            ClaimStatus::Rejected => "rejected",
            ClaimStatus::Superseded => "superseded",
        }
    }

    pub fn parse(s: &str) -> Option<ClaimStatus> {
        match s {
            "inferred" => Some(ClaimStatus::Inferred),
            "confirmed" => Some(ClaimStatus::Confirmed),
            "rejected" => Some(ClaimStatus::Rejected),
            "superseded" => Some(ClaimStatus::Superseded),
            _ => None,
        }
    }
}

/// Issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// Issue triage state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    Dismissed,
    Resolved,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Open => "open",
            IssueStatus::Dismissed => "dismissed",
            IssueStatus::Resolved => "resolved",
        }
    }
}

/// Narrative point-of-view mode for a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PovMode {
    First,
    ThirdLimited,
    Omniscient,
    Epistolary,
    Unknown,
}

impl PovMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PovMode::First => "first",
            PovMode::ThirdLimited => "third_limited",
            PovMode::Omniscient => "omniscient",
            PovMode::Epistolary => "epistolary",
            PovMode::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> PovMode {
        match s {
            "first" => PovMode::First,
            "third_limited" => PovMode::ThirdLimited,
            "omniscient" => PovMode::Omniscient,
            "epistolary" => PovMode::Epistolary,
            _ => PovMode::Unknown,
        }
    }
}

/// Tagged claim value. JSON serialization happens only at the persistence
/// edge; analyzer logic pattern-matches on the tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValue {
    Text(String),
    Number(f64),
    Flag(bool),
    Structured(serde_json::Value),
}

impl ClaimValue {
    /// Rebuild the tag from a raw JSON value.
    pub fn from_json(value: serde_json::Value) -> ClaimValue {
        match value {
            serde_json::Value::String(s) => ClaimValue::Text(s),
            serde_json::Value::Number(n) => {
                ClaimValue::Number(n.as_f64().unwrap_or(f64::NAN))
            }
            serde_json::Value::Bool(b) => ClaimValue::Flag(b),
            other => ClaimValue::Structured(other),
        }
    }

    /// Parse a persisted `value_json` column. Malformed JSON falls back to
    /// the raw string so continuity comparison still has something to chew on.
    pub fn from_stored(value_json: &str) -> ClaimValue {
        match serde_json::from_str::<serde_json::Value>(value_json) {
            Ok(v) => ClaimValue::from_json(v),
            Err(_) => ClaimValue::Text(value_json.to_string()),
        }
    }

    /// Serialize for the `value_json` column.
    pub fn to_stored(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }

    /// Normalized comparison key used by the continuity analyzer:
    /// lowercase for strings, numeric string for numbers, compact JSON
    /// otherwise.
    pub fn normalized(&self) -> String {
        match self {
            ClaimValue::Text(s) => s.to_lowercase(),
            ClaimValue::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            ClaimValue::Flag(b) => b.to_string(),
            ClaimValue::Structured(v) => v.to_string(),
        }
    }
}

/// Project row: one per opened manuscript root.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ProjectRow {
    pub id: String,
    pub root_path: String,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Document row: one per normalized file path within a project. `version`
/// is the monotonic snapshot counter bumped on each successful ingest.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct DocumentRow {
    pub id: String,
    pub project_id: String,
    pub path: String,
    pub kind: String,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Chunk row: immutable-once-created slice of document text.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ChunkRow {
    pub id: String,
    pub document_id: String,
    pub ordinal: i64,
    pub text: String,
    pub text_hash: String,
    pub start_char: i64,
    pub end_char: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Entity row: a named story object (character, location, rule, ...).
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct EntityRow {
    pub id: String,
    pub project_id: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub entity_type: String,
    pub display_name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Claim row: an atomic assertion about one entity field.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ClaimRow {
    pub id: String,
    pub entity_id: String,
    pub field: String,
    pub value_json: String,
    pub status: String,
    pub confidence: f64,
    pub supersedes_claim_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ClaimRow {
    pub fn status(&self) -> ClaimStatus {
        ClaimStatus::parse(&self.status).unwrap_or(ClaimStatus::Inferred)
    }

    pub fn value(&self) -> ClaimValue {
        ClaimValue::from_stored(&self.value_json)
    }
}

/// Evidence row shared by claim/issue/scene evidence tables.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct EvidenceRow {
    pub id: String,
    pub chunk_id: String,
    pub quote_start: i64,
    pub quote_end: i64,
}

/// Issue row: a detected continuity or style problem.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct IssueRow {
    pub id: String,
    pub project_id: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub issue_type: String,
    pub severity: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Scene row joined with its metadata row.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SceneRow {
    pub id: String,
    pub project_id: String,
    pub document_id: String,
    pub ordinal: i64,
    pub start_chunk_id: String,
    pub end_chunk_id: String,
    pub start_char: i64,
    pub end_char: i64,
    pub title: Option<String>,
    pub pov_mode: String,
    pub pov_entity_id: Option<String>,
    pub setting_entity_id: Option<String>,
    pub setting_text: Option<String>,
}

/// Style metric row, fully replaced per (scope_type, scope_id, metric_name).
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct StyleMetricRow {
    pub id: String,
    pub project_id: String,
    pub scope_type: String,
    pub scope_id: String,
    pub metric_name: String,
    pub metric_json: String,
    pub updated_at: i64,
}

/// Per-document, per-stage processing record.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ProcessingStateRow {
    pub document_id: String,
    pub stage: String,
    pub snapshot_id: String,
    pub status: String,
    pub error: Option<String>,
    pub updated_at: i64,
}

/// Millisecond UTC timestamp used across all rows.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_value_normalizes_strings_case_insensitively() {
        let a = ClaimValue::from_stored("\"Green\"");
        let b = ClaimValue::from_stored("\"green\"");
        assert_eq!(a.normalized(), b.normalized());
    }

    #[test]
    fn claim_value_normalizes_numbers_to_numeric_strings() {
        assert_eq!(ClaimValue::from_stored("17").normalized(), "17");
        assert_eq!(ClaimValue::from_stored("2.5").normalized(), "2.5");
    }

    #[test]
    fn claim_value_round_trips_structured_values() {
        let v = ClaimValue::from_stored(r#"{"eye_color":"green"}"#);
        assert!(matches!(v, ClaimValue::Structured(_)));
        assert_eq!(v.normalized(), r#"{"eye_color":"green"}"#);
    }

    #[test]
    fn malformed_value_json_falls_back_to_raw_text() {
        let v = ClaimValue::from_stored("not json at all");
        assert_eq!(v.normalized(), "not json at all");
    }

    #[test]
    fn claim_status_round_trips() {
        for s in ["inferred", "confirmed", "rejected", "superseded"] {
            assert_eq!(ClaimStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(ClaimStatus::parse("bogus").is_none());
    }
}
