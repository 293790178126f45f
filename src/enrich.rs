//! # Enrichment
//! Turns an arbitrary JSON record into an [`EnrichedRow`]: every top-level key
//! becomes a field carrying a string value, the set of sources it came from and
//! a 0–100 confidence score.
//!
//! Pure functions only. Nothing here fails: odd shapes degrade to a serialized,
//! lower-confidence field so no input key is ever lost.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const DEFAULT_CONFIDENCE: u8 = 70;
/// Points removed from complex values that had to be flattened to JSON text.
pub const COMPLEX_PENALTY: u8 = 20;
pub const COMPLEX_NOTE: &str = "complex value serialized";

const ROW_ID_PREFIX: &str = "sr_";
const ROW_ID_HEX_LEN: usize = 16;

/// Domains that earn the high-trust bonus in [`calculate_confidence_score`].
pub const HIGH_TRUST_DOMAINS: &[&str] = &["linkedin.com", "crunchbase.com", "sec.gov", "github.com"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedField {
    pub value: String,
    pub sources: BTreeSet<String>,
    pub confidence_score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRow {
    pub id: String,
    pub fields: BTreeMap<String, EnrichedField>,
}

#[derive(Debug, Clone)]
pub struct EnrichOptions {
    pub default_confidence: u8,
    pub additional_sources: Vec<String>,
    /// Note attached to plain fields (and enriched ones that carry none).
    pub note: Option<String>,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            default_confidence: DEFAULT_CONFIDENCE,
            additional_sources: Vec::new(),
            note: None,
        }
    }
}

impl EnrichOptions {
    pub fn confidence(mut self, score: u8) -> Self {
        self.default_confidence = score.min(100);
        self
    }

    pub fn source(mut self, s: impl Into<String>) -> Self {
        self.additional_sources.push(s.into());
        self
    }

    pub fn note(mut self, n: impl Into<String>) -> Self {
        self.note = Some(n.into());
        self
    }
}

/// Shape of one raw value, decided before any transformation happens.
#[derive(Debug, Clone, PartialEq)]
enum RawField<'a> {
    Scalar(String),
    Enriched {
        value: String,
        sources: Vec<String>,
        confidence: Option<u8>,
        note: Option<String>,
    },
    Complex(&'a Value),
}

fn classify(v: &Value) -> RawField<'_> {
    match v {
        Value::Null => RawField::Scalar(String::new()),
        Value::Bool(_) | Value::Number(_) | Value::String(_) => RawField::Scalar(scalar_string(v)),
        Value::Object(map) => match (map.get("value"), map.get("metadata")) {
            (Some(inner), Some(Value::Object(meta))) => RawField::Enriched {
                value: match inner {
                    Value::Array(_) | Value::Object(_) => canonical_json(inner),
                    other => scalar_string(other),
                },
                sources: meta
                    .get("sources")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default(),
                confidence: meta.get("confidenceScore").and_then(score_from_json),
                note: meta
                    .get("note")
                    .or_else(|| meta.get("additionalDetails"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            _ => RawField::Complex(v),
        },
        Value::Array(_) => RawField::Complex(v),
    }
}

fn scalar_string(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn score_from_json(v: &Value) -> Option<u8> {
    let f = v.as_f64()?;
    if !f.is_finite() {
        return None;
    }
    Some(f.round().clamp(0.0, 100.0) as u8)
}

fn source_set<'a>(lists: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
    lists
        .into_iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalize `raw` into a row. A non-object input becomes a single `value` field.
pub fn enrich(raw: &Value, sources: &[String], options: &EnrichOptions) -> EnrichedRow {
    let base_sources = source_set(sources.iter().chain(options.additional_sources.iter()));

    let wrapped;
    let map = match raw {
        Value::Object(map) => map,
        other => {
            wrapped = Map::from_iter([("value".to_string(), other.clone())]);
            &wrapped
        }
    };

    let mut fields = BTreeMap::new();
    for (key, value) in map {
        let field = match classify(value) {
            RawField::Scalar(s) => EnrichedField {
                value: s,
                sources: base_sources.clone(),
                confidence_score: options.default_confidence,
                note: options.note.clone(),
            },
            RawField::Enriched {
                value,
                sources,
                confidence,
                note,
            } => {
                let mut merged = source_set(sources.iter());
                merged.extend(base_sources.iter().cloned());
                EnrichedField {
                    value,
                    sources: merged,
                    confidence_score: confidence.unwrap_or(options.default_confidence),
                    note: note.or_else(|| options.note.clone()),
                }
            }
            RawField::Complex(v) => EnrichedField {
                value: canonical_json(v),
                sources: base_sources.clone(),
                confidence_score: options.default_confidence.saturating_sub(COMPLEX_PENALTY),
                note: Some(COMPLEX_NOTE.to_string()),
            },
        };
        fields.insert(key.clone(), field);
    }

    EnrichedRow {
        id: row_id(raw),
        fields,
    }
}

/// Stable row id: `sr_` + 16 hex chars of SHA-256 over the canonical JSON.
pub fn row_id(raw: &Value) -> String {
    let digest = Sha256::digest(canonical_json(raw).as_bytes());
    let hex = hex::encode(digest);
    format!("{ROW_ID_PREFIX}{}", &hex[..ROW_ID_HEX_LEN])
}

/// JSON text with object keys sorted at every depth.
pub fn canonical_json(v: &Value) -> String {
    fn sorted(v: &Value) -> Value {
        match v {
            Value::Object(map) => {
                let ordered: BTreeMap<&String, Value> = map.iter().map(|(k, v)| (k, sorted(v))).collect();
                let mut out = Map::new();
                for (k, v) in ordered {
                    out.insert(k.clone(), v);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    // Filled in key order, so the text is sorted with or without `preserve_order`.
    sorted(v).to_string()
}

/// Heuristic 0–100 trust score. Never panics; non-object `data` adds nothing.
///
/// base 50, +10 per source (max +30), +10 if any source is on a high-trust
/// domain, +1 per populated top-level key (max +10).
pub fn calculate_confidence_score(sources: &[String], data: &Value) -> u8 {
    let mut score: i32 = 50;

    let sources: Vec<&str> = sources.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
    score += (sources.len() as i32 * 10).min(30);
    if sources
        .iter()
        .any(|s| HIGH_TRUST_DOMAINS.iter().any(|d| s.contains(d)))
    {
        score += 10;
    }

    if let Value::Object(map) = data {
        let populated = map
            .values()
            .filter(|v| !matches!(v, Value::Null) && v.as_str() != Some(""))
            .count();
        score += populated.min(10) as i32;
    }

    score.clamp(0, 100) as u8
}

/// Functional update of one field. Sources are unioned, confidence recomputed
/// from the merged sources and the new value, the old note kept unless replaced.
pub fn update_field(
    row: &EnrichedRow,
    field_name: &str,
    value: impl Into<String>,
    additional_sources: &[String],
    note: Option<String>,
) -> EnrichedRow {
    let value = value.into();
    let mut next = row.clone();

    let (mut sources, old_note) = match row.fields.get(field_name) {
        Some(f) => (f.sources.clone(), f.note.clone()),
        None => (BTreeSet::new(), None),
    };
    sources.extend(source_set(additional_sources.iter()));

    let listed: Vec<String> = sources.iter().cloned().collect();
    let confidence_score = calculate_confidence_score(&listed, &Value::String(value.clone()));

    next.fields.insert(
        field_name.to_string(),
        EnrichedField {
            value,
            sources,
            confidence_score,
            note: note.or(old_note),
        },
    );
    next
}
