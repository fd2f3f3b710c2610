//! The payload envelope common to every message: `{schema, ts, trace?,
//! ...body}`. Decoding validates the two required fields and leaves the
//! rest as an opaque JSON object for the schema-specific downstream
//! consumer to interpret.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The schema major version this build understands. A message whose
/// schema carries a different major is still routed if structurally
/// decodable (spec.md 4.2); callers use this alongside
/// `SchemaVersion::compatible_with` to decide whether to warn.
pub const CURRENT_SCHEMA_MAJOR: u32 = 1;

/// A parsed `major.minor` schema version, e.g. `state/1.0` -> `(1, 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
}

impl SchemaVersion {
    /// Split a schema name like `"state/1.0"` into `("state", SchemaVersion{1,0})`.
    pub fn parse(schema: &str) -> Result<(&str, SchemaVersion), CoreError> {
        let (name, version) = schema
            .rsplit_once('/')
            .ok_or_else(|| CoreError::protocol(format!("schema '{schema}' is missing a version")))?;
        let (major_s, minor_s) = version.split_once('.').ok_or_else(|| {
            CoreError::protocol(format!("schema '{schema}' has a malformed version"))
        })?;
        let major = major_s
            .parse()
            .map_err(|_| CoreError::protocol(format!("schema '{schema}' has non-numeric major")))?;
        let minor = minor_s
            .parse()
            .map_err(|_| CoreError::protocol(format!("schema '{schema}' has non-numeric minor")))?;
        Ok((name, SchemaVersion { major, minor }))
    }

    /// Whether this version is safely routable against a known registry
    /// version: same major (minor skew tolerated in either direction).
    pub fn compatible_with(&self, known: SchemaVersion) -> bool {
        self.major == known.major
    }
}

/// Distributed tracing correlation carried by `trace`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Trace {
    #[serde(default)]
    pub req_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// The decoded envelope. `body` holds every field of the payload object
/// other than `schema`, `ts`, and `trace` — unknown fields are preserved
/// here rather than rejected, per spec.md 3's "unknown fields MUST be
/// ignored" (ignored by typed consumers, not discarded outright).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub schema: String,
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Trace>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Envelope {
    pub fn schema_version(&self) -> Result<(String, SchemaVersion), CoreError> {
        let (name, version) = SchemaVersion::parse(&self.schema)?;
        Ok((name.to_string(), version))
    }
}

/// Decode a raw JSON payload into an `Envelope`, validating that `schema`
/// and `ts` are present with the right shape. A missing required field is
/// a `Protocol` error; everything else is passed through as `body`.
pub fn decode_envelope(payload: &[u8]) -> Result<Envelope, CoreError> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| CoreError::protocol(format!("payload is not valid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| CoreError::protocol("payload is not a JSON object".to_string()))?;

    let schema = obj
        .get("schema")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::protocol("envelope missing required field 'schema'".to_string()))?
        .to_string();
    let ts = obj
        .get("ts")
        .and_then(Value::as_i64)
        .ok_or_else(|| CoreError::protocol("envelope missing required field 'ts'".to_string()))?;
    let trace = obj
        .get("trace")
        .map(|v| serde_json::from_value(v.clone()))
        .transpose()
        .map_err(|e| CoreError::protocol(format!("envelope has malformed 'trace': {e}")))?;

    let mut body = obj.clone();
    body.remove("schema");
    body.remove("ts");
    body.remove("trace");

    Ok(Envelope {
        schema,
        ts,
        trace,
        body,
    })
}

/// Serialize an envelope back to its JSON wire form.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, CoreError> {
    serde_json::to_vec(envelope).map_err(|e| CoreError::protocol(format!("failed to encode envelope: {e}")))
}
