//! Deterministic JSON and content hashing.

use anyhow::{Context, Result};
use serde::Serialize;

/// Identifier recorded next to hashes so exports can be re-verified later.
pub const HASH_ALGORITHM: &str = "blake3";

/// Emit a value as JCS-canonical JSON (RFC 8785).
///
/// Used for execution-log exports and persisted task records so that the same
/// value always produces byte-identical output.
///
/// # Example
///
/// ```rust
/// use devflow_utils::canonicalization::emit_jcs;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Snapshot {
///     percentage: u8,
///     step: String,
/// }
///
/// let json = emit_jcs(&Snapshot { percentage: 50, step: "Implementation".into() }).unwrap();
/// assert_eq!(json, r#"{"percentage":50,"step":"Implementation"}"#);
/// ```
pub fn emit_jcs<T: Serialize>(value: &T) -> Result<String> {
    let json_value =
        serde_json::to_value(value).with_context(|| "Failed to serialize value to JSON")?;
    let json_bytes = serde_json_canonicalizer::to_vec(&json_value)
        .with_context(|| "Failed to canonicalize JSON using JCS")?;
    String::from_utf8(json_bytes).with_context(|| "JCS output contained invalid UTF-8")
}

/// BLAKE3 hex digest of text with line endings normalized to LF.
#[must_use]
pub fn content_hash(content: &str) -> String {
    let normalized = content.replace("\r\n", "\n");
    blake3::hash(normalized.as_bytes()).to_hex().to_string()
}
