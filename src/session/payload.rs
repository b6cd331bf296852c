//! Byte payload resolution.
//!
//! A result carrying bytes is either inline (`{"base64": "..."}`) or an
//! externalized reference (`{"$external": {path, size, sha256}}`) that must
//! be read from disk and checked for length and digest.

use std::path::PathBuf;

use base64::Engine as _;
use probe_protocol::{EXTERNAL_PAYLOAD_KEY, INLINE_BYTES_KEY};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::error::CallError;

/// Externalized payload reference
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExternalReference {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

/// Bytes of a resolved payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPayload {
    pub bytes: Vec<u8>,
    /// True if the bytes were delivered through external storage
    pub externalized: bool,
}

/// Resolve an inline or externalized byte payload.
pub fn resolve_payload(value: &Value) -> Result<ResolvedPayload, CallError> {
    if let Some(reference) = value.get(EXTERNAL_PAYLOAD_KEY) {
        let reference: ExternalReference = serde_json::from_value(reference.clone())
            .map_err(|e| CallError::ExternalPayload(format!("invalid reference: {}", e)))?;
        let bytes = fetch_external(&reference)?;
        return Ok(ResolvedPayload {
            bytes,
            externalized: true,
        });
    }

    let encoded = value
        .get(INLINE_BYTES_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| CallError::ExternalPayload("result carries no byte payload".to_string()))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| CallError::ExternalPayload(format!("invalid base64: {}", e)))?;
    Ok(ResolvedPayload {
        bytes,
        externalized: false,
    })
}

fn fetch_external(reference: &ExternalReference) -> Result<Vec<u8>, CallError> {
    let bytes = std::fs::read(&reference.path).map_err(|e| {
        CallError::ExternalPayload(format!("{}: {}", reference.path.display(), e))
    })?;

    if bytes.len() as u64 != reference.size {
        return Err(CallError::ExternalPayload(format!(
            "size mismatch: expected {}, read {}",
            reference.size,
            bytes.len()
        )));
    }

    let actual = hex::encode(Sha256::digest(&bytes));
    if !actual.eq_ignore_ascii_case(&reference.sha256) {
        return Err(CallError::ExternalPayload(format!(
            "sha256 mismatch: expected {}, computed {}",
            reference.sha256, actual
        )));
    }

    Ok(bytes)
}
