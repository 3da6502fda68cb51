use std::collections::HashSet;

use anyhow::bail;
use serde_json::{Map, Value};

use crate::artifact::Artifact;

pub const GALLERY_SCHEMA_VERSION: u64 = 1;

pub fn encode_collection(artifacts: &[Artifact]) -> anyhow::Result<String> {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(GALLERY_SCHEMA_VERSION.into()),
    );
    root.insert("artifacts".to_string(), serde_json::to_value(artifacts)?);
    Ok(serde_json::to_string_pretty(&Value::Object(root))?)
}

/// Decodes a persisted collection.
///
/// Accepts the versioned envelope and the legacy bare array. Records that do not parse
/// are skipped; duplicate ids keep the first occurrence. Fails only when the payload as
/// a whole is not a collection.
pub fn decode_collection(raw: &str) -> anyhow::Result<Vec<Artifact>> {
    let parsed: Value = serde_json::from_str(raw)?;
    let records = match parsed {
        Value::Array(rows) => rows,
        Value::Object(mut root) => {
            let version = root
                .get("schema_version")
                .and_then(Value::as_u64)
                .unwrap_or(GALLERY_SCHEMA_VERSION);
            if version > GALLERY_SCHEMA_VERSION {
                tracing::warn!(
                    version,
                    supported = GALLERY_SCHEMA_VERSION,
                    "gallery written by a newer schema; loading best-effort"
                );
            }
            match root.remove("artifacts") {
                Some(Value::Array(rows)) => rows,
                _ => bail!("gallery payload has no artifacts array"),
            }
        }
        _ => bail!("gallery payload is neither an object nor an array"),
    };

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(records.len());
    for (idx, record) in records.into_iter().enumerate() {
        match serde_json::from_value::<Artifact>(record) {
            Ok(artifact) => {
                if !seen.insert(artifact.id.clone()) {
                    tracing::warn!(id = %artifact.id, "dropping duplicate gallery record");
                    continue;
                }
                out.push(artifact);
            }
            Err(err) => {
                tracing::warn!(index = idx, error = %err, "skipping unreadable gallery record");
            }
        }
    }
    Ok(out)
}
