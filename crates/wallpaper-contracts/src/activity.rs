use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::artifact::format_timestamp;

/// Studio activity worth keeping an audit trail of. Never carries image bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Activity {
    GenerationRequested {
        operation: String,
        prompt: String,
    },
    GenerationCompleted {
        operation: String,
    },
    GenerationEmpty {
        operation: String,
    },
    GenerationFailed {
        operation: String,
        kind: String,
        message: String,
    },
    ArtifactSaved {
        artifact_id: String,
    },
    ArtifactRemoved {
        artifact_id: String,
    },
    GalleryCleared {
        count: usize,
    },
    PersistenceDegraded {
        reason: String,
    },
}

/// Append-only writer for `activity.jsonl`.
///
/// - every line carries `type`, `session_id`, `ts`
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct ActivityLog {
    inner: Arc<ActivityLogInner>,
}

#[derive(Debug)]
struct ActivityLogInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_session(path, Uuid::new_v4().to_string())
    }

    pub fn with_session(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ActivityLogInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn record(&self, activity: &Activity) -> anyhow::Result<Value> {
        let mut line = Map::new();
        line.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        line.insert(
            "ts".to_string(),
            Value::String(format_timestamp(&chrono::Utc::now())),
        );
        if let Value::Object(fields) = serde_json::to_value(activity)? {
            line.extend(fields);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_string(&line)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("activity log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(encoded.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(line))
    }

    /// Like [`record`](Self::record), but a failure is only logged.
    pub fn note(&self, activity: Activity) {
        if let Err(err) = self.record(&activity) {
            tracing::warn!(
                path = %self.inner.path.display(),
                error = %format!("{err:#}"),
                "could not append to activity log"
            );
        }
    }
}
