use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};

pub const DEFAULT_SLOT_KEY: &str = "ai-wallpapers";

/// The slot holds bytes that are not text. Readers treat this like corrupt JSON.
#[derive(Debug, thiserror::Error)]
#[error("slot content is not valid UTF-8 ({0})")]
pub struct UndecodableSlot(#[from] std::string::FromUtf8Error);

/// A single named slot in a durable key-value medium.
///
/// The gallery store is the only writer. Writes replace the whole slot.
pub trait CollectionSlot: Send {
    /// `Ok(None)` means the slot has never been written.
    fn read(&self) -> anyhow::Result<Option<String>>;
    fn write(&self, payload: &str) -> anyhow::Result<()>;
    fn describe(&self) -> String;

    /// Called when the slot content could not be decoded, before anything overwrites it.
    fn preserve_corrupt(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    pub fn new(dir: impl AsRef<Path>, key: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{key}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CollectionSlot for FileSlot {
    fn read(&self) -> anyhow::Result<Option<String>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("failed reading {}", self.path.display())))
            }
        };
        let raw = String::from_utf8(bytes)
            .map_err(UndecodableSlot::from)
            .with_context(|| format!("failed decoding {}", self.path.display()))?;
        Ok(Some(raw))
    }

    fn write(&self, payload: &str) -> anyhow::Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let mut staged = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to stage write in {}", dir.display()))?;
        staged.write_all(payload.as_bytes())?;
        staged.as_file().sync_all()?;
        staged
            .persist(&self.path)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn preserve_corrupt(&self) -> anyhow::Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let stamp = chrono::Utc::now().timestamp_millis();
        let mut aside = self.path.clone().into_os_string();
        aside.push(format!(".corrupt-{stamp}"));
        let aside = PathBuf::from(aside);
        std::fs::rename(&self.path, &aside)
            .with_context(|| format!("failed to move {} aside", self.path.display()))?;
        tracing::warn!(path = %aside.display(), "kept unreadable gallery file");
        Ok(())
    }
}

/// Process-local slot. Clones share the same content.
#[derive(Debug, Clone, Default)]
pub struct MemorySlot {
    inner: Arc<Mutex<MemorySlotInner>>,
}

#[derive(Debug, Default)]
struct MemorySlotInner {
    payload: Option<String>,
    unavailable: bool,
    writes: u64,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(payload: impl Into<String>) -> Self {
        let slot = Self::default();
        if let Ok(mut inner) = slot.inner.lock() {
            inner.payload = Some(payload.into());
        }
        slot
    }

    /// Simulates the medium being unavailable (quota exceeded, storage disabled).
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.unavailable = unavailable;
        }
    }

    pub fn payload(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|inner| inner.payload.clone())
    }

    pub fn writes(&self) -> u64 {
        self.inner.lock().map(|inner| inner.writes).unwrap_or(0)
    }
}

impl CollectionSlot for MemorySlot {
    fn read(&self) -> anyhow::Result<Option<String>> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory slot lock poisoned"))?;
        if inner.unavailable {
            bail!("storage unavailable");
        }
        Ok(inner.payload.clone())
    }

    fn write(&self, payload: &str) -> anyhow::Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory slot lock poisoned"))?;
        if inner.unavailable {
            bail!("storage unavailable");
        }
        inner.payload = Some(payload.to_string());
        inner.writes += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
