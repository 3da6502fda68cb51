use std::sync::mpsc::{self, Receiver, Sender};

use chrono::{DateTime, Utc};

use super::codec::{decode_collection, encode_collection};
use super::slot::{CollectionSlot, UndecodableSlot};
use crate::artifact::{truncate_to_persisted, Artifact};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GalleryError {
    #[error("prompt is required")]
    EmptyPrompt,
    #[error("image data is required")]
    EmptyImageData,
    #[error("no artifact with id '{0}'")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceState {
    Healthy,
    /// The last durable write failed; the in-memory collection is ahead of storage.
    Degraded { reason: String },
}

impl PersistenceState {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GalleryEvent {
    Added(Artifact),
    Removed(String),
    Evicted(Vec<String>),
    Cleared,
    Reloaded { count: usize },
    PersistenceDegraded { reason: String },
    PersistenceRestored,
}

/// The saved collection, newest first, mirrored to a [`CollectionSlot`].
///
/// All mutations take `&mut self`, so a single owner serialises the
/// read-modify-persist sequence. Share across threads behind a `Mutex`.
pub struct GalleryStore {
    slot: Box<dyn CollectionSlot>,
    artifacts: Vec<Artifact>,
    capacity: Option<usize>,
    persistence: PersistenceState,
    last_created_at: Option<DateTime<Utc>>,
    withheld: bool,
    subscribers: Vec<Sender<GalleryEvent>>,
}

impl GalleryStore {
    /// Opens the store and loads whatever the slot holds. Never fails: a missing,
    /// unreadable, or corrupt slot starts an empty collection.
    pub fn open(slot: impl CollectionSlot + 'static) -> Self {
        let mut store = Self {
            slot: Box::new(slot),
            artifacts: Vec::new(),
            capacity: None,
            persistence: PersistenceState::Healthy,
            last_created_at: None,
            withheld: false,
            subscribers: Vec::new(),
        };
        store.load();
        store
    }

    /// Caps the collection; the oldest entries are evicted on the next insert.
    pub fn with_capacity_limit(mut self, capacity: Option<usize>) -> Self {
        self.capacity = capacity.filter(|cap| *cap > 0);
        self
    }

    /// Replaces the in-memory collection with what the slot holds.
    ///
    /// Corrupt content is kept aside and the store starts empty. Any other read failure
    /// degrades the store and withholds writes, so an unread collection is never
    /// overwritten. While writes are withheld, a reload folds the stored collection into
    /// the unsaved one instead of replacing it.
    pub fn load(&mut self) {
        if self.withheld {
            self.persist();
            self.notify(GalleryEvent::Reloaded {
                count: self.artifacts.len(),
            });
            return;
        }
        self.artifacts = match self.read_slot() {
            Ok(artifacts) => {
                if self.persistence.is_degraded() {
                    self.persistence = PersistenceState::Healthy;
                    self.notify(GalleryEvent::PersistenceRestored);
                }
                artifacts
            }
            Err(reason) => {
                self.withhold(reason);
                Vec::new()
            }
        };
        self.notify(GalleryEvent::Reloaded {
            count: self.artifacts.len(),
        });
    }

    pub fn add_artifact(
        &mut self,
        prompt: &str,
        negative_prompt: Option<&str>,
        image_data: &str,
    ) -> Result<Artifact, GalleryError> {
        if prompt.trim().is_empty() {
            return Err(GalleryError::EmptyPrompt);
        }
        if image_data.is_empty() {
            return Err(GalleryError::EmptyImageData);
        }

        let created_at = self.next_timestamp();
        let artifact = Artifact::mint(
            prompt.to_string(),
            negative_prompt.map(str::to_string),
            image_data.to_string(),
            created_at,
        );
        self.artifacts.insert(0, artifact.clone());

        let evicted = self.enforce_capacity();
        self.notify(GalleryEvent::Added(artifact.clone()));
        if !evicted.is_empty() {
            self.notify(GalleryEvent::Evicted(evicted));
        }
        self.persist();
        Ok(artifact)
    }

    pub fn list_artifacts(&self) -> &[Artifact] {
        self.artifacts.as_slice()
    }

    pub fn get(&self, id: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|artifact| artifact.id == id)
    }

    /// Resolves a full id or an unambiguous id prefix (as printed by `short_id`).
    pub fn find(&self, id_or_prefix: &str) -> Result<&Artifact, GalleryError> {
        if let Some(found) = self.get(id_or_prefix) {
            return Ok(found);
        }
        let needle = id_or_prefix.trim();
        let mut matches = self
            .artifacts
            .iter()
            .filter(|artifact| !needle.is_empty() && artifact.id.starts_with(needle));
        match (matches.next(), matches.next()) {
            (Some(found), None) => Ok(found),
            _ => Err(GalleryError::NotFound(id_or_prefix.to_string())),
        }
    }

    pub fn remove_artifact(&mut self, id: &str) -> Option<Artifact> {
        let idx = self.artifacts.iter().position(|artifact| artifact.id == id)?;
        let removed = self.artifacts.remove(idx);
        self.notify(GalleryEvent::Removed(removed.id.clone()));
        self.persist();
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.artifacts.clear();
        self.notify(GalleryEvent::Cleared);
        self.persist();
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn persistence(&self) -> &PersistenceState {
        &self.persistence
    }

    pub fn slot_description(&self) -> String {
        self.slot.describe()
    }

    pub fn subscribe(&mut self) -> Receiver<GalleryEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = truncate_to_persisted(Utc::now());
        let ts = match self.last_created_at {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_created_at = Some(ts);
        ts
    }

    fn enforce_capacity(&mut self) -> Vec<String> {
        let Some(cap) = self.capacity else {
            return Vec::new();
        };
        if self.artifacts.len() <= cap {
            return Vec::new();
        }
        self.artifacts
            .split_off(cap)
            .into_iter()
            .map(|artifact| artifact.id)
            .collect()
    }

    /// Reads and decodes the slot. `Err` carries the reason the slot must not be written.
    fn read_slot(&mut self) -> Result<Vec<Artifact>, String> {
        let raw = match self.slot.read() {
            Ok(None) => return Ok(Vec::new()),
            Ok(Some(raw)) => raw,
            Err(err) if err.chain().any(|cause| cause.is::<UndecodableSlot>()) => {
                return self.set_aside_corrupt(format!("{err:#}"));
            }
            Err(err) => {
                let reason = format!("{err:#}");
                tracing::error!(
                    slot = %self.slot.describe(),
                    error = %reason,
                    "gallery storage unreadable; holding writes until it can be read"
                );
                return Err(reason);
            }
        };
        match decode_collection(&raw) {
            Ok(artifacts) => Ok(artifacts),
            Err(err) => self.set_aside_corrupt(format!("{err:#}")),
        }
    }

    fn set_aside_corrupt(&mut self, reason: String) -> Result<Vec<Artifact>, String> {
        tracing::error!(
            slot = %self.slot.describe(),
            error = %reason,
            "gallery data is corrupt; starting empty"
        );
        match self.slot.preserve_corrupt() {
            Ok(()) => Ok(Vec::new()),
            Err(err) => {
                let reason = format!("could not keep corrupt gallery data: {err:#}");
                tracing::error!(error = %reason, "holding gallery writes");
                Err(reason)
            }
        }
    }

    fn withhold(&mut self, reason: String) {
        self.withheld = true;
        self.persistence = PersistenceState::Degraded {
            reason: reason.clone(),
        };
        self.notify(GalleryEvent::PersistenceDegraded { reason });
    }

    /// Artifacts from a late successful read are kept alongside the ones added since.
    /// A `clear` issued while writes were withheld only cleared what was visible, so the
    /// stored artifacts come back here.
    fn merge_stored(&mut self, stored: Vec<Artifact>) {
        for artifact in stored {
            if self.get(&artifact.id).is_none() {
                self.artifacts.push(artifact);
            }
        }
        self.artifacts
            .sort_by(|left, right| right.created_at.cmp(&left.created_at));
    }

    fn persist(&mut self) {
        if self.withheld {
            match self.read_slot() {
                Ok(stored) => {
                    self.withheld = false;
                    self.merge_stored(stored);
                    let evicted = self.enforce_capacity();
                    if !evicted.is_empty() {
                        self.notify(GalleryEvent::Evicted(evicted));
                    }
                }
                Err(reason) => {
                    self.withhold(reason);
                    return;
                }
            }
        }
        let result = encode_collection(&self.artifacts).and_then(|raw| self.slot.write(&raw));
        match result {
            Ok(()) => {
                if self.persistence.is_degraded() {
                    tracing::info!(slot = %self.slot.describe(), "gallery persistence restored");
                    self.persistence = PersistenceState::Healthy;
                    self.notify(GalleryEvent::PersistenceRestored);
                }
            }
            Err(err) => {
                let reason = format!("{err:#}");
                tracing::error!(
                    slot = %self.slot.describe(),
                    error = %reason,
                    "failed to persist gallery; changes are kept in memory only"
                );
                self.persistence = PersistenceState::Degraded {
                    reason: reason.clone(),
                };
                self.notify(GalleryEvent::PersistenceDegraded { reason });
            }
        }
    }

    fn notify(&mut self, event: GalleryEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}
