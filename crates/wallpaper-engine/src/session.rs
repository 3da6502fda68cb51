use wallpaper_contracts::activity::{Activity, ActivityLog};
use wallpaper_contracts::gallery::{GalleryError, GalleryStore, PersistenceState};
use wallpaper_contracts::Artifact;

use crate::client::GenerationClient;
use crate::error::GenerationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOrigin {
    Generated,
    Edited,
    Upscaled,
    /// Loaded from the gallery or from a file.
    Opened,
}

/// An image held in memory only, until it is explicitly saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientImage {
    pub image_data: String,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub origin: ImageOrigin,
    saved_as: Option<String>,
}

impl TransientImage {
    pub fn new(image_data: String, prompt: String, negative_prompt: Option<String>) -> Self {
        Self {
            image_data,
            prompt,
            negative_prompt,
            origin: ImageOrigin::Opened,
            saved_as: None,
        }
    }

    pub fn from_artifact(artifact: &Artifact) -> Self {
        Self {
            image_data: artifact.image_data.clone(),
            prompt: artifact.prompt.clone(),
            negative_prompt: artifact.negative_prompt.clone(),
            origin: ImageOrigin::Opened,
            saved_as: Some(artifact.id.clone()),
        }
    }

    pub fn saved_as(&self) -> Option<&str> {
        self.saved_as.as_deref()
    }

    fn derive(&self, image_data: String, origin: ImageOrigin) -> Self {
        Self {
            image_data,
            prompt: self.prompt.clone(),
            negative_prompt: self.negative_prompt.clone(),
            origin,
            saved_as: None,
        }
    }
}

/// Identifies one in-flight request. Only the newest ticket may install a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acceptance {
    Installed,
    /// The service answered without an image; the current image is unchanged.
    NoImage,
    /// The caller moved on before this result arrived.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(Artifact),
    AlreadySaved(String),
    NothingToSave,
}

/// Drives user intent through the client and, on request, into the gallery.
pub struct StudioSession {
    client: GenerationClient,
    activity: Option<ActivityLog>,
    current: Option<TransientImage>,
    issued: u64,
    live: Option<u64>,
}

impl StudioSession {
    pub fn new(client: GenerationClient) -> Self {
        Self {
            client,
            activity: None,
            current: None,
            issued: 0,
            live: None,
        }
    }

    pub fn with_activity_log(mut self, activity: ActivityLog) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn client(&self) -> &GenerationClient {
        &self.client
    }

    pub fn current(&self) -> Option<&TransientImage> {
        self.current.as_ref()
    }

    pub fn open(&mut self, image: TransientImage) {
        self.cancel();
        self.current = Some(image);
    }

    /// Starts a request; any earlier ticket becomes stale.
    pub fn begin(&mut self) -> Ticket {
        self.issued += 1;
        self.live = Some(self.issued);
        Ticket(self.issued)
    }

    /// Loses interest in whatever is in flight.
    pub fn cancel(&mut self) {
        self.live = None;
    }

    pub fn accept(&mut self, ticket: Ticket, image: Option<TransientImage>) -> Acceptance {
        if self.live != Some(ticket.0) {
            tracing::debug!(ticket = ticket.0, "discarding late result");
            return Acceptance::Discarded;
        }
        self.live = None;
        match image {
            Some(image) => {
                self.current = Some(image);
                Acceptance::Installed
            }
            None => Acceptance::NoImage,
        }
    }

    pub fn generate(
        &mut self,
        prompt: &str,
        negative_prompt: Option<&str>,
    ) -> Result<Acceptance, GenerationError> {
        let negative_prompt = negative_prompt.filter(|value| !value.trim().is_empty());
        let ticket = self.begin();
        self.current = None;
        self.log(Activity::GenerationRequested {
            operation: "generate".to_string(),
            prompt: prompt.to_string(),
        });
        let result = self.client.generate(prompt, negative_prompt);
        let image = self.settle("generate", ticket, result)?.map(|image_data| {
            let mut image = TransientImage::new(
                image_data,
                prompt.to_string(),
                negative_prompt.map(str::to_string),
            );
            image.origin = ImageOrigin::Generated;
            image
        });
        Ok(self.accept(ticket, image))
    }

    pub fn edit_current(&mut self, instruction: &str) -> Result<Acceptance, GenerationError> {
        let source = self.require_current()?;
        let ticket = self.begin();
        self.log(Activity::GenerationRequested {
            operation: "edit".to_string(),
            prompt: instruction.to_string(),
        });
        let result = self.client.edit(&source.image_data, instruction);
        let image = self
            .settle("edit", ticket, result)?
            .map(|image_data| source.derive(image_data, ImageOrigin::Edited));
        Ok(self.accept(ticket, image))
    }

    pub fn upscale_current(&mut self) -> Result<Acceptance, GenerationError> {
        let source = self.require_current()?;
        let ticket = self.begin();
        self.log(Activity::GenerationRequested {
            operation: "upscale".to_string(),
            prompt: source.prompt.clone(),
        });
        let result = self.client.upscale(&source.image_data);
        let image = self
            .settle("upscale", ticket, result)?
            .map(|image_data| source.derive(image_data, ImageOrigin::Upscaled));
        Ok(self.accept(ticket, image))
    }

    /// Saves the current image once. Saving again is a no-op.
    pub fn save_current(&mut self, gallery: &mut GalleryStore) -> Result<SaveOutcome, GalleryError> {
        let Some(current) = self.current.as_mut() else {
            return Ok(SaveOutcome::NothingToSave);
        };
        if let Some(id) = current.saved_as.as_ref() {
            return Ok(SaveOutcome::AlreadySaved(id.clone()));
        }
        let artifact = gallery.add_artifact(
            &current.prompt,
            current.negative_prompt.as_deref(),
            &current.image_data,
        )?;
        current.saved_as = Some(artifact.id.clone());
        self.log(Activity::ArtifactSaved {
            artifact_id: artifact.id.clone(),
        });
        if let PersistenceState::Degraded { reason } = gallery.persistence() {
            self.log(Activity::PersistenceDegraded {
                reason: reason.clone(),
            });
        }
        Ok(SaveOutcome::Saved(artifact))
    }

    pub fn start_over(&mut self) {
        self.cancel();
        self.current = None;
    }

    fn require_current(&self) -> Result<TransientImage, GenerationError> {
        self.current
            .clone()
            .ok_or(GenerationError::NoCurrentImage)
    }

    fn settle(
        &mut self,
        operation: &str,
        ticket: Ticket,
        result: Result<Option<String>, GenerationError>,
    ) -> Result<Option<String>, GenerationError> {
        match &result {
            Ok(Some(_)) => self.log(Activity::GenerationCompleted {
                operation: operation.to_string(),
            }),
            Ok(None) => self.log(Activity::GenerationEmpty {
                operation: operation.to_string(),
            }),
            Err(err) => {
                if self.live == Some(ticket.0) {
                    self.live = None;
                }
                self.log(Activity::GenerationFailed {
                    operation: operation.to_string(),
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                });
            }
        }
        result
    }

    fn log(&self, activity: Activity) {
        if let Some(log) = self.activity.as_ref() {
            log.note(activity);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, Result};
    use serde_json::{json, Value};
    use wallpaper_contracts::activity::ActivityLog;
    use wallpaper_contracts::gallery::{GalleryStore, MemorySlot};

    use super::{Acceptance, ImageOrigin, SaveOutcome, StudioSession, TransientImage};
    use crate::client::GenerationClient;
    use crate::error::{FailureKind, GenerationError};
    use crate::transport::GenerativeTransport;

    const PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";
    const JPEG_B64: &str = "/9j/4AAQSkZJRg==";

    /// Answers predict with `generated`, and content calls with `edited`.
    #[derive(Clone)]
    struct FixedTransport {
        generated: Option<&'static str>,
        edited: Option<&'static str>,
        failure: Option<&'static str>,
        calls: Arc<Mutex<u32>>,
    }

    impl FixedTransport {
        fn new(generated: Option<&'static str>, edited: Option<&'static str>) -> Self {
            Self {
                generated,
                edited,
                failure: None,
                calls: Arc::new(Mutex::new(0)),
            }
        }

        fn failing(message: &'static str) -> Self {
            Self {
                failure: Some(message),
                ..Self::new(None, None)
            }
        }

        fn bump(&self) -> Result<()> {
            *self.calls.lock().unwrap() += 1;
            match self.failure {
                Some(message) => Err(anyhow!(message)),
                None => Ok(()),
            }
        }
    }

    impl GenerativeTransport for FixedTransport {
        fn predict(&self, _model: &str, _payload: &Value) -> Result<Value> {
            self.bump()?;
            Ok(match self.generated {
                Some(data) => json!({"predictions": [{"bytesBase64Encoded": data}]}),
                None => json!({"predictions": []}),
            })
        }

        fn generate_content(&self, _model: &str, _payload: &Value) -> Result<Value> {
            self.bump()?;
            Ok(match self.edited {
                Some(data) => json!({"candidates": [{"content": {"parts": [{"inlineData": {"data": data}}]}}]}),
                None => json!({"candidates": [{"content": {"parts": [{"text": "no"}]}}]}),
            })
        }
    }

    fn session(transport: FixedTransport) -> StudioSession {
        StudioSession::new(GenerationClient::with_transport(transport))
    }

    #[test]
    fn generate_installs_transient_image_without_saving() -> Result<()> {
        let slot = MemorySlot::new();
        let gallery = GalleryStore::open(slot.clone());
        let mut session = session(FixedTransport::new(Some(PNG_B64), None));

        assert_eq!(session.generate("a forest", Some(""))?, Acceptance::Installed);
        let current = session.current().cloned().expect("image installed");
        assert_eq!(current.image_data, PNG_B64);
        assert_eq!(current.negative_prompt, None);
        assert_eq!(current.origin, ImageOrigin::Generated);
        assert!(gallery.is_empty());
        assert_eq!(slot.writes(), 0);
        Ok(())
    }

    #[test]
    fn zero_images_leaves_nothing_to_save() -> Result<()> {
        let mut gallery = GalleryStore::open(MemorySlot::new());
        let mut session = session(FixedTransport::new(None, None));

        assert_eq!(session.generate("a forest", None)?, Acceptance::NoImage);
        assert_eq!(session.current(), None);
        assert_eq!(session.save_current(&mut gallery)?, SaveOutcome::NothingToSave);
        assert!(gallery.is_empty());
        Ok(())
    }

    #[test]
    fn save_current_happens_once() -> Result<()> {
        let mut gallery = GalleryStore::open(MemorySlot::new());
        let mut session = session(FixedTransport::new(Some(PNG_B64), None));
        session.generate("a forest", Some("fog"))?;

        let SaveOutcome::Saved(artifact) = session.save_current(&mut gallery)? else {
            panic!("expected a save");
        };
        assert_eq!(artifact.prompt, "a forest");
        assert_eq!(artifact.negative_prompt.as_deref(), Some("fog"));
        assert_eq!(
            session.save_current(&mut gallery)?,
            SaveOutcome::AlreadySaved(artifact.id.clone())
        );
        assert_eq!(gallery.len(), 1);
        Ok(())
    }

    #[test]
    fn edited_gallery_image_saves_as_new_artifact() -> Result<()> {
        let mut gallery = GalleryStore::open(MemorySlot::new());
        let original = gallery.add_artifact("dunes", Some("people"), PNG_B64)?;
        let mut session = session(FixedTransport::new(None, Some(JPEG_B64)));
        session.open(TransientImage::from_artifact(&original));

        assert_eq!(
            session.save_current(&mut gallery)?,
            SaveOutcome::AlreadySaved(original.id.clone())
        );
        assert_eq!(session.edit_current("add a moon")?, Acceptance::Installed);
        let SaveOutcome::Saved(edited) = session.save_current(&mut gallery)? else {
            panic!("expected a save");
        };
        assert_ne!(edited.id, original.id);
        assert_eq!(edited.prompt, "dunes");
        assert_eq!(edited.image_data, JPEG_B64);
        assert_eq!(gallery.list_artifacts()[1], original);
        Ok(())
    }

    #[test]
    fn transforms_without_image_are_rejected() {
        let mut session = session(FixedTransport::new(None, Some(PNG_B64)));
        assert_eq!(
            session.upscale_current(),
            Err(GenerationError::NoCurrentImage)
        );
        let err = session.edit_current("add a moon").expect_err("nothing loaded");
        assert!(!err.to_string().contains("base64"));
        assert_eq!(err.kind(), FailureKind::InvalidInput);
    }

    #[test]
    fn text_only_edit_keeps_current_image() -> Result<()> {
        let mut session = session(FixedTransport::new(Some(PNG_B64), None));
        session.generate("a forest", None)?;
        assert_eq!(session.upscale_current()?, Acceptance::NoImage);
        assert_eq!(
            session.current().map(|image| image.origin),
            Some(ImageOrigin::Generated)
        );
        Ok(())
    }

    #[test]
    fn late_results_are_discarded() {
        let mut session = session(FixedTransport::new(None, None));
        let stale = session.begin();
        let fresh = session.begin();
        let image = TransientImage::new(PNG_B64.to_string(), "x".to_string(), None);

        assert_eq!(session.accept(stale, Some(image.clone())), Acceptance::Discarded);
        assert_eq!(session.accept(fresh, Some(image.clone())), Acceptance::Installed);
        assert_eq!(session.accept(fresh, Some(image.clone())), Acceptance::Discarded);

        let abandoned = session.begin();
        session.start_over();
        assert_eq!(session.accept(abandoned, Some(image)), Acceptance::Discarded);
        assert_eq!(session.current(), None);
    }

    #[test]
    fn failures_are_classified_and_logged() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let log_path = temp.path().join("activity.jsonl");
        let mut session = session(FixedTransport::failing("Imagen request failed (429): slow down"))
            .with_activity_log(ActivityLog::with_session(&log_path, "s-1"));

        let err = session.generate("a forest", None).expect_err("throttled");
        assert_eq!(err.kind(), FailureKind::RateLimited);

        let rows: Vec<Value> = std::fs::read_to_string(&log_path)?
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["type"], json!("generation_requested"));
        assert_eq!(rows[1]["type"], json!("generation_failed"));
        assert_eq!(rows[1]["kind"], json!("rate_limited"));
        Ok(())
    }

    #[test]
    fn uninitialized_client_never_reaches_transport() {
        let mut session = StudioSession::new(GenerationClient::uninitialized());
        assert_eq!(
            session.generate("a forest", None),
            Err(GenerationError::ClientUninitialized)
        );
        assert_eq!(session.current(), None);
    }
}
