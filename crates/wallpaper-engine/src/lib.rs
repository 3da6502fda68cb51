//! Generation client, studio session and supporting plumbing for the wallpaper studio.
//!
//! The gallery itself lives in `wallpaper-contracts`; this crate talks to the remote
//! image service and moves results between the user and the gallery.

pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod export;
pub mod session;
pub mod suggest;
pub mod transport;

pub use client::GenerationClient;
pub use config::StudioConfig;
pub use error::{FailureKind, GenerationError};
pub use session::{Acceptance, ImageOrigin, SaveOutcome, StudioSession, TransientImage};
pub use transport::{GenerativeTransport, HttpTransport};
