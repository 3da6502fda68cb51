pub mod activity;
pub mod artifact;
pub mod gallery;

pub use artifact::Artifact;
