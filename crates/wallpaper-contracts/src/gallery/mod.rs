mod codec;
mod slot;
mod store;

pub use codec::{decode_collection, encode_collection, GALLERY_SCHEMA_VERSION};
pub use slot::{CollectionSlot, FileSlot, MemorySlot, UndecodableSlot, DEFAULT_SLOT_KEY};
pub use store::{GalleryError, GalleryEvent, GalleryStore, PersistenceState};
