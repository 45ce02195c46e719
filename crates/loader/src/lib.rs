//! Bulk-load execution: manifest publication and the COPY-based load of a
//! claimed job into its destination table, with terminal status recording.

pub mod error;
pub mod loader;
pub mod manifest;

pub use error::LoaderError;
pub use loader::Loader;
pub use manifest::{Manifest, ManifestEntry, ManifestStore};
