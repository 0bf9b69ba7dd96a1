//! Object storage for generated media variants.

pub mod client;
pub mod error;
pub mod store;

pub use client::{S3Config, S3MediaStore};
pub use error::{StorageError, StorageResult};
pub use store::{ObjectStore, StoredObject};
