//! Catalog collaborator: album metadata for a playlist

pub mod client;
pub mod models;

pub use client::{Catalog, FileCatalog, PlaylistCatalog};
pub use models::*;
