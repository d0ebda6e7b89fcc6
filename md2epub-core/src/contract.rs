//! # contract: collaborator interfaces for the book pipeline
//!
//! This module defines the two capabilities the core consumes but does not implement
//! itself, together with the plain data types that cross those boundaries:
//!
//! - [`Converter`]: turns cleaned Markdown source into XHTML markup plus front-matter
//!   metadata. The default implementation is [`crate::markdown::MarkdownConverter`].
//! - [`PackageBuilder`]: the append-only sink that receives metadata, cover, stylesheet,
//!   binary assets and sections, and finally serialises the package to disk.
//!
//! ## Mocking & Testing
//! Both traits are annotated for `mockall`, so tests get `MockConverter` and
//! `MockPackageBuilder` (exported under the `test-export-mocks` feature).
//!
//! ## Implementing a PackageBuilder
//! - Methods take `&self`; implementors guard their state internally and must accept
//!   concurrent `register_asset` calls.
//! - Return [`PackageError::NotFound`] when an asset file vanished, so callers can treat
//!   it as a soft failure.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metadata decoded from a chapter's YAML front-matter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChapterMeta {
    /// Human-readable chapter title.
    pub title: String,
    /// Position among siblings; lower comes first.
    #[serde(rename = "nav_order")]
    pub order: i64,
}

/// Result of converting one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub markup: String,
    pub meta: ChapterMeta,
}

/// Book-level metadata handed to the package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
    pub language: String,
    /// Unique identifier, e.g. `urn:uuid:...`.
    pub identifier: String,
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("markup conversion failed: {0}")]
    Markup(String),
    #[error("front-matter could not be decoded: {0}")]
    Metadata(String),
}

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("name already used in package: {0}")]
    Duplicate(String),
    #[error("unknown parent section: {0}")]
    UnknownParent(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("package backend error: {0}")]
    Backend(String),
}

/// Converts cleaned document text into markup and metadata.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Converter: Send + Sync {
    fn convert(&self, source: &str) -> Result<Conversion, ConvertError>;
}

/// Sink for everything that ends up inside the output package.
///
/// Section ids and internal paths returned here are opaque to the core; they are
/// only fed back into later calls (as parent ids) or written into markup.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait PackageBuilder: Send + Sync {
    async fn set_metadata(&self, metadata: &BookMetadata) -> Result<(), PackageError>;

    /// Add the cover image; returns its internal path.
    async fn set_cover(&self, image: &Path) -> Result<String, PackageError>;

    /// Add a stylesheet; returns the internal path sections should link to.
    async fn add_stylesheet(&self, stylesheet: &Path) -> Result<String, PackageError>;

    /// Copy a binary asset into the package under `name`; returns its internal path.
    async fn register_asset(&self, source: &Path, name: &str) -> Result<String, PackageError>;

    /// Register a top-level section; returns its section id.
    async fn register_section(
        &self,
        markup: &str,
        title: &str,
        filename: &str,
        stylesheet: &str,
    ) -> Result<String, PackageError>;

    /// Register a section nested under `parent`; returns its section id.
    async fn register_subsection(
        &self,
        parent: &str,
        markup: &str,
        title: &str,
        filename: &str,
        stylesheet: &str,
    ) -> Result<String, PackageError>;

    /// Serialise the whole package to `output`.
    async fn write(&self, output: &Path) -> Result<(), PackageError>;
}
