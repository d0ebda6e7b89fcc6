use std::path::PathBuf;

use thiserror::Error;

use crate::contract::{ConvertError, PackageError};

/// Every fatal failure of a book build. Missing assets are not errors; they are
/// reported through [`crate::assets::AssetReport`].
#[derive(Debug, Error)]
pub enum BookError {
    #[error("failed to read directory {}: {source}", path.display())]
    DirectoryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read file {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to convert {}: {source}", path.display())]
    Conversion {
        path: PathBuf,
        #[source]
        source: ConvertError,
    },

    #[error("failed to decode metadata of {}: {source}", path.display())]
    MetadataDecode {
        path: PathBuf,
        #[source]
        source: ConvertError,
    },

    #[error("failed to add image {reference} ({}): {source}", path.display())]
    AssetRegistration {
        reference: String,
        path: PathBuf,
        #[source]
        source: PackageError,
    },

    #[error("failed to create chapter {title:?}: {source}")]
    SectionRegistration {
        title: String,
        #[source]
        source: PackageError,
    },

    #[error("package step '{stage}' failed: {source}")]
    Package {
        stage: &'static str,
        #[source]
        source: PackageError,
    },
}

impl BookError {
    /// Attach the document path to a converter failure, keeping the markup/metadata split.
    pub(crate) fn from_conversion(path: PathBuf, source: ConvertError) -> Self {
        match source {
            ConvertError::Metadata(_) => BookError::MetadataDecode { path, source },
            ConvertError::Markup(_) => BookError::Conversion { path, source },
        }
    }
}
