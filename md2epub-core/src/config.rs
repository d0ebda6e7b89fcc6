use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::contract::BookMetadata;

/// Everything one book build needs; paths are expected to be validated already.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookConfig {
    /// Directory holding the top-level chapter files.
    pub source_dir: PathBuf,
    /// Directory the logical root of image references stands for.
    pub asset_root: PathBuf,
    /// Site prefix carried by image references, e.g. `/book`.
    pub logical_root: String,
    pub output: PathBuf,
    pub cover: PathBuf,
    pub stylesheet: PathBuf,
    pub metadata: BookMetadata,
}

impl BookConfig {
    pub fn trace_loaded(&self) {
        info!(
            source_dir = %self.source_dir.display(),
            output = %self.output.display(),
            title = %self.metadata.title,
            "Loaded BookConfig"
        );
        debug!(?self, "BookConfig loaded (full debug)");
    }
}
