//! High-level pipeline: orchestrates chapters -> images -> sections -> write.
//!
//! [`build_book`] runs one complete conversion for a [`BookConfig`]:
//!   - loads the chapter tree from `source_dir`
//!   - registers book metadata, cover and stylesheet with the package
//!   - resolves and rewrites image references against `asset_root`
//!   - registers every chapter as a section and writes the package to `output`
//!
//! # Error Handling
//! Fail-fast: the first fatal error of any step is returned and nothing is written.
//! Missing images are the only recoverable condition; they end up in
//! [`BuildReport::missing_images`].

use std::path::PathBuf;

use serde::Serialize;
use tracing::{error, info};

use crate::assets::AssetResolver;
use crate::chapter::load_chapters;
use crate::config::BookConfig;
use crate::contract::{Converter, PackageBuilder};
use crate::error::BookError;
use crate::sections::assemble_sections;

/// Summary of a successful build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildReport {
    pub output: PathBuf,
    /// Top-level chapters.
    pub chapters: usize,
    /// Sections written, i.e. chapters at every depth.
    pub sections: usize,
    pub images_registered: usize,
    pub missing_images: Vec<String>,
    pub remote_images: Vec<String>,
}

pub async fn build_book<C, P>(
    config: &BookConfig,
    converter: &C,
    package: &P,
) -> Result<BuildReport, BookError>
where
    C: Converter + ?Sized,
    P: PackageBuilder + ?Sized,
{
    info!(source_dir = %config.source_dir.display(), "[BUILD] Starting book build");
    let result = run_steps(config, converter, package).await;
    match &result {
        Ok(report) => info!(
            output = %report.output.display(),
            sections = report.sections,
            images = report.images_registered,
            missing = report.missing_images.len(),
            "[BUILD] Book written"
        ),
        Err(e) => error!(error = %e, "[BUILD][ERROR] Book build failed"),
    }
    result
}

async fn run_steps<C, P>(
    config: &BookConfig,
    converter: &C,
    package: &P,
) -> Result<BuildReport, BookError>
where
    C: Converter + ?Sized,
    P: PackageBuilder + ?Sized,
{
    let mut chapters = load_chapters(converter, &config.source_dir).await?;

    package
        .set_metadata(&config.metadata)
        .await
        .map_err(|source| BookError::Package {
            stage: "metadata",
            source,
        })?;
    info!(title = %config.metadata.title, "[BUILD] Metadata configured");

    package
        .set_cover(&config.cover)
        .await
        .map_err(|source| BookError::Package {
            stage: "cover",
            source,
        })?;
    info!(cover = %config.cover.display(), "[BUILD] Cover added");

    let stylesheet = package
        .add_stylesheet(&config.stylesheet)
        .await
        .map_err(|source| BookError::Package {
            stage: "stylesheet",
            source,
        })?;
    info!(stylesheet = %stylesheet, "[BUILD] Stylesheet added");

    let assets = AssetResolver::new(package, &config.asset_root)
        .with_logical_root(config.logical_root.as_str())
        .resolve(&mut chapters)
        .await?;

    let sections = assemble_sections(package, &chapters, &stylesheet).await?;

    package
        .write(&config.output)
        .await
        .map_err(|source| BookError::Package {
            stage: "write",
            source,
        })?;

    Ok(BuildReport {
        output: config.output.clone(),
        chapters: chapters.len(),
        sections,
        images_registered: assets.assets.len(),
        missing_images: assets.missing,
        remote_images: assets.remote,
    })
}
