//! Chapter tree building: turns a directory of Markdown files (and same-named
//! subdirectories) into an ordered tree of [`Chapter`]s.
//!
//! ```text
//! docs/
//!   intro.md          -> Chapter "intro"
//!   intro/            -> children of "intro"
//!     setup.md
//!   usage.md          -> Chapter "usage" (leaf)
//! ```
//!
//! Siblings are converted concurrently (bounded per directory level) and sorted by their `nav_order` afterwards;
//! the first failure anywhere aborts the whole directory.

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt, TryStreamExt};
use futures::FutureExt;
use tracing::{debug, info};

use crate::assets::DEFAULT_MAX_IN_FLIGHT;
use crate::contract::{ChapterMeta, Converter};
use crate::document::{extract_images, read_document};
use crate::error::BookError;

const SOURCE_EXTENSION: &str = "md";

/// One document plus its nested sub-documents.
#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    /// Source base name without extension, e.g. `introduzione`.
    pub filename: String,
    pub meta: ChapterMeta,
    /// Cleaned Markdown source.
    pub content: String,
    /// Rendered XHTML; image references are rewritten in place by the asset resolver.
    pub markup: String,
    /// Raw image references found in this chapter's own content, in document order.
    pub images: Vec<String>,
    pub children: Vec<Chapter>,
}

impl Chapter {
    /// Number of chapters in this subtree, including `self`.
    pub fn count(&self) -> usize {
        1 + count_chapters(&self.children)
    }
}

/// Number of chapters in a forest.
pub fn count_chapters(chapters: &[Chapter]) -> usize {
    chapters.iter().map(Chapter::count).sum()
}

/// Load the chapters of `dir`, recursing into chapter subdirectories.
pub async fn load_chapters<C>(converter: &C, dir: &Path) -> Result<Vec<Chapter>, BookError>
where
    C: Converter + ?Sized,
{
    let chapters = load_dir(converter, dir.to_path_buf()).await?;
    info!(
        path = %dir.display(),
        chapters = chapters.len(),
        total = count_chapters(&chapters),
        "Chapters loaded"
    );
    Ok(chapters)
}

fn load_dir<'a, C>(converter: &'a C, dir: PathBuf) -> BoxFuture<'a, Result<Vec<Chapter>, BookError>>
where
    C: Converter + ?Sized,
{
    async move {
        debug!(path = %dir.display(), "Loading chapters");
        let files = list_sources(&dir).await?;

        // At most DEFAULT_MAX_IN_FLIGHT siblings at once; results keep enumeration order.
        let mut chapters: Vec<Chapter> = stream::iter(files)
            .map(|file| async move { load_chapter(converter, &file).await })
            .buffered(DEFAULT_MAX_IN_FLIGHT)
            .try_collect()
            .await?;
        chapters.sort_by_key(|chapter| chapter.meta.order);
        Ok(chapters)
    }
    .boxed()
}

/// Markdown files directly inside `dir`, sorted by file name.
async fn list_sources(dir: &Path) -> Result<Vec<PathBuf>, BookError> {
    let read_error = |source| BookError::DirectoryRead {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_error)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_error)? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(SOURCE_EXTENSION) {
            continue;
        }
        // Follows symlinks; dangling links are skipped like any non-file entry.
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => files.push(path),
            _ => debug!(path = %path.display(), "Skipping non-file entry"),
        }
    }
    files.sort();
    Ok(files)
}

async fn load_chapter<C>(converter: &C, path: &Path) -> Result<Chapter, BookError>
where
    C: Converter + ?Sized,
{
    let content = read_document(path).await?;
    let images = extract_images(&content);
    let conversion = converter
        .convert(&content)
        .map_err(|source| BookError::from_conversion(path.to_path_buf(), source))?;

    let filename = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    let children_dir = path.with_extension("");
    let children = if is_dir(&children_dir).await {
        load_dir(converter, children_dir).await?
    } else {
        Vec::new()
    };

    debug!(
        path = %path.display(),
        title = %conversion.meta.title,
        order = conversion.meta.order,
        images = images.len(),
        children = children.len(),
        "Chapter loaded"
    );

    Ok(Chapter {
        filename,
        meta: conversion.meta,
        content,
        markup: conversion.markup,
        images,
        children,
    })
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}
