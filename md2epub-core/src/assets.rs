//! Asset resolution: finds every image referenced anywhere in the chapter tree,
//! copies each unique one into the package exactly once, then rewrites the markup
//! of all chapters to point at the package-internal copies.
//!
//! Resolution runs in two phases separated by a barrier:
//! 1. collect + register, concurrently and bounded by `max_in_flight`;
//! 2. rewrite, which only starts once every registration has finished.
//!
//! Images whose file does not exist are a soft failure: they are logged, listed in
//! the [`AssetReport`] and their references stay untouched in the markup.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use futures::stream::{self, TryStreamExt};
use pulldown_cmark_escape::{escape_href, escape_html};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chapter::Chapter;
use crate::contract::{PackageBuilder, PackageError};
use crate::error::BookError;

pub const DEFAULT_LOGICAL_ROOT: &str = "/book";
pub const DEFAULT_MAX_IN_FLIGHT: usize = 10;

const NAME_SEPARATOR: &str = "__";
const REMOTE_SCHEMES: [&str; 3] = ["http://", "https://", "data:"];

/// Outcome of a resolution run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssetReport {
    /// Raw reference -> internal path, one entry per registered image.
    pub assets: BTreeMap<String, String>,
    /// Raw references whose file was not found, sorted.
    pub missing: Vec<String>,
    /// Remote references left as they are, sorted.
    pub remote: Vec<String>,
}

pub struct AssetResolver<'a, P: PackageBuilder + ?Sized> {
    package: &'a P,
    base_path: PathBuf,
    logical_root: String,
    max_in_flight: usize,
    registered: Mutex<BTreeMap<String, String>>,
    missing: Mutex<Vec<String>>,
    remote: Mutex<Vec<String>>,
}

impl<'a, P: PackageBuilder + ?Sized> AssetResolver<'a, P> {
    /// `base_path` is the directory that the logical root (`/book`) stands for.
    pub fn new(package: &'a P, base_path: impl Into<PathBuf>) -> Self {
        Self {
            package,
            base_path: base_path.into(),
            logical_root: DEFAULT_LOGICAL_ROOT.to_string(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            registered: Mutex::new(BTreeMap::new()),
            missing: Mutex::new(Vec::new()),
            remote: Mutex::new(Vec::new()),
        }
    }

    pub fn with_logical_root(mut self, logical_root: impl Into<String>) -> Self {
        let root = logical_root.into();
        self.logical_root = root.trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Register every unique image of the tree and rewrite all chapter markup.
    pub async fn resolve(self, chapters: &mut [Chapter]) -> Result<AssetReport, BookError> {
        let unique = collect_unique_images(chapters);
        debug!(unique = unique.len(), "Collected image references");

        stream::iter(unique.iter().map(Ok::<_, BookError>))
            .try_for_each_concurrent(self.max_in_flight, |reference| self.register(reference))
            .await?;

        // Barrier passed: every registration has completed.
        let mut report = AssetReport {
            assets: self.registered.into_inner(),
            missing: self.missing.into_inner(),
            remote: self.remote.into_inner(),
        };
        report.missing.sort();
        report.remote.sort();

        rewrite_markup(chapters, &report.assets);

        info!(
            registered = report.assets.len(),
            missing = report.missing.len(),
            remote = report.remote.len(),
            "Images processed"
        );
        if !report.missing.is_empty() {
            warn!(count = report.missing.len(), "Some images were not found");
        }
        Ok(report)
    }

    async fn register(&self, reference: &str) -> Result<(), BookError> {
        let Some(path) = self.filesystem_path(reference) else {
            debug!(reference = %reference, "Leaving remote image untouched");
            self.remote.lock().await.push(reference.to_string());
            return Ok(());
        };

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                self.record_missing(reference, &path).await;
                return Ok(());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.record_missing(reference, &path).await;
                return Ok(());
            }
            Err(e) => {
                return Err(BookError::AssetRegistration {
                    reference: reference.to_string(),
                    path,
                    source: PackageError::Io(e),
                })
            }
        }

        let name = internal_name(reference);
        match self.package.register_asset(&path, &name).await {
            Ok(internal) => {
                debug!(path = %path.display(), internal = %internal, "Image added");
                self.registered
                    .lock()
                    .await
                    .insert(reference.to_string(), internal);
                Ok(())
            }
            Err(PackageError::NotFound(_)) => {
                self.record_missing(reference, &path).await;
                Ok(())
            }
            Err(source) => Err(BookError::AssetRegistration {
                reference: reference.to_string(),
                path,
                source,
            }),
        }
    }

    async fn record_missing(&self, reference: &str, path: &Path) {
        warn!(path = %path.display(), reference = %reference, "Image not found, skipping");
        self.missing.lock().await.push(reference.to_string());
    }

    /// Map a raw reference to a file on disk; `None` for remote references.
    fn filesystem_path(&self, reference: &str) -> Option<PathBuf> {
        if REMOTE_SCHEMES
            .iter()
            .any(|scheme| reference.starts_with(scheme))
        {
            return None;
        }

        if let Some(rest) = strip_logical_root(reference, &self.logical_root) {
            return Some(self.base_path.join(rest.trim_start_matches('/')));
        }

        let path = Path::new(reference);
        if path.is_absolute() {
            Some(path.to_path_buf())
        } else {
            Some(self.base_path.join(path))
        }
    }
}

/// Strip `root` only when it is a whole leading path segment: `/book/x.png` matches
/// `/book`, `/bookshelf/x.png` does not.
fn strip_logical_root<'r>(reference: &'r str, root: &str) -> Option<&'r str> {
    if root.is_empty() {
        return None;
    }
    let rest = reference.strip_prefix(root)?;
    (rest.is_empty() || rest.starts_with('/')).then_some(rest)
}

/// Flattened package name: leading separators dropped, the rest replaced by `__`.
pub fn internal_name(reference: &str) -> String {
    reference
        .trim_start_matches(['/', '\\'])
        .replace(['/', '\\'], NAME_SEPARATOR)
}

/// Unique image references of the whole tree, in depth-first pre-order of first use.
pub fn collect_unique_images(chapters: &[Chapter]) -> Vec<String> {
    fn visit<'c>(chapters: &'c [Chapter], seen: &mut HashSet<&'c str>, out: &mut Vec<String>) {
        for chapter in chapters {
            for image in &chapter.images {
                if seen.insert(image.as_str()) {
                    out.push(image.clone());
                }
            }
            visit(&chapter.children, seen, out);
        }
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    visit(chapters, &mut seen, &mut out);
    out
}

/// Replace every registered reference in the markup of all chapters and descendants.
///
/// Rendered markup carries references in escaped form: percent-encoded inside `src`
/// attributes, entity-escaped where `&` or quotes occur. Each reference is matched in
/// its href form, its HTML-escaped form and verbatim, and the internal path is
/// written back escaped the same way.
///
/// Each document is scanned once, trying longer patterns first at every position,
/// so a reference that prefixes another one cannot rewrite part of it and inserted
/// internal paths are never scanned again.
pub fn rewrite_markup(chapters: &mut [Chapter], assets: &BTreeMap<String, String>) {
    let replacements = replacement_table(assets);

    fn visit(chapters: &mut [Chapter], replacements: &[(String, String)]) {
        for chapter in chapters {
            if replacements
                .iter()
                .any(|(pattern, _)| chapter.markup.contains(pattern.as_str()))
            {
                chapter.markup = replace_once(&chapter.markup, replacements);
            }
            visit(&mut chapter.children, replacements);
        }
    }

    visit(chapters, &replacements);
}

/// `(pattern, replacement)` pairs, longest pattern first; the first pair claiming a
/// pattern wins.
fn replacement_table(assets: &BTreeMap<String, String>) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    let mut table = Vec::new();
    for (raw, internal) in assets.iter().filter(|(raw, _)| !raw.is_empty()) {
        let forms = [
            (href_escaped(raw), href_escaped(internal)),
            (html_escaped(raw), html_escaped(internal)),
            (raw.clone(), html_escaped(internal)),
        ];
        for (pattern, replacement) in forms {
            if seen.insert(pattern.clone()) {
                table.push((pattern, replacement));
            }
        }
    }
    table.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
    table
}

fn href_escaped(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    // Writing into a String cannot fail.
    let _ = escape_href(&mut out, s);
    out
}

fn html_escaped(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let _ = escape_html(&mut out, s);
    out
}

fn replace_once(markup: &str, replacements: &[(String, String)]) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut rest = markup;
    'scan: while let Some(ch) = rest.chars().next() {
        for (pattern, replacement) in replacements {
            if let Some(tail) = rest.strip_prefix(pattern.as_str()) {
                out.push_str(replacement);
                rest = tail;
                continue 'scan;
            }
        }
        out.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
    out
}
