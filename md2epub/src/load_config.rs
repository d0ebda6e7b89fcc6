/// `load_config` module: builds the validated [`BookConfig`] for one conversion run.
///
/// # Sources (lowest to highest precedence)
/// 1. Built-in defaults (see the `DEFAULT_*` constants)
/// 2. An optional YAML file passed with `--config`
/// 3. Environment variables `INPUT`, `OUTPUT`, `COVER`, `STYLE`, `UUID`
///
/// `.env` files are loaded by `main` before this runs, so they count as environment.
///
/// # Validation
/// The Markdown directory must exist, cover and stylesheet must be files and the
/// output directory must exist. Every failure is an `anyhow::Error` naming the path.
use anyhow::{bail, Context, Result};
use md2epub_core::assets::DEFAULT_LOGICAL_ROOT;
use md2epub_core::config::BookConfig;
use md2epub_core::contract::BookMetadata;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const DEFAULT_INPUT: &str = "/tmp/book";
pub const DEFAULT_DOCS_DIR: &str = "docs/it";
pub const DEFAULT_OUTPUT: &str = "./il-manuale-del-buon-dev.epub";
pub const DEFAULT_COVER: &str = "./assets/cover.jpg";
pub const DEFAULT_STYLE: &str = "./assets/style.css";
pub const DEFAULT_TITLE: &str = "Il manuale del buon dev";
pub const DEFAULT_AUTHOR: &str = "Community";
pub const DEFAULT_LANGUAGE: &str = "it";

/// YAML-side configuration; every key is optional.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    /// Root of the book repository; image references under the logical root resolve here.
    pub input: Option<PathBuf>,
    /// Markdown directory, relative to `input`.
    pub docs_dir: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub cover: Option<PathBuf>,
    pub style: Option<PathBuf>,
    pub uuid: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub language: Option<String>,
    pub logical_root: Option<String>,
}

/// Load, merge and validate the configuration.
pub fn load_config(path: Option<&Path>) -> Result<BookConfig> {
    let mut file = match path {
        Some(path) => read_file_config(path)?,
        None => FileConfig::default(),
    };
    apply_env_overrides(&mut file);

    let input = file.input.unwrap_or_else(|| PathBuf::from(DEFAULT_INPUT));
    let docs_dir = file
        .docs_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DOCS_DIR));
    let config = BookConfig {
        source_dir: input.join(docs_dir),
        asset_root: input,
        logical_root: file
            .logical_root
            .unwrap_or_else(|| DEFAULT_LOGICAL_ROOT.to_string()),
        output: file.output.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
        cover: file.cover.unwrap_or_else(|| PathBuf::from(DEFAULT_COVER)),
        stylesheet: file.style.unwrap_or_else(|| PathBuf::from(DEFAULT_STYLE)),
        metadata: BookMetadata {
            title: file.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            author: file.author.unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
            language: file
                .language
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            identifier: identifier(file.uuid),
        },
    };

    validate(&config)?;
    config.trace_loaded();
    Ok(config)
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    info!(config_path = ?path, "Loading configuration from file");
    let content = fs::read_to_string(path).map_err(|e| {
        error!(error = ?e, config_path = ?path, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path, e)
    })?;
    let parsed: Option<FileConfig> = serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })?;
    info!(config_path = ?path, "Parsed config YAML successfully");
    // An empty file parses as null.
    Ok(parsed.unwrap_or_default())
}

fn apply_env_overrides(file: &mut FileConfig) {
    if let Some(value) = env_value("INPUT") {
        file.input = Some(value.into());
    }
    if let Some(value) = env_value("OUTPUT") {
        file.output = Some(value.into());
    }
    if let Some(value) = env_value("COVER") {
        file.cover = Some(value.into());
    }
    if let Some(value) = env_value("STYLE") {
        file.style = Some(value.into());
    }
    if let Some(value) = env_value("UUID") {
        file.uuid = Some(value);
    }
}

fn env_value(key: &str) -> Option<String> {
    let value = std::env::var(key).ok().filter(|v| !v.trim().is_empty())?;
    info!(var = key, "Using value from environment");
    Some(value)
}

fn identifier(uuid: Option<String>) -> String {
    let uuid = uuid.unwrap_or_else(|| {
        let generated = uuid::Uuid::new_v4().to_string();
        warn!(uuid = %generated, "UUID not configured, generated a new one");
        generated
    });
    if uuid.starts_with("urn:") {
        uuid
    } else {
        format!("urn:uuid:{uuid}")
    }
}

fn validate(config: &BookConfig) -> Result<()> {
    if !config.source_dir.is_dir() {
        error!(path = %config.source_dir.display(), "Markdown directory not found");
        bail!(
            "Markdown directory {} does not exist",
            config.source_dir.display()
        );
    }
    for (what, path) in [("cover", &config.cover), ("stylesheet", &config.stylesheet)] {
        let meta = fs::metadata(path)
            .with_context(|| format!("{what} {} does not exist", path.display()))?;
        if !meta.is_file() {
            bail!("{what} {} is not a file", path.display());
        }
    }
    let parent = match config.output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        bail!(
            "output directory {} does not exist",
            parent.display()
        );
    }
    Ok(())
}
