//! # md2epub CLI Interface (Module)
//!
//! Command parsing and orchestration for the `md2epub` binary. All conversion logic
//! (chapter tree, image resolution, section assembly) lives in [`md2epub_core`]; this
//! module only wires configuration, the Markdown converter and the EPUB package together.
//!
//! ## How To Use
//! - From the shell: `md2epub build [--config book.yaml]`, see `--help`.
//! - Programmatically or from tests: call [`run`] with a constructed [`Cli`].
//!
//! Settings come from defaults, the optional YAML file and the `INPUT`, `OUTPUT`,
//! `COVER`, `STYLE` and `UUID` environment variables, see [`crate::load_config`].
use crate::load_config::load_config;
use crate::package::EpubPackage;
use anyhow::Result;
use clap::{Parser, Subcommand};
use md2epub_core::build_book;
use md2epub_core::markdown::MarkdownConverter;
use std::path::PathBuf;

/// CLI for md2epub: bind a Markdown documentation tree into an EPUB book.
#[derive(Parser)]
#[clap(
    name = "md2epub",
    version,
    about = "Convert a directory tree of Markdown chapters into a single EPUB book"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the EPUB from the configured Markdown directory
    Build {
        /// Optional YAML config file; environment variables take precedence over it
        #[clap(long)]
        config: Option<PathBuf>,
    },
}

/// Async CLI entrypoint shared by `main` and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("build_started");

    match cli.command {
        Commands::Build { config } => {
            let config = load_config(config.as_deref())?;
            tracing::info!(command = "build", "Starting book build");
            let converter = MarkdownConverter::default();
            let package = EpubPackage::new();
            match build_book(&config, &converter, &package).await {
                Ok(report) => {
                    tracing::debug!(
                        command = "build",
                        report = %serde_json::to_string(&report).unwrap_or_default(),
                        "Build report"
                    );
                    println!(
                        "Book written to {} ({} chapters, {} sections, {} images, {} missing)",
                        report.output.display(),
                        report.chapters,
                        report.sections,
                        report.images_registered,
                        report.missing_images.len()
                    );
                    for missing in &report.missing_images {
                        println!("missing image: {missing}");
                    }
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "build", error = %e, "Build failed");
                    Err(anyhow::Error::new(e).context("book build failed"))
                }
            }
        }
    }
}
