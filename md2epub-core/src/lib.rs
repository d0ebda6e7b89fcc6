#![doc = "md2epub-core: core pipeline library for md2epub."]

//! This crate contains the document-tree builder and the asset pipeline that turn a
//! directory of Markdown chapters into an ordered, markup-finalised chapter tree,
//! plus the orchestration that feeds that tree into an EPUB package.
//!
//! Package writing and configuration loading live in the `md2epub` crate; this crate
//! only depends on the [`contract::Converter`] and [`contract::PackageBuilder`] traits.
//!
//! # Usage
//! Call [`book::build_book`] with a [`config::BookConfig`], a converter (usually
//! [`markdown::MarkdownConverter`]) and a package builder.

pub mod assets;
pub mod book;
pub mod chapter;
pub mod config;
pub mod contract;
pub mod document;
pub mod error;
pub mod markdown;
pub mod sections;

pub use book::{build_book, BuildReport};
pub use chapter::{load_chapters, Chapter};
pub use error::BookError;
