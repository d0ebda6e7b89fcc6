use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info};

use crate::chapter::Chapter;
use crate::contract::PackageBuilder;
use crate::error::BookError;

const SECTION_EXTENSION: &str = ".xhtml";

/// Register every chapter as a package section, depth-first pre-order.
///
/// Top-level chapters become `<filename>.xhtml`; nested chapters become
/// `<parent without .xhtml>__<filename>.xhtml` and are registered as sub-sections of
/// their parent's filename. Returns the number of sections registered.
pub async fn assemble_sections<P>(
    package: &P,
    chapters: &[Chapter],
    stylesheet: &str,
) -> Result<usize, BookError>
where
    P: PackageBuilder + ?Sized,
{
    info!(chapters = chapters.len(), "Creating chapters");
    let count = assemble_level(package, chapters, stylesheet, None).await?;
    info!(sections = count, "Chapters created");
    Ok(count)
}

/// Section filename for `chapter` under the given parent section filename.
pub fn section_filename(parent: Option<&str>, chapter: &Chapter) -> String {
    match parent {
        Some(parent) => format!(
            "{}__{}{SECTION_EXTENSION}",
            parent.strip_suffix(SECTION_EXTENSION).unwrap_or(parent),
            chapter.filename
        ),
        None => format!("{}{SECTION_EXTENSION}", chapter.filename),
    }
}

fn assemble_level<'a, P>(
    package: &'a P,
    chapters: &'a [Chapter],
    stylesheet: &'a str,
    parent: Option<String>,
) -> BoxFuture<'a, Result<usize, BookError>>
where
    P: PackageBuilder + ?Sized,
{
    async move {
        let parent = parent.as_deref();
        let mut count = 0;
        for chapter in chapters {
            let filename = section_filename(parent, chapter);
            let registered = match parent {
                Some(parent) => {
                    package
                        .register_subsection(
                            parent,
                            &chapter.markup,
                            &chapter.meta.title,
                            &filename,
                            stylesheet,
                        )
                        .await
                }
                None => {
                    package
                        .register_section(&chapter.markup, &chapter.meta.title, &filename, stylesheet)
                        .await
                }
            };
            let section_id = registered.map_err(|source| BookError::SectionRegistration {
                title: chapter.meta.title.clone(),
                source,
            })?;
            debug!(filename = %filename, section = %section_id, parent = ?parent, "Section registered");
            count += 1;

            if !chapter.children.is_empty() {
                count += assemble_level(package, &chapter.children, stylesheet, Some(filename)).await?;
            }
        }
        Ok(count)
    }
    .boxed()
}
