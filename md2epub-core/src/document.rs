//! Reading a single source document: decoding, stripping publishing-platform
//! directives the EPUB renderer does not understand, and finding image references.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::contract::ConvertError;
use crate::error::BookError;

/// Inline attribute lists such as `{: .no_toc }` or `{: .fs-6 .fw-300 }`.
static ATTRIBUTE_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{:[^}]*\}").expect("attribute list pattern is valid"));

/// `![alt](path)`; the path is captured verbatim.
static IMAGE_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[.*?\]\((.*?)\)").expect("image pattern is valid"));

const TOC_MARKER: &str = "- TOC";

/// Read a document from disk and return its cleaned text.
pub async fn read_document(path: &Path) -> Result<String, BookError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| BookError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
    let text = String::from_utf8(bytes).map_err(|e| BookError::Conversion {
        path: path.to_path_buf(),
        source: ConvertError::Markup(format!("document is not valid UTF-8: {e}")),
    })?;
    debug!(path = %path.display(), bytes = text.len(), "Read document");
    Ok(clean_source(&text))
}

/// Remove attribute lists and TOC markers.
///
/// Removal can join fragments into a new match (`{{:a}:b}`), so passes repeat until
/// nothing changes; this keeps `clean_source(clean_source(x)) == clean_source(x)`.
pub fn clean_source(text: &str) -> String {
    let mut current = text.to_owned();
    loop {
        let next = ATTRIBUTE_LIST
            .replace_all(&current, "")
            .replace(TOC_MARKER, "");
        if next == current {
            return current;
        }
        current = next;
    }
}

/// All image paths in document order, duplicates included.
pub fn extract_images(text: &str) -> Vec<String> {
    IMAGE_REFERENCE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strips_attribute_lists_and_toc_marker() {
        let text = "# Title\n{: .no_toc }\n\n1. TOC\n{:toc}\n- TOC\nBody {: .fs-6 }text";
        let cleaned = clean_source(text);
        assert_eq!(cleaned, "# Title\n\n\n1. TOC\n\n\nBody text");
    }

    #[test]
    fn cleaning_reaches_a_fixpoint_for_nested_fragments() {
        assert_eq!(clean_source("a{{:x}:y}b"), "ab");
        assert_eq!(clean_source("- - TOCTOC"), "");
    }

    #[test]
    fn extracts_images_in_order_with_duplicates() {
        let text = "![a](/book/a.png) text ![](b.png)\n![again](/book/a.png)";
        assert_eq!(
            extract_images(text),
            vec!["/book/a.png", "b.png", "/book/a.png"]
        );
    }

    #[test]
    fn ignores_plain_links() {
        assert!(extract_images("[link](/book/a.png)").is_empty());
    }

    proptest! {
        #[test]
        fn cleaning_is_idempotent(text in r"[a-z{}:\- TOC\n]{0,64}") {
            let once = clean_source(&text);
            prop_assert_eq!(clean_source(&once), once);
        }

        #[test]
        fn extraction_returns_every_occurrence(
            paths in proptest::collection::vec(r"/book/[a-z]{1,8}\.png", 0..8),
            filler in r"[a-z ]{0,12}",
        ) {
            let text: String = paths
                .iter()
                .map(|p| format!("{filler}![img]({p}){filler}\n"))
                .collect();
            prop_assert_eq!(extract_images(&text), paths);
        }
    }
}
