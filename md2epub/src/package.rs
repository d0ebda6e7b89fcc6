//! EPUB 2 implementation of [`PackageBuilder`].
//!
//! [`EpubPackage`] collects metadata, resources and sections in memory and only touches
//! the filesystem for reading source files and in [`PackageBuilder::write`].
//!
//! Archive layout:
//!
//! ```text
//! mimetype                  (stored, first entry)
//! META-INF/container.xml
//! OEBPS/content.opf
//! OEBPS/toc.ncx
//! OEBPS/images/<name>       cover and registered assets
//! OEBPS/css/<name>          stylesheets
//! OEBPS/xhtml/<filename>    one document per section
//! ```
//!
//! Internal paths handed back to callers are relative to `OEBPS/xhtml/`, so they can be
//! written straight into section markup (`../images/<name>`, `../css/<name>`).

use std::collections::{BTreeMap, HashSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use md2epub_core::contract::{BookMetadata, PackageBuilder, PackageError};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const IMAGES_DIR: &str = "images";
const CSS_DIR: &str = "css";
const XHTML_DIR: &str = "xhtml";
const COVER_ID: &str = "cover-image";

#[derive(Debug, Clone)]
struct Resource {
    data: Vec<u8>,
    media_type: &'static str,
}

#[derive(Debug, Clone)]
struct Section {
    filename: String,
    title: String,
    parent: Option<String>,
    markup: String,
    stylesheet: String,
}

#[derive(Debug, Clone, Default)]
struct PackageState {
    metadata: Option<BookMetadata>,
    /// Href of the cover image, relative to `OEBPS/`.
    cover: Option<String>,
    /// Keyed by href relative to `OEBPS/`.
    resources: BTreeMap<String, Resource>,
    /// Registration order; parents always precede their children.
    sections: Vec<Section>,
}

/// In-memory EPUB package, serialised on [`PackageBuilder::write`].
#[derive(Debug, Default)]
pub struct EpubPackage {
    state: Mutex<PackageState>,
}

impl EpubPackage {
    pub fn new() -> Self {
        Self::default()
    }

    async fn add_resource(
        &self,
        dir: &str,
        source: &Path,
        name: &str,
    ) -> Result<String, PackageError> {
        let data = read_source(source).await?;
        let href = format!("{dir}/{name}");
        let mut state = self.state.lock().await;
        if state.resources.contains_key(&href) {
            return Err(PackageError::Duplicate(name.to_string()));
        }
        debug!(%href, bytes = data.len(), "Added resource to package");
        state.resources.insert(
            href.clone(),
            Resource {
                media_type: media_type(name),
                data,
            },
        );
        Ok(format!("../{href}"))
    }

    async fn add_section(&self, section: Section) -> Result<String, PackageError> {
        let mut state = self.state.lock().await;
        if state.sections.iter().any(|s| s.filename == section.filename) {
            return Err(PackageError::Duplicate(section.filename));
        }
        if let Some(parent) = &section.parent {
            if !state.sections.iter().any(|s| &s.filename == parent) {
                return Err(PackageError::UnknownParent(parent.clone()));
            }
        }
        let id = section.filename.clone();
        state.sections.push(section);
        Ok(id)
    }
}

#[async_trait]
impl PackageBuilder for EpubPackage {
    async fn set_metadata(&self, metadata: &BookMetadata) -> Result<(), PackageError> {
        self.state.lock().await.metadata = Some(metadata.clone());
        Ok(())
    }

    async fn set_cover(&self, image: &Path) -> Result<String, PackageError> {
        let name = file_name(image)?;
        let path = self.add_resource(IMAGES_DIR, image, &name).await?;
        self.state.lock().await.cover = Some(format!("{IMAGES_DIR}/{name}"));
        Ok(path)
    }

    async fn add_stylesheet(&self, stylesheet: &Path) -> Result<String, PackageError> {
        let name = file_name(stylesheet)?;
        self.add_resource(CSS_DIR, stylesheet, &name).await
    }

    async fn register_asset(&self, source: &Path, name: &str) -> Result<String, PackageError> {
        self.add_resource(IMAGES_DIR, source, name).await
    }

    async fn register_section(
        &self,
        markup: &str,
        title: &str,
        filename: &str,
        stylesheet: &str,
    ) -> Result<String, PackageError> {
        self.add_section(Section {
            filename: filename.to_string(),
            title: title.to_string(),
            parent: None,
            markup: markup.to_string(),
            stylesheet: stylesheet.to_string(),
        })
        .await
    }

    async fn register_subsection(
        &self,
        parent: &str,
        markup: &str,
        title: &str,
        filename: &str,
        stylesheet: &str,
    ) -> Result<String, PackageError> {
        self.add_section(Section {
            filename: filename.to_string(),
            title: title.to_string(),
            parent: Some(parent.to_string()),
            markup: markup.to_string(),
            stylesheet: stylesheet.to_string(),
        })
        .await
    }

    async fn write(&self, output: &Path) -> Result<(), PackageError> {
        let state = self.state.lock().await.clone();
        let output = output.to_path_buf();
        info!(
            output = %output.display(),
            sections = state.sections.len(),
            resources = state.resources.len(),
            "Writing EPUB package"
        );
        tokio::task::spawn_blocking(move || write_package(&state, &output))
            .await
            .map_err(|e| PackageError::Backend(format!("writer task failed: {e}")))?
    }
}

async fn read_source(source: &Path) -> Result<Vec<u8>, PackageError> {
    tokio::fs::read(source).await.map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PackageError::NotFound(source.to_path_buf()),
        _ => PackageError::Io(e),
    })
}

fn file_name(path: &Path) -> Result<String, PackageError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| PackageError::NotFound(path.to_path_buf()))
}

/// Serialise to a temp file next to `output`, then move it into place.
fn write_package(state: &PackageState, output: &Path) -> Result<(), PackageError> {
    let metadata = state
        .metadata
        .as_ref()
        .ok_or_else(|| PackageError::Backend("book metadata was never set".into()))?;

    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = NamedTempFile::new_in(&dir)?;
    write_archive(state, metadata, &mut tmp)?;
    tmp.persist(output).map_err(|e| PackageError::Io(e.error))?;
    Ok(())
}

fn write_archive<W: Write + io::Seek>(
    state: &PackageState,
    metadata: &BookMetadata,
    writer: W,
) -> Result<(), PackageError> {
    let mut zip = ZipWriter::new(writer);
    let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    let deflated =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut entry = |name: &str, options: SimpleFileOptions, data: &[u8]| -> Result<(), PackageError> {
        zip.start_file(name, options).map_err(backend)?;
        zip.write_all(data)?;
        Ok(())
    };

    entry("mimetype", stored, b"application/epub+zip")?;
    entry("META-INF/container.xml", deflated, CONTAINER_XML.as_bytes())?;
    entry(
        "OEBPS/content.opf",
        deflated,
        generate_opf(state, metadata).as_bytes(),
    )?;
    entry(
        "OEBPS/toc.ncx",
        deflated,
        generate_ncx(state, metadata).as_bytes(),
    )?;
    for (href, resource) in &state.resources {
        entry(&format!("OEBPS/{href}"), deflated, &resource.data)?;
    }
    for section in &state.sections {
        entry(
            &format!("OEBPS/{XHTML_DIR}/{}", section.filename),
            deflated,
            section_document(section, &metadata.language).as_bytes(),
        )?;
    }

    zip.finish().map_err(backend)?;
    Ok(())
}

fn backend(e: zip::result::ZipError) -> PackageError {
    PackageError::Backend(e.to_string())
}

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

fn generate_opf(state: &PackageState, metadata: &BookMetadata) -> String {
    let mut opf = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="BookId">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
"#,
    );
    opf.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        escape_xml(&metadata.title)
    ));
    opf.push_str(&format!(
        "    <dc:creator>{}</dc:creator>\n",
        escape_xml(&metadata.author)
    ));
    opf.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        escape_xml(&metadata.language)
    ));
    opf.push_str(&format!(
        "    <dc:identifier id=\"BookId\">{}</dc:identifier>\n",
        escape_xml(&metadata.identifier)
    ));
    if state.cover.is_some() {
        opf.push_str(&format!("    <meta name=\"cover\" content=\"{COVER_ID}\"/>\n"));
    }
    opf.push_str("  </metadata>\n  <manifest>\n");
    opf.push_str(
        "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n",
    );

    let mut used_ids = HashSet::from(["ncx".to_string(), COVER_ID.to_string()]);
    for (href, resource) in &state.resources {
        let id = if state.cover.as_deref() == Some(href.as_str()) {
            COVER_ID.to_string()
        } else {
            unique_id(&mut used_ids, href)
        };
        opf.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
            id,
            escape_xml(href),
            resource.media_type
        ));
    }
    let mut spine = Vec::with_capacity(state.sections.len());
    for section in &state.sections {
        let href = section_href(section);
        let id = unique_id(&mut used_ids, &href);
        opf.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
            id,
            escape_xml(&href)
        ));
        spine.push(id);
    }

    opf.push_str("  </manifest>\n  <spine toc=\"ncx\">\n");
    for id in &spine {
        opf.push_str(&format!("    <itemref idref=\"{id}\"/>\n"));
    }
    opf.push_str("  </spine>\n</package>\n");
    opf
}

fn generate_ncx(state: &PackageState, metadata: &BookMetadata) -> String {
    let mut ncx = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE ncx PUBLIC "-//NISO//DTD ncx 2005-1//EN" "http://www.daisy.org/z3986/2005/ncx-2005-1.dtd">
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
"#,
    );
    ncx.push_str(&format!(
        "    <meta name=\"dtb:uid\" content=\"{}\"/>\n",
        escape_xml(&metadata.identifier)
    ));
    ncx.push_str(&format!(
        "    <meta name=\"dtb:depth\" content=\"{}\"/>\n",
        nav_depth(&state.sections, None).max(1)
    ));
    ncx.push_str(
        r#"    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
  <docTitle>
"#,
    );
    ncx.push_str(&format!(
        "    <text>{}</text>\n  </docTitle>\n  <navMap>\n",
        escape_xml(&metadata.title)
    ));

    let mut play_order = 1;
    for section in state.sections.iter().filter(|s| s.parent.is_none()) {
        write_nav_point(&mut ncx, &state.sections, section, &mut play_order, 2);
    }

    ncx.push_str("  </navMap>\n</ncx>\n");
    ncx
}

fn write_nav_point(
    ncx: &mut String,
    sections: &[Section],
    section: &Section,
    play_order: &mut usize,
    indent: usize,
) {
    let pad = "  ".repeat(indent);
    ncx.push_str(&format!(
        "{pad}<navPoint id=\"navpoint-{order}\" playOrder=\"{order}\">\n",
        order = play_order
    ));
    ncx.push_str(&format!(
        "{pad}  <navLabel>\n{pad}    <text>{}</text>\n{pad}  </navLabel>\n",
        escape_xml(&section.title)
    ));
    ncx.push_str(&format!(
        "{pad}  <content src=\"{}\"/>\n",
        escape_xml(&section_href(section))
    ));
    *play_order += 1;

    for child in children_of(sections, &section.filename) {
        write_nav_point(ncx, sections, child, play_order, indent + 1);
    }
    ncx.push_str(&format!("{pad}</navPoint>\n"));
}

fn children_of<'a>(sections: &'a [Section], parent: &'a str) -> impl Iterator<Item = &'a Section> {
    sections
        .iter()
        .filter(move |s| s.parent.as_deref() == Some(parent))
}

fn nav_depth(sections: &[Section], parent: Option<&str>) -> usize {
    sections
        .iter()
        .filter(|s| s.parent.as_deref() == parent)
        .map(|s| 1 + nav_depth(sections, Some(s.filename.as_str())))
        .max()
        .unwrap_or(0)
}

fn section_href(section: &Section) -> String {
    format!("{XHTML_DIR}/{}", section.filename)
}

fn section_document(section: &Section, language: &str) -> String {
    let link = if section.stylesheet.is_empty() {
        String::new()
    } else {
        format!(
            "\n    <link rel=\"stylesheet\" type=\"text/css\" href=\"{}\"/>",
            escape_xml(&section.stylesheet)
        )
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="{lang}">
  <head>
    <title>{title}</title>{link}
  </head>
  <body>
{markup}
  </body>
</html>
"#,
        lang = escape_xml(language),
        title = escape_xml(&section.title),
        link = link,
        markup = section.markup
    )
}

fn media_type(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "css" => "text/css",
        _ => "application/octet-stream",
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// XML name derived from an href: anything outside `[A-Za-z0-9_]` becomes `_`.
fn href_to_id(href: &str) -> String {
    let id: String = href
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if id.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        id
    } else {
        format!("id_{id}")
    }
}

/// [`href_to_id`] with a numeric suffix when the id is already taken.
fn unique_id(used: &mut HashSet<String>, href: &str) -> String {
    let base = href_to_id(href);
    let mut id = base.clone();
    let mut n = 2;
    while !used.insert(id.clone()) {
        id = format!("{base}_{n}");
        n += 1;
    }
    id
}
