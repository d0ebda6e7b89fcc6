use std::fs::{write, File};
use std::io::Read;
use std::path::Path;

use md2epub::package::EpubPackage;
use md2epub_core::contract::{BookMetadata, PackageBuilder, PackageError};
use tempfile::tempdir;
use zip::ZipArchive;

fn metadata() -> BookMetadata {
    BookMetadata {
        title: "Il manuale & co".into(),
        author: "Community".into(),
        language: "it".into(),
        identifier: "urn:uuid:11111111-2222-3333-4444-555555555555".into(),
    }
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> String {
    let mut content = String::new();
    archive
        .by_name(name)
        .unwrap_or_else(|_| panic!("missing entry {name}"))
        .read_to_string(&mut content)
        .unwrap();
    content
}

async fn populated_package(root: &Path) -> EpubPackage {
    write(root.join("cover.jpg"), b"jpg").unwrap();
    write(root.join("style.css"), b"body {}").unwrap();
    write(root.join("diagram.png"), b"png").unwrap();

    let package = EpubPackage::new();
    package.set_metadata(&metadata()).await.unwrap();
    assert_eq!(
        package.set_cover(&root.join("cover.jpg")).await.unwrap(),
        "../images/cover.jpg"
    );
    let css = package.add_stylesheet(&root.join("style.css")).await.unwrap();
    assert_eq!(css, "../css/style.css");
    let image = package
        .register_asset(&root.join("diagram.png"), "book__diagram.png")
        .await
        .unwrap();
    assert_eq!(image, "../images/book__diagram.png");

    let parent = package
        .register_section(
            &format!("<p><img src=\"{image}\" alt=\"\" /></p>"),
            "Parent",
            "parent.xhtml",
            &css,
        )
        .await
        .unwrap();
    package
        .register_subsection(&parent, "<p>child</p>", "Child", "parent__child.xhtml", &css)
        .await
        .unwrap();
    package
        .register_section("<p>last</p>", "Last", "last.xhtml", &css)
        .await
        .unwrap();
    package
}

#[tokio::test]
async fn test_written_epub_has_expected_layout() {
    let tmp = tempdir().unwrap();
    let package = populated_package(tmp.path()).await;
    let output = tmp.path().join("book.epub");

    package.write(&output).await.expect("write should succeed");

    let mut archive = ZipArchive::new(File::open(&output).unwrap()).unwrap();
    {
        let first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), zip::CompressionMethod::Stored);
    }
    assert_eq!(read_entry(&mut archive, "mimetype"), "application/epub+zip");
    assert!(read_entry(&mut archive, "META-INF/container.xml").contains("OEBPS/content.opf"));

    let opf = read_entry(&mut archive, "OEBPS/content.opf");
    assert!(opf.contains("<dc:title>Il manuale &amp; co</dc:title>"));
    assert!(opf.contains("<meta name=\"cover\" content=\"cover-image\"/>"));
    assert!(opf.contains("id=\"cover-image\" href=\"images/cover.jpg\" media-type=\"image/jpeg\""));
    assert!(opf.contains("href=\"images/book__diagram.png\" media-type=\"image/png\""));
    let spine: Vec<_> = opf
        .lines()
        .filter(|l| l.contains("<itemref"))
        .map(str::trim)
        .collect();
    assert_eq!(
        spine,
        vec![
            "<itemref idref=\"xhtml_parent_xhtml\"/>",
            "<itemref idref=\"xhtml_parent__child_xhtml\"/>",
            "<itemref idref=\"xhtml_last_xhtml\"/>",
        ]
    );

    let ncx = read_entry(&mut archive, "OEBPS/toc.ncx");
    assert!(ncx.contains("<meta name=\"dtb:depth\" content=\"2\"/>"));
    let parent_open = ncx.find("<content src=\"xhtml/parent.xhtml\"/>").unwrap();
    let child = ncx.find("<content src=\"xhtml/parent__child.xhtml\"/>").unwrap();
    let first_close = ncx.find("</navPoint>").unwrap();
    let last = ncx.find("<content src=\"xhtml/last.xhtml\"/>").unwrap();
    assert!(parent_open < child && child < first_close && first_close < last);

    let section = read_entry(&mut archive, "OEBPS/xhtml/parent.xhtml");
    assert!(section.contains("href=\"../css/style.css\""));
    assert!(section.contains("src=\"../images/book__diagram.png\""));
    assert_eq!(read_entry(&mut archive, "OEBPS/images/book__diagram.png"), "png");
    assert_eq!(read_entry(&mut archive, "OEBPS/css/style.css"), "body {}");
}

#[tokio::test]
async fn test_duplicate_and_unknown_parent_are_rejected() {
    let tmp = tempdir().unwrap();
    let package = populated_package(tmp.path()).await;

    let err = package
        .register_section("<p/>", "Again", "parent.xhtml", "")
        .await
        .unwrap_err();
    assert!(matches!(err, PackageError::Duplicate(name) if name == "parent.xhtml"));

    let err = package
        .register_subsection("ghost.xhtml", "<p/>", "Orphan", "ghost__x.xhtml", "")
        .await
        .unwrap_err();
    assert!(matches!(err, PackageError::UnknownParent(name) if name == "ghost.xhtml"));

    let err = package
        .register_asset(&tmp.path().join("diagram.png"), "book__diagram.png")
        .await
        .unwrap_err();
    assert!(matches!(err, PackageError::Duplicate(_)));
}

#[tokio::test]
async fn test_missing_asset_is_not_found() {
    let tmp = tempdir().unwrap();
    let package = EpubPackage::new();
    let missing = tmp.path().join("gone.png");

    let err = package.register_asset(&missing, "gone.png").await.unwrap_err();
    assert!(matches!(err, PackageError::NotFound(path) if path == missing));
}

#[tokio::test]
async fn test_write_without_metadata_fails_and_leaves_no_file() {
    let tmp = tempdir().unwrap();
    let package = EpubPackage::new();
    let output = tmp.path().join("book.epub");

    let err = package.write(&output).await.unwrap_err();
    assert!(matches!(err, PackageError::Backend(_)));
    assert!(!output.exists());
}

#[tokio::test]
async fn test_manifest_ids_are_unique_xml_names() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    let package = EpubPackage::new();
    package.set_metadata(&metadata()).await.unwrap();
    for name in ["a-b.png", "a_b.png", "caffè (1)+%.png"] {
        write(root.join(name), b"png").unwrap();
        package.register_asset(&root.join(name), name).await.unwrap();
    }
    package
        .register_section("<p/>", "A", "a-b.xhtml", "")
        .await
        .unwrap();
    package
        .register_section("<p/>", "B", "a_b.xhtml", "")
        .await
        .unwrap();
    let output = root.join("ids.epub");
    package.write(&output).await.unwrap();

    let mut archive = ZipArchive::new(File::open(&output).unwrap()).unwrap();
    let opf = read_entry(&mut archive, "OEBPS/content.opf");
    let attribute = |line: &str, name: &str| {
        let start = line.find(&format!("{name}=\"")).unwrap() + name.len() + 2;
        line[start..start + line[start..].find('"').unwrap()].to_string()
    };
    let ids: Vec<String> = opf
        .lines()
        .filter(|l| l.contains("<item "))
        .map(|l| attribute(l, "id"))
        .collect();
    let spine: Vec<String> = opf
        .lines()
        .filter(|l| l.contains("<itemref "))
        .map(|l| attribute(l, "idref"))
        .collect();

    assert_eq!(ids.len(), 6, "ncx, three images, two sections: {ids:?}");
    let unique: std::collections::HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len(), "duplicate ids: {ids:?}");
    for id in &ids {
        assert!(id.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_'), "{id}");
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'), "{id}");
    }
    assert_eq!(spine.len(), 2);
    assert!(spine.iter().all(|idref| ids.contains(idref)));
    assert_ne!(spine[0], spine[1]);
}
