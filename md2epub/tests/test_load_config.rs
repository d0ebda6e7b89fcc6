use serial_test::serial;
use std::env;
use std::fs::{create_dir_all, write};
use std::path::{Path, PathBuf};
use tempfile::{tempdir, NamedTempFile};

use md2epub::load_config::{load_config, DEFAULT_AUTHOR, DEFAULT_LANGUAGE, DEFAULT_TITLE};

fn clear_env() {
    for key in ["INPUT", "OUTPUT", "COVER", "STYLE", "UUID"] {
        env::remove_var(key);
    }
}

/// Creates input/docs/it plus a cover and stylesheet, returning their paths.
fn create_inputs(root: &Path) -> (PathBuf, PathBuf) {
    create_dir_all(root.join("docs/it")).unwrap();
    let cover = root.join("cover.jpg");
    let style = root.join("style.css");
    write(&cover, b"jpg").unwrap();
    write(&style, b"css").unwrap();
    (cover, style)
}

fn yaml_file(content: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), content).unwrap();
    file
}

#[test]
#[serial]
fn test_env_only_config_uses_defaults_for_metadata() {
    clear_env();
    let tmp = tempdir().unwrap();
    let (cover, style) = create_inputs(tmp.path());
    env::set_var("INPUT", tmp.path());
    env::set_var("OUTPUT", tmp.path().join("book.epub"));
    env::set_var("COVER", &cover);
    env::set_var("STYLE", &style);
    env::set_var("UUID", "1234");

    let config = load_config(None).expect("Config should load");

    assert_eq!(config.source_dir, tmp.path().join("docs/it"));
    assert_eq!(config.asset_root, tmp.path());
    assert_eq!(config.logical_root, "/book");
    assert_eq!(config.cover, cover);
    assert_eq!(config.stylesheet, style);
    assert_eq!(config.metadata.title, DEFAULT_TITLE);
    assert_eq!(config.metadata.author, DEFAULT_AUTHOR);
    assert_eq!(config.metadata.language, DEFAULT_LANGUAGE);
    assert_eq!(config.metadata.identifier, "urn:uuid:1234");
    clear_env();
}

#[test]
#[serial]
fn test_environment_overrides_yaml() {
    clear_env();
    let tmp = tempdir().unwrap();
    let (cover, style) = create_inputs(tmp.path());
    let other = tempdir().unwrap();
    create_inputs(other.path());

    let yaml = yaml_file(&format!(
        "input: {}\noutput: {}\ncover: {}\nstyle: {}\ntitle: Dal file\nlogical_root: /site\nuuid: from-yaml\n",
        other.path().display(),
        other.path().join("yaml.epub").display(),
        cover.display(),
        style.display(),
    ));
    env::set_var("INPUT", tmp.path());

    let config = load_config(Some(yaml.path())).expect("Config should load");

    assert_eq!(config.asset_root, tmp.path(), "INPUT wins over yaml");
    assert_eq!(config.output, other.path().join("yaml.epub"));
    assert_eq!(config.metadata.title, "Dal file");
    assert_eq!(config.logical_root, "/site");
    assert_eq!(config.metadata.identifier, "urn:uuid:from-yaml");
    clear_env();
}

#[test]
#[serial]
fn test_missing_uuid_generates_identifier() {
    clear_env();
    let tmp = tempdir().unwrap();
    let (cover, style) = create_inputs(tmp.path());
    env::set_var("INPUT", tmp.path());
    env::set_var("OUTPUT", tmp.path().join("book.epub"));
    env::set_var("COVER", &cover);
    env::set_var("STYLE", &style);

    let first = load_config(None).unwrap().metadata.identifier;
    let second = load_config(None).unwrap().metadata.identifier;

    assert!(first.starts_with("urn:uuid:"));
    assert_eq!(first.len(), "urn:uuid:".len() + 36);
    assert_ne!(first, second);
    clear_env();
}

#[test]
#[serial]
fn test_missing_markdown_directory_is_rejected() {
    clear_env();
    let tmp = tempdir().unwrap();
    env::set_var("INPUT", tmp.path().join("nope"));

    let err = load_config(None).unwrap_err();
    assert!(err.to_string().contains("does not exist"), "got: {err}");
    clear_env();
}

#[test]
#[serial]
fn test_missing_cover_and_bad_output_dir_are_rejected() {
    clear_env();
    let tmp = tempdir().unwrap();
    let (_, style) = create_inputs(tmp.path());
    env::set_var("INPUT", tmp.path());
    env::set_var("STYLE", &style);
    env::set_var("OUTPUT", tmp.path().join("book.epub"));
    env::set_var("COVER", tmp.path().join("missing.jpg"));

    let err = load_config(None).unwrap_err();
    assert!(format!("{err:#}").contains("cover"), "got: {err:#}");

    env::set_var("COVER", tmp.path().join("cover.jpg"));
    env::set_var("OUTPUT", tmp.path().join("no/such/dir/book.epub"));
    let err = load_config(None).unwrap_err();
    assert!(err.to_string().contains("output directory"), "got: {err}");
    clear_env();
}

#[test]
#[serial]
fn test_unreadable_config_file_is_an_error() {
    clear_env();
    let err = load_config(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));

    let broken = yaml_file("input: [unterminated\n");
    let err = load_config(Some(broken.path())).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config YAML"));
}
