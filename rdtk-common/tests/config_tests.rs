//! Configuration loading and root folder resolution tests
//!
//! Tests that manipulate RDTK_ROOT_FOLDER are marked #[serial] so they never
//! race on process environment.

use rdtk_common::config::{
    prepare_root_folder, resolve_root_folder, write_toml_config, TomlConfig, DATABASE_FILE_NAME,
    ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_missing_config_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = TomlConfig::load(&temp_dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_write_then_load_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("conf").join("rdtk.toml");

    let mut config = TomlConfig::default();
    config.migration.batch_size = Some(10);
    config.database.max_lock_wait_ms = Some(900);

    write_toml_config(&config, &path).unwrap();
    let loaded = TomlConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
#[serial]
fn test_env_overrides_toml_root_folder() {
    env::set_var(ROOT_FOLDER_ENV, "/from/env");
    let toml_config = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    let resolved = resolve_root_folder(None, &toml_config);
    env::remove_var(ROOT_FOLDER_ENV);

    assert_eq!(resolved, PathBuf::from("/from/env"));
}

#[test]
#[serial]
fn test_toml_root_folder_used_without_env() {
    env::remove_var(ROOT_FOLDER_ENV);
    let toml_config = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    assert_eq!(
        resolve_root_folder(None, &toml_config),
        PathBuf::from("/from/toml")
    );
}

#[test]
fn test_prepare_root_folder_creates_directory() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("rdtk-root");

    let db_path = prepare_root_folder(&root).unwrap();
    assert!(root.is_dir());
    assert_eq!(db_path, root.join(DATABASE_FILE_NAME));
}
