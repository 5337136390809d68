use std::io::Write;

use matchstore::{MatchError, Settings};

fn temp_config(name: &str, contents: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("matchstore_{}_{name}.toml", std::process::id()));
    let mut file = std::fs::File::create(&path).expect("create config");
    file.write_all(contents.as_bytes()).expect("write config");
    path
}

#[test]
fn defaults_describe_an_in_memory_store() {
    let settings = Settings::default();
    assert_eq!(settings.database_path, ":memory:");
    assert_eq!(settings.cursor_batch_size, 1000);
    assert_eq!(settings.progress_interval().as_secs(), 15);
    assert_eq!(settings.busy_timeout_ms, 5000);
    assert_eq!(settings.log_filter, "info");
    settings.validate().expect("defaults are valid");
}

#[test]
fn file_values_override_defaults() {
    let path = temp_config("override", "database_path = \"matches.db\"\ncursor_batch_size = 50\n");
    let settings = Settings::load(path.to_str()).expect("load");
    let _ = std::fs::remove_file(&path);
    assert_eq!(settings.database_path, "matches.db");
    assert_eq!(settings.cursor_batch_size, 50);
    assert_eq!(settings.busy_timeout_ms, 5000);
}

#[test]
fn zero_batch_size_is_rejected() {
    let path = temp_config("zero", "cursor_batch_size = 0\n");
    let result = Settings::load(path.to_str());
    let _ = std::fs::remove_file(&path);
    assert!(matches!(result, Err(MatchError::Config(_))));
}

#[test]
fn explicit_config_file_must_exist() {
    let missing = std::env::temp_dir().join("matchstore_missing_config.toml");
    assert!(matches!(Settings::load(missing.to_str()), Err(MatchError::Config(_))));
}
