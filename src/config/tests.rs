use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tempfile::TempDir;

use crate::config::builder::ConfigBuilder;
use crate::config::environment::{env_string, env_u32, env_u64};
use crate::config::{Config, DEFAULT_DEEPINFRA_BASE_URL, DEFAULT_MAX_HISTORY, LlmProvider};

const MANAGED_VARS: &[&str] = &[
    "TELLER_PROVIDER",
    "TELLER_API_KEY",
    "TELLER_LLM_BASE_URL",
    "TELLER_MODEL",
    "TELLER_TIMEOUT_SECS",
    "TELLER_SESSION_DIR",
    "TELLER_MAX_HISTORY",
    "TELLER_STAGES_DIR",
    "TELLER_TURN_TIMEOUT_SECS",
    "TELLER_STREAM_CHUNK_CHARS",
    "OPENAI_API_KEY",
    "DEEPINFRA_API_KEY",
];

fn env_lock<'a>() -> std::sync::MutexGuard<'a, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    /// Clears every managed variable, then applies `vars`.
    fn new(home: &str, vars: &[(&str, &str)]) -> Self {
        let mut keys: Vec<&str> = MANAGED_VARS.to_vec();
        keys.push("HOME");
        let saved = keys
            .iter()
            .map(|key| (key.to_string(), std::env::var(key).ok()))
            .collect::<Vec<_>>();

        for key in MANAGED_VARS {
            unsafe { std::env::remove_var(key) };
        }
        unsafe { std::env::set_var("HOME", home) };
        for (key, value) in vars {
            unsafe { std::env::set_var(key, value) };
        }
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(val) => unsafe { std::env::set_var(key, val) },
                None => unsafe { std::env::remove_var(key) },
            }
        }
    }
}

fn temp_home() -> (TempDir, String) {
    let dir = TempDir::new().unwrap();
    let home = dir.path().to_str().unwrap().to_string();
    (dir, home)
}

#[test]
fn load_from_env_only() {
    let _lock = env_lock();
    let (_dir, home) = temp_home();
    let _env = EnvGuard::new(
        &home,
        &[
            ("OPENAI_API_KEY", "env-key"),
            ("TELLER_TIMEOUT_SECS", "45"),
            ("TELLER_MODEL", "gpt-4o"),
            ("TELLER_MAX_HISTORY", "20"),
            ("TELLER_SESSION_DIR", "/tmp/teller-sessions"),
        ],
    );

    let config = Config::load().unwrap();
    assert_eq!(config.llm.provider, LlmProvider::OpenAi);
    assert_eq!(config.llm.api_key, "env-key");
    assert_eq!(config.llm.timeout_secs, 45);
    assert_eq!(config.llm.model, "gpt-4o");
    assert_eq!(config.session.max_history, 20);
    assert_eq!(config.session.dir, PathBuf::from("/tmp/teller-sessions"));
}

#[test]
fn load_prefers_env_over_file() {
    let _lock = env_lock();
    let (dir, home) = temp_home();
    let config_dir = dir.path().join(".teller");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config"),
        r#"{
            "llm": { "api_key": "file-key", "timeout_secs": 20, "model": "file-model" },
            "session": { "max_history": 50, "history_window": 4 },
            "pipeline": { "turn_timeout_secs": 15 }
        }"#,
    )
    .unwrap();

    let _env = EnvGuard::new(
        &home,
        &[("OPENAI_API_KEY", "env-key"), ("TELLER_TIMEOUT_SECS", "40")],
    );

    let config = Config::load().unwrap();
    assert_eq!(config.llm.api_key, "env-key");
    assert_eq!(config.llm.timeout_secs, 40);
    assert_eq!(config.llm.model, "file-model");
    assert_eq!(config.session.max_history, 50);
    assert_eq!(config.session.history_window, 4);
    assert_eq!(config.pipeline.turn_timeout_secs, 15);
}

#[test]
fn load_errors_without_api_key() {
    let _lock = env_lock();
    let (_dir, home) = temp_home();
    let _env = EnvGuard::new(&home, &[]);

    let err = Config::load().unwrap_err();
    assert!(err.to_string().contains("OpenAI API key not found"));
}

#[test]
fn offline_provider_needs_no_key() {
    let _lock = env_lock();
    let (_dir, home) = temp_home();
    let _env = EnvGuard::new(&home, &[("TELLER_PROVIDER", "offline")]);

    let config = Config::load().unwrap();
    assert_eq!(config.llm.provider, LlmProvider::Offline);
    assert!(config.llm.api_key.is_empty());
    assert_eq!(config.session.max_history, DEFAULT_MAX_HISTORY);
}

#[test]
fn load_supports_deepinfra_provider() {
    let _lock = env_lock();
    let (_dir, home) = temp_home();
    let _env = EnvGuard::new(
        &home,
        &[
            ("TELLER_PROVIDER", "deepinfra"),
            ("DEEPINFRA_API_KEY", "di-key"),
            ("OPENAI_API_KEY", "ignored"),
        ],
    );

    let config = Config::load().unwrap();
    assert_eq!(config.llm.provider, LlmProvider::DeepInfra);
    assert_eq!(config.llm.api_key, "di-key");
    assert_eq!(config.llm.base_url, DEFAULT_DEEPINFRA_BASE_URL);
}

#[test]
fn unknown_provider_in_file_is_rejected() {
    let _lock = env_lock();
    let (dir, home) = temp_home();
    let config_dir = dir.path().join(".teller");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config"),
        r#"{ "llm": { "provider": "carrier-pigeon" } }"#,
    )
    .unwrap();
    let _env = EnvGuard::new(&home, &[]);

    let err = Config::load().unwrap_err();
    assert!(err.to_string().contains("carrier-pigeon"));
}

#[test]
fn validation_rejects_zero_limits() {
    let config = ConfigBuilder::new()
        .with_llm(|llm| llm.provider = LlmProvider::Offline)
        .with_pipeline(|pipeline| pipeline.stream_chunk_chars = 0)
        .build()
        .unwrap();
    assert!(config.validate().is_err());

    let config = ConfigBuilder::new()
        .with_llm(|llm| llm.provider = LlmProvider::Offline)
        .with_session(|session| session.max_history = 0)
        .build()
        .unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn validation_rejects_empty_history_window() {
    let config = ConfigBuilder::new()
        .with_llm(|llm| llm.provider = LlmProvider::Offline)
        .with_session(|session| session.history_window = 0)
        .build()
        .unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("history_window"));
}

#[test]
fn save_persists_nested_structure() {
    let _lock = env_lock();
    let (_dir, home) = temp_home();
    let _env = EnvGuard::new(&home, &[]);

    let mut config = Config::builder().build().unwrap();
    config.llm.api_key = "test-key".to_string();
    config.llm.timeout_secs = 55;
    config.session.max_history = 30;
    config.pipeline.entry_stage = "preprocessing".to_string();
    config.save().unwrap();

    let persisted = std::fs::read_to_string(Config::config_path().unwrap()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&persisted).unwrap();
    assert_eq!(json["llm"]["api_key"], "test-key");
    assert_eq!(json["llm"]["provider"], "openai");
    assert_eq!(json["llm"]["timeout_secs"], 55);
    assert_eq!(json["session"]["max_history"], 30);
    assert_eq!(json["pipeline"]["entry_stage"], "preprocessing");
    assert!(json["pipeline"].get("stages_dir").is_none());
}

#[test]
fn test_env_string() {
    let _lock = env_lock();
    let (_dir, home) = temp_home();
    let _env = EnvGuard::new(&home, &[("TELLER_MODEL", "test_value")]);

    assert_eq!(
        env_string("TELLER_MODEL").unwrap(),
        Some("test_value".to_string())
    );
    assert_eq!(env_string("TELLER_NONEXISTENT_VAR").unwrap(), None);
}

#[test]
fn test_env_numbers() {
    let _lock = env_lock();
    let (_dir, home) = temp_home();
    let _env = EnvGuard::new(
        &home,
        &[("TELLER_TIMEOUT_SECS", "123"), ("TELLER_STREAM_CHUNK_CHARS", "456")],
    );

    assert_eq!(env_u64("TELLER_TIMEOUT_SECS").unwrap(), Some(123));
    assert_eq!(env_u32("TELLER_STREAM_CHUNK_CHARS").unwrap(), Some(456));
    assert_eq!(env_u64("TELLER_NONEXISTENT_VAR").unwrap(), None);
}

#[test]
fn malformed_number_is_an_error() {
    let _lock = env_lock();
    let (_dir, home) = temp_home();
    let _env = EnvGuard::new(&home, &[("TELLER_MAX_HISTORY", "lots")]);

    let err = Config::load_unvalidated().unwrap_err();
    assert!(err.to_string().contains("TELLER_MAX_HISTORY"));
}
