use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;
use whystack::config::{ConfigError, ConfigLoader};

const CRYPTO_KEY: &str = "YWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWE=";

const MANAGED_VARS: &[&str] = &[
    "WHYSTACK_PROFILE",
    "WHYSTACK_API_BIND_ADDR",
    "WHYSTACK_LOG_LEVEL",
    "WHYSTACK_CRYPTO_KEY",
    "WHYSTACK_JWT_SECRET",
    "WHYSTACK_WEBHOOK_GITHUB_SECRET",
    "WHYSTACK_GITHUB_CLIENT_ID",
    "WHYSTACK_GITHUB_CLIENT_SECRET",
    "WHYSTACK_GITHUB_API_BASE",
    "WHYSTACK_CLIENT_URL",
    "WHYSTACK_DECISION_SEARCH_DEFAULT_LIMIT",
    "WHYSTACK_DECISION_SEARCH_MAX_LIMIT",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    for name in MANAGED_VARS {
        unsafe {
            env::remove_var(name);
        }
    }
}

fn set_env(name: &str, value: &str) {
    unsafe {
        env::set_var(name, value);
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

fn loader(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(PathBuf::from(dir.path()))
}

#[test]
fn loads_defaults_when_only_crypto_key_present() {
    let _guard = env_guard();
    clear_env();
    set_env("WHYSTACK_CRYPTO_KEY", CRYPTO_KEY);

    let temp_dir = TempDir::new().unwrap();
    let cfg = loader(&temp_dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.crypto_key.as_deref().map(<[u8]>::len), Some(32));
    assert_eq!(cfg.github_http_timeout_ms, 8000);
    assert_eq!(cfg.decision_search_default_limit, 50);
    assert_eq!(cfg.decision_search_max_limit, 200);
    assert_eq!(cfg.client_url, "http://localhost:5173");
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "WHYSTACK_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "WHYSTACK_API_BIND_ADDR=192.168.0.10:5000\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "WHYSTACK_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        &format!(
            "WHYSTACK_PROFILE=test\nWHYSTACK_API_BIND_ADDR=127.0.0.1:4000\nWHYSTACK_CRYPTO_KEY={CRYPTO_KEY}\n"
        ),
    );

    let cfg = loader(&temp_dir)
        .load()
        .expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "WHYSTACK_API_BIND_ADDR=127.0.0.1:3000\nWHYSTACK_CLIENT_URL=http://file.example\n",
    );
    set_env("WHYSTACK_API_BIND_ADDR", "0.0.0.0:9090");
    set_env("WHYSTACK_CLIENT_URL", "https://app.example.com/");
    set_env("WHYSTACK_CRYPTO_KEY", CRYPTO_KEY);

    let cfg = loader(&temp_dir).load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert_eq!(cfg.client_url, "https://app.example.com");

    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();
    set_env("WHYSTACK_API_BIND_ADDR", "not-an-addr");
    set_env("WHYSTACK_CRYPTO_KEY", CRYPTO_KEY);

    let temp_dir = TempDir::new().unwrap();
    let err = loader(&temp_dir)
        .load()
        .expect_err("invalid bind addr should fail");
    assert!(matches!(err, ConfigError::InvalidBindAddr { .. }));

    clear_env();
}

#[test]
fn invalid_crypto_key_base64_is_rejected() {
    let _guard = env_guard();
    clear_env();
    set_env("WHYSTACK_CRYPTO_KEY", "not base64!!");

    let temp_dir = TempDir::new().unwrap();
    let err = loader(&temp_dir).load().expect_err("bad key should fail");
    assert!(matches!(err, ConfigError::InvalidCryptoKeyBase64 { .. }));

    clear_env();
}

#[test]
fn production_profile_requires_github_secrets() {
    let _guard = env_guard();
    clear_env();
    set_env("WHYSTACK_PROFILE", "prod");
    set_env("WHYSTACK_CRYPTO_KEY", CRYPTO_KEY);
    set_env("WHYSTACK_JWT_SECRET", &"s".repeat(40));

    let temp_dir = TempDir::new().unwrap();
    let err = loader(&temp_dir)
        .load()
        .expect_err("missing webhook secret should fail");
    assert!(matches!(err, ConfigError::MissingWebhookSecret));

    set_env("WHYSTACK_WEBHOOK_GITHUB_SECRET", "whsec");
    set_env("WHYSTACK_GITHUB_CLIENT_ID", "client-id");
    set_env("WHYSTACK_GITHUB_CLIENT_SECRET", "client-secret");
    let cfg = loader(&temp_dir).load().expect("complete prod config loads");
    assert_eq!(cfg.profile, "prod");
    assert!(!cfg.is_development());

    clear_env();
}

#[test]
fn inconsistent_search_limits_are_rejected() {
    let _guard = env_guard();
    clear_env();
    set_env("WHYSTACK_CRYPTO_KEY", CRYPTO_KEY);
    set_env("WHYSTACK_DECISION_SEARCH_DEFAULT_LIMIT", "500");
    set_env("WHYSTACK_DECISION_SEARCH_MAX_LIMIT", "100");

    let temp_dir = TempDir::new().unwrap();
    let err = loader(&temp_dir).load().expect_err("limits should fail");
    assert!(matches!(
        err,
        ConfigError::InvalidSearchLimits {
            default: 500,
            max: 100
        }
    ));

    clear_env();
}
