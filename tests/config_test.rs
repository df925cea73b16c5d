//! Tests for config loading from files and the environment

use ratecast::config::{Config, Environment};
use serial_test::serial;
use std::io::Write;
use std::path::Path;

const ENV_VARS: &[&str] = &[
    "RATECAST_ENVIRONMENT",
    "RATECAST_STORE_URL",
    "DATABASE_URL",
    "IMAGE_RENDER_HOST",
    "IMAGE_RENDER_HOST_DEV",
    "VIDEO_RENDER_HOST",
    "RATECAST_PAIRS",
    "RATECAST_POLL_INTERVAL",
    "BOT_TOKEN",
    "SILENCE_MODE",
];

fn clear_env() {
    for name in ENV_VARS {
        std::env::remove_var(name);
    }
}

#[test]
fn test_shipped_config_file_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.toml");
    let config = Config::from_file(&path).expect("config.toml should parse");

    config.validate().expect("config.toml should validate");
    assert_eq!(config.store.environment, Environment::Dev);
    assert_eq!(config.scheduler.pairs.len(), 10);
    assert_eq!(config.timezone("by"), Some(chrono_tz::Europe::Minsk));
    assert!(config.delivery.bot_token.is_none());
}

#[test]
fn test_minimal_config_file_uses_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[store]
url = "memory://"
environment = "prod"
pool_size = 2

[render]
image_host = "http://render:3000"
video_host = "http://video:3001"
templates_dir = "templates"
media_folder = "/media"
timeout_secs = 30

[delivery]
telegram_api_base = "https://api.telegram.org"
bot_token = "123:abc"
promo_caption = "Support us"
timeout_secs = 10
"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.store.url, "memory://");
    assert_eq!(config.connection.max_attempts, 5);
    assert_eq!(config.processor.poll_interval_secs, 5);
    assert_eq!(config.countries.len(), 2);
    assert_eq!(config.logging.format, "text");
    assert_eq!(config.delivery.bot_token.as_deref(), Some("123:abc"));
}

#[test]
fn test_broken_config_file_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[store]\nurl = 42\n").unwrap();
    assert!(Config::from_file(file.path()).is_err());
    assert!(Config::from_file(Path::new("/nonexistent/ratecast.toml")).is_err());
}

#[test]
#[serial]
fn test_env_defaults() {
    clear_env();
    let config = Config::from_env().unwrap();

    assert_eq!(config.store.environment, Environment::Prod);
    assert!(config.delivery.bot_token.is_none());
    assert!(!config.logging.silence_mode);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_env_overrides_prefer_environment_suffix() {
    clear_env();
    std::env::set_var("RATECAST_ENVIRONMENT", "dev");
    std::env::set_var("RATECAST_STORE_URL", "memory://");
    std::env::set_var("IMAGE_RENDER_HOST", "http://generic:3000");
    std::env::set_var("IMAGE_RENDER_HOST_DEV", "http://dev-render:3000");
    std::env::set_var("VIDEO_RENDER_HOST", "http://video:3001");
    std::env::set_var("RATECAST_PAIRS", "pl:subscriptions-users,pl:subscriptions-video");
    std::env::set_var("BOT_TOKEN", "123:abc");
    std::env::set_var("SILENCE_MODE", "true");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(config.store.environment, Environment::Dev);
    assert_eq!(config.store.url, "memory://");
    assert_eq!(config.render.image_host, "http://dev-render:3000");
    assert_eq!(config.render.video_host, "http://video:3001");
    assert_eq!(config.scheduler.pairs.len(), 2);
    assert_eq!(config.delivery.bot_token.as_deref(), Some("123:abc"));
    assert!(config.logging.silence_mode);
}

#[test]
#[serial]
fn test_env_invalid_values() {
    clear_env();
    std::env::set_var("RATECAST_ENVIRONMENT", "staging");
    assert!(Config::from_env().is_err());

    clear_env();
    std::env::set_var("RATECAST_POLL_INTERVAL", "30");
    let config = Config::from_env().unwrap();
    clear_env();
    assert!(config.validate().is_err());
}
