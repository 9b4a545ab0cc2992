use mm_domain::config::{Config, ProviderKind};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 3310);
}

#[test]
fn explicit_zero_host_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 8080
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 8080);
}

#[test]
fn default_cors_allows_only_localhost() {
    let config = Config::default();
    assert!(!config.server.cors.allowed_origins.is_empty());
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"http://localhost:*".to_string()));
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"http://127.0.0.1:*".to_string()));
}

#[test]
fn cors_config_parses_custom_origins() {
    let toml_str = r#"
[server.cors]
allowed_origins = ["https://myapp.com", "http://localhost:3000"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.cors.allowed_origins.len(), 2);
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"https://myapp.com".to_string()));
}

#[test]
fn cors_wildcard_port_preserved_in_config() {
    let toml_str = r#"
[server.cors]
allowed_origins = ["http://localhost:*"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.cors.allowed_origins[0], "http://localhost:*");
}

#[test]
fn history_defaults() {
    let config = Config::default();
    assert_eq!(config.history.max_messages, 30);
    assert!(config.history.carry_forward_images);
    assert!(config.history.system_prompt.is_none());
}

#[test]
fn search_disabled_by_default() {
    let config = Config::default();
    assert!(!config.search.enabled);
    assert_eq!(config.search.max_results, 5);
}

#[test]
fn provider_table_parses_with_poll_defaults() {
    let toml_str = r#"
default_model = "vid-1"

[[providers]]
id = "video"
kind = "video_task"
base_url = "https://api.example.com/v3"
models = ["vid-1"]

[providers.auth]
env = "VIDEO_API_KEY"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let provider = &config.providers[0];
    assert_eq!(provider.kind, ProviderKind::VideoTask);
    assert_eq!(provider.poll_interval_ms, 10_000);
    assert_eq!(provider.max_polls, 180);
    assert_eq!(config.default_model.as_deref(), Some("vid-1"));
}
