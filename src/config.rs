//! Tracker configuration.
//!
//! Loaded from `~/.tracker/config.toml` unless `--config` points elsewhere.
//! Relative paths inside the file resolve against the file's directory.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fetch::{Backoff, selector};
use crate::model::{Engine, Extract, Target};

/// Environment variable that overrides the configured Discord webhook.
pub const WEBHOOK_ENV: &str = "DISCORD_WEBHOOK";

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("target `{id}` is invalid: {reason}")]
    InvalidTarget { id: String, reason: String },

    #[error("target `{0}` is defined more than once")]
    DuplicateTarget(String),

    #[error("no targets configured in {0}")]
    NoTargets(PathBuf),

    #[error("`{key}` {reason}")]
    InvalidSetting { key: &'static str, reason: String },
}

/// Tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// The JSON state document.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Seconds between cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Targets checked at once. Each holds a browser session.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default, rename = "target")]
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// How to reach and drive the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BrowserConfig {
    /// WebDriver server (chromedriver, geckodriver, or a Selenium grid).
    #[serde(default = "default_webdriver")]
    pub webdriver: String,

    /// Engine for targets that don't pick one.
    #[serde(default)]
    pub engine: Engine,

    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default)]
    pub user_agent: Option<String>,

    /// Browser language, e.g. `sv-SE`.
    #[serde(default)]
    pub locale: Option<String>,

    #[serde(default = "default_page_load_timeout_ms")]
    pub page_load_timeout_ms: u64,

    /// How long to wait for a target's `wait-for` selector.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Where to dump fetched page sources, if anywhere.
    #[serde(default)]
    pub debug_dir: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver: default_webdriver(),
            engine: Engine::default(),
            headless: true,
            user_agent: None,
            locale: None,
            page_load_timeout_ms: default_page_load_timeout_ms(),
            wait_timeout_ms: default_wait_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            debug_dir: None,
        }
    }
}

/// Where change events go.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct NotifyConfig {
    /// Log every event.
    #[serde(default = "default_true")]
    pub log: bool,

    /// Append events as JSON lines to this file, or `-` for stdout.
    #[serde(default)]
    pub jsonl: Option<PathBuf>,

    #[serde(default)]
    pub discord: Option<DiscordConfig>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            log: true,
            jsonl: None,
            discord: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DiscordConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Skip the message when every target is unchanged.
    #[serde(default = "default_true")]
    pub silent_if_unchanged: bool,

    /// Prepended to messages with urgent changes.
    #[serde(default = "default_mention")]
    pub mention: Option<String>,
}

impl Config {
    /// Load and validate config from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let base = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(base);
        config.apply_env();

        if config.targets.is_empty() {
            return Err(ConfigError::NoTargets(path.to_path_buf()));
        }
        config.validate()?;

        Ok(config)
    }

    /// The default config file path: `~/.tracker/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".tracker").join("config.toml"))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Check every target for problems that would only surface mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "interval-secs",
                reason: "must be at least 1".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            validate_target(target)?;
            if !seen.insert(target.id.as_str()) {
                return Err(ConfigError::DuplicateTarget(target.id.clone()));
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        self.state_file = base.join(&self.state_file);
        if let Some(dir) = &self.browser.debug_dir {
            self.browser.debug_dir = Some(base.join(dir));
        }
        if let Some(path) = &self.notify.jsonl
            && path.as_os_str() != "-"
        {
            self.notify.jsonl = Some(base.join(path));
        }
    }

    /// `DISCORD_WEBHOOK` wins over the file.
    fn apply_env(&mut self) {
        if let Ok(url) = env::var(WEBHOOK_ENV)
            && !url.is_empty()
        {
            self.notify
                .discord
                .get_or_insert_with(DiscordConfig::default)
                .webhook_url = Some(url);
        }
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            silent_if_unchanged: true,
            mention: default_mention(),
        }
    }
}

fn validate_target(target: &Target) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidTarget {
        id: target.id.clone(),
        reason,
    };

    if target.id.trim().is_empty() {
        return Err(invalid("id is empty".to_string()));
    }
    // Ids name debug dumps on disk.
    if target.id.contains(['/', '\\']) || target.id == "." || target.id == ".." {
        return Err(invalid("id must not contain path separators".to_string()));
    }

    let url = reqwest::Url::parse(&target.url)
        .map_err(|e| invalid(format!("url `{}`: {e}", target.url)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("url `{}` is not http(s)", target.url)));
    }

    let mut selectors: Vec<&str> = Vec::new();
    selectors.extend(target.wait_for.as_deref());
    selectors.extend(target.not_found.as_deref());
    selectors.extend(target.consent.iter().map(String::as_str));
    match &target.extract {
        None => {}
        Some(Extract::Text { selector, .. }) => selectors.push(selector),
        Some(Extract::List {
            item, name, value, ..
        }) => selectors.extend([item.as_str(), name.as_str(), value.as_str()]),
        Some(Extract::EmbeddedJson {
            selector,
            items,
            name,
            value,
            ..
        }) => {
            selectors.push(selector);
            for pointer in [items, name, value] {
                if !pointer.is_empty() && !pointer.starts_with('/') {
                    return Err(invalid(format!(
                        "`{pointer}` is not a JSON pointer (must start with `/`)"
                    )));
                }
            }
        }
    }

    for css in selectors {
        selector(css).map_err(invalid)?;
    }

    Ok(())
}

fn default_state_file() -> PathBuf {
    PathBuf::from("tracker_db.json")
}

fn default_interval_secs() -> u64 {
    300
}

fn default_concurrency() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_webdriver() -> String {
    "http://localhost:4444".to_string()
}

fn default_page_load_timeout_ms() -> u64 {
    60_000
}

fn default_wait_timeout_ms() -> u64 {
    25_000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_mention() -> Option<String> {
    Some("@here".to_string())
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    const SAMPLE: &str = r#"
        state-file = "data/tracker_db.json"
        interval-secs = 60

        [browser]
        locale = "sv-SE"

        [notify]
        jsonl = "-"

        [[target]]
        id = "inet"
        url = "https://www.inet.se/hitta?q=5090"
        display-name = "inet.se"
        wait-for = 'li[data-test-id^="search_product"]'
        consent = ["button[aria-label='Godkänn alla']"]

        [target.extract]
        kind = "list"
        item = 'li[data-test-id^="search_product"]'
        name = "h3"
        value = "span[data-test-is-discounted-price]"

        [target.filter]
        include = ["5090"]

        [[target]]
        id = "komplett"
        url = "https://www.komplett.se/search?q=rtx+5090"
        engine = "firefox"

        [target.extract]
        kind = "embedded-json"
        selector = "[preloadedsearchresult]"
        attr = "preloadedsearchresult"
        items = "/products"
        name = "/name"
        value = "/price/listPrice"
    "#;

    fn write_config(contents: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn loads_sample_with_defaults() {
        let (dir, path) = write_config(SAMPLE);
        let config = Config::load(&path).unwrap();

        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.interval(), Duration::from_secs(60));
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.browser.wait_timeout_ms, 25_000);
        assert_eq!(config.targets[1].engine, Some(Engine::Firefox));
        assert_eq!(
            config.state_file,
            dir.path().join("data").join("tracker_db.json")
        );
        assert_eq!(config.notify.jsonl.as_deref(), Some(Path::new("-")));
    }

    #[test]
    fn absolute_state_file_is_kept() {
        let (_dir, path) = write_config(
            r#"
            state-file = "/app/data/tracker_db.json"
            [[target]]
            id = "t1"
            url = "https://example.com"
            "#,
        );
        let config = Config::load(&path).unwrap();

        assert_eq!(config.state_file, PathBuf::from("/app/data/tracker_db.json"));
    }

    #[test]
    fn rejects_unknown_keys() {
        let (_dir, path) = write_config(
            r#"
            intervall = 5
            [[target]]
            id = "t1"
            url = "https://example.com"
            "#,
        );
        let err = Config::load(&path).unwrap_err();

        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn rejects_bad_selector_naming_the_target() {
        let (_dir, path) = write_config(
            r#"
            [[target]]
            id = "broken"
            url = "https://example.com"
            wait-for = "li[["
            "#,
        );
        let err = Config::load(&path).unwrap_err();

        match err {
            ConfigError::InvalidTarget { id, reason } => {
                assert_eq!(id, "broken");
                assert!(reason.contains("li[["));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_non_http_urls() {
        let (_dir, path) = write_config(
            r#"
            [[target]]
            id = "local"
            url = "file:///etc/passwd"
            "#,
        );
        let err = Config::load(&path).unwrap_err();

        assert!(matches!(err, ConfigError::InvalidTarget { .. }));
    }

    #[test]
    fn rejects_bad_json_pointer() {
        let (_dir, path) = write_config(
            r#"
            [[target]]
            id = "json"
            url = "https://example.com"
            [target.extract]
            kind = "embedded-json"
            selector = "div"
            attr = "data-x"
            items = "products"
            name = "/name"
            value = "/price"
            "#,
        );
        let err = Config::load(&path).unwrap_err();

        assert!(matches!(err, ConfigError::InvalidTarget { .. }));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let (_dir, path) = write_config(
            r#"
            [[target]]
            id = "t1"
            url = "https://example.com/a"
            [[target]]
            id = "t1"
            url = "https://example.com/b"
            "#,
        );
        let err = Config::load(&path).unwrap_err();

        assert!(matches!(err, ConfigError::DuplicateTarget(id) if id == "t1"));
    }

    #[test]
    fn rejects_empty_target_list() {
        let (_dir, path) = write_config("interval-secs = 10\n");
        let err = Config::load(&path).unwrap_err();

        assert!(matches!(err, ConfigError::NoTargets(_)));
    }

    #[test]
    fn missing_file_names_the_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.toml");
        let err = Config::load(&path).unwrap_err();

        assert!(err.to_string().contains("nope.toml"));
    }

    #[test]
    fn rejects_ids_that_escape_a_directory() {
        for id in ["../x", "a/b", "a\\b", ".."] {
            let (_dir, path) = write_config(&format!(
                r#"
                [[target]]
                id = '{id}'
                url = "https://example.com"
                "#
            ));
            let err = Config::load(&path).unwrap_err();

            assert!(
                matches!(err, ConfigError::InvalidTarget { .. }),
                "{id} was accepted"
            );
        }
    }

    #[test]
    fn rejects_zero_interval() {
        let (_dir, path) = write_config(
            r#"
            interval-secs = 0
            [[target]]
            id = "t1"
            url = "https://example.com"
            "#,
        );
        let err = Config::load(&path).unwrap_err();

        assert!(matches!(
            err,
            ConfigError::InvalidSetting {
                key: "interval-secs",
                ..
            }
        ));
    }
}
