//! Fetching through a real browser over the W3C WebDriver protocol.
//!
//! Works against chromedriver, geckodriver, or any Selenium-compatible
//! grid. Each fetch opens a fresh session and deletes it before returning,
//! whatever happened in between.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::BrowserConfig;
use crate::model::{Engine, Target};

use super::{FetchError, Fetcher, RawObservation, extract};

/// Slack on top of the page-load timeout for the HTTP client itself.
const CLIENT_GRACE: Duration = Duration::from_secs(30);

const SCRIPT_TIMEOUT_MS: u64 = 30_000;

/// Error markers browsers put in navigation failures.
const UNREACHABLE_MARKERS: &[&str] = &[
    "net::ERR_",
    "about:neterror",
    "Reached error page",
    "dnsNotFound",
    "connectionFailure",
];

/// Returns `"gone"`, `"ready"`, or `"pending"`.
const READY_SCRIPT: &str = r#"
const ready = arguments[0];
const gone = arguments[1];
if (gone && document.querySelector(gone)) return "gone";
if (!ready) return "ready";
const el = document.querySelector(ready);
return el && el.getClientRects().length > 0 ? "ready" : "pending";
"#;

/// Clicks the first matching element if it is visible.
const CLICK_SCRIPT: &str = r#"
const el = document.querySelector(arguments[0]);
if (!el || el.getClientRects().length === 0) return false;
el.click();
return true;
"#;

/// A [`Fetcher`] backed by a WebDriver server.
pub struct WebDriverFetcher {
    client: Client,
    config: BrowserConfig,
}

impl WebDriverFetcher {
    pub fn new(config: BrowserConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.page_load_timeout_ms) + CLIENT_GRACE)
            .build()
            .map_err(|e| FetchError::Session(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Everything between opening and closing the session.
    async fn observe(
        &self,
        session: &Session<'_>,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<String, FetchError> {
        cancellable(cancel, session.navigate(&target.url)).await?;

        for css in &target.consent {
            if cancellable(cancel, session.click_visible(css)).await? {
                debug!(selector = %css, "dismissed consent banner");
                break;
            }
        }

        self.wait_until_ready(session, target, cancel).await?;
        cancellable(cancel, session.source()).await
    }

    /// Poll until `wait-for` shows up or `not-found` does.
    async fn wait_until_ready(
        &self,
        session: &Session<'_>,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        if target.wait_for.is_none() && target.not_found.is_none() {
            return Ok(());
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.wait_timeout_ms);
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let args = json!([target.wait_for, target.not_found]);

        loop {
            let state = cancellable(cancel, session.execute(READY_SCRIPT, args.clone())).await?;
            match state.as_str() {
                Some("gone") => {
                    return Err(FetchError::NotFound {
                        url: target.url.clone(),
                    });
                }
                Some("ready") => return Ok(()),
                _ => {}
            }

            if Instant::now() >= deadline {
                return Err(FetchError::Timeout {
                    during: format!(
                        "waiting for `{}`",
                        target.wait_for.as_deref().unwrap_or_default()
                    ),
                });
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                () = tokio::time::sleep(poll) => {}
            }
        }
    }
}

#[async_trait]
impl Fetcher for WebDriverFetcher {
    async fn fetch(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<RawObservation, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let engine = target.engine.unwrap_or(self.config.engine);
        let session = Session::open(&self.client, &self.config, engine).await?;
        debug!(session = %session.id, ?engine, "session opened");

        let page = self.observe(&session, target, cancel).await;
        session.close().await;
        let html = page?;

        if let Some(dir) = &self.config.debug_dir {
            dump(dir, &target.id, &html).await;
        }

        let items = extract::extract(target.extract.as_ref(), &html).map_err(FetchError::Extract)?;
        Ok(RawObservation {
            target: target.id.clone(),
            items,
        })
    }
}

/// One live browser session.
struct Session<'a> {
    client: &'a Client,
    base: String,
    id: String,
}

impl<'a> Session<'a> {
    async fn open(
        client: &'a Client,
        config: &BrowserConfig,
        engine: Engine,
    ) -> Result<Self, FetchError> {
        let endpoint = config.webdriver.trim_end_matches('/');
        let value = send(
            client,
            Method::POST,
            &format!("{endpoint}/session"),
            Some(capabilities(config, engine)),
        )
        .await
        .map_err(|e| e.into_fetch_error("starting a session"))?;

        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| FetchError::Session("new session response has no sessionId".into()))?
            .to_string();

        Ok(Self {
            client,
            base: format!("{endpoint}/session/{id}"),
            id,
        })
    }

    async fn navigate(&self, url: &str) -> Result<(), FetchError> {
        self.command(Method::POST, "url", Some(json!({ "url": url })))
            .await
            .map_err(|e| match e {
                WireError::Driver { message, .. } if is_unreachable(&message) => {
                    FetchError::Unreachable {
                        url: url.to_string(),
                        reason: first_line(&message).to_string(),
                    }
                }
                other => other.into_fetch_error(&format!("loading {url}")),
            })?;
        Ok(())
    }

    async fn execute(&self, script: &str, args: Value) -> Result<Value, FetchError> {
        self.command(
            Method::POST,
            "execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
        .map_err(|e| e.into_fetch_error("running a script"))
    }

    async fn click_visible(&self, css: &str) -> Result<bool, FetchError> {
        let clicked = self.execute(CLICK_SCRIPT, json!([css])).await?;
        Ok(clicked.as_bool().unwrap_or(false))
    }

    async fn source(&self) -> Result<String, FetchError> {
        let value = self
            .command(Method::GET, "source", None)
            .await
            .map_err(|e| e.into_fetch_error("reading the page source"))?;
        match value {
            Value::String(html) => Ok(html),
            other => Err(FetchError::Session(format!(
                "page source is not a string: {other}"
            ))),
        }
    }

    /// Delete the session. Failures are logged, not returned: the page has
    /// already been read or abandoned by now.
    async fn close(self) {
        if let Err(e) = send(self.client, Method::DELETE, &self.base, None).await {
            warn!(session = %self.id, error = %e, "failed to delete session");
        } else {
            debug!(session = %self.id, "session closed");
        }
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, WireError> {
        send(self.client, method, &format!("{}/{path}", self.base), body).await
    }
}

/// What went wrong talking to the WebDriver server.
#[derive(Debug, thiserror::Error)]
enum WireError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("{error}: {message}")]
    Driver { error: String, message: String },

    #[error("unexpected response ({status}): {body}")]
    Malformed { status: StatusCode, body: String },
}

impl WireError {
    fn into_fetch_error(self, during: &str) -> FetchError {
        match self {
            Self::Transport(e) if e.is_timeout() => FetchError::Timeout {
                during: during.to_string(),
            },
            Self::Driver { ref error, .. } if error == "timeout" || error == "script timeout" => {
                FetchError::Timeout {
                    during: during.to_string(),
                }
            }
            other => FetchError::Session(format!("{during}: {other}")),
        }
    }
}

/// Send one WebDriver command and unwrap its `value`.
async fn send(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, WireError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;

    let Ok(mut parsed) = serde_json::from_str::<Value>(&text) else {
        return Err(WireError::Malformed { status, body: text });
    };
    let value = parsed.get_mut("value").map(Value::take).unwrap_or_default();

    if status.is_success() {
        return Ok(value);
    }
    match value.get("error").and_then(Value::as_str) {
        Some(error) => Err(WireError::Driver {
            error: error.to_string(),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        None => Err(WireError::Malformed { status, body: text }),
    }
}

/// New-session payload for the chosen engine.
fn capabilities(config: &BrowserConfig, engine: Engine) -> Value {
    let timeouts = json!({
        "pageLoad": config.page_load_timeout_ms,
        "script": SCRIPT_TIMEOUT_MS,
    });

    let always_match = match engine {
        Engine::Chromium => {
            let mut args: Vec<String> = Vec::new();
            if config.headless {
                args.push("--headless=new".into());
            }
            args.extend(
                [
                    "--no-sandbox",
                    "--disable-setuid-sandbox",
                    "--disable-dev-shm-usage",
                    "--disable-blink-features=AutomationControlled",
                    "--window-size=1920,1080",
                ]
                .map(String::from),
            );
            if let Some(ua) = &config.user_agent {
                args.push(format!("--user-agent={ua}"));
            }
            if let Some(locale) = &config.locale {
                args.push(format!("--lang={locale}"));
            }
            json!({
                "browserName": "chrome",
                "pageLoadStrategy": "eager",
                "timeouts": timeouts,
                "goog:chromeOptions": { "args": args },
            })
        }
        Engine::Firefox => {
            let mut args: Vec<&str> = vec!["--width=1920", "--height=1080"];
            if config.headless {
                args.push("-headless");
            }
            let mut prefs = serde_json::Map::new();
            if let Some(ua) = &config.user_agent {
                prefs.insert("general.useragent.override".into(), json!(ua));
            }
            if let Some(locale) = &config.locale {
                prefs.insert("intl.accept_languages".into(), json!(locale));
            }
            json!({
                "browserName": "firefox",
                "pageLoadStrategy": "eager",
                "timeouts": timeouts,
                "moz:firefoxOptions": { "args": args, "prefs": prefs },
            })
        }
    };

    json!({ "capabilities": { "alwaysMatch": always_match } })
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    step: impl Future<Output = Result<T, FetchError>>,
) -> Result<T, FetchError> {
    tokio::select! {
        () = cancel.cancelled() => Err(FetchError::Cancelled),
        result = step => result,
    }
}

fn is_unreachable(message: &str) -> bool {
    UNREACHABLE_MARKERS.iter().any(|m| message.contains(m))
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or(message).trim()
}

async fn dump(dir: &Path, id: &str, html: &str) {
    let path = dir.join(format!("{id}_dump.html"));
    let result = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, html).await
    }
    .await;
    match result {
        Ok(()) => debug!(path = %path.display(), "page source dumped"),
        Err(e) => warn!(path = %path.display(), error = %e, "failed to dump page source"),
    }
}
