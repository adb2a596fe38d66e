//! Authenticated sessions
//!
//! A [`Session`] is the handle every request goes through. It is produced once
//! per invocation by a [`SessionProvider`] and passed explicitly to the lister
//! and the executor.
//!
//! [`CookieSessionProvider`] keeps the session's cookies in a JSON file between
//! invocations. A stored jar is validated against the profile URL first; only
//! when that fails does it log in again with HTTP Basic credentials taken from
//! `GIMPFETCH_USERNAME` / `GIMPFETCH_PASSWORD`.

use crate::executor::{HttpClient, HttpConfig};
use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

const USERNAME_ENV: &str = "GIMPFETCH_USERNAME";
const PASSWORD_ENV: &str = "GIMPFETCH_PASSWORD";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no valid stored session and no credentials; set {USERNAME_ENV} and {PASSWORD_ENV}")]
    MissingCredentials,

    #[error("username and password were not accepted")]
    InvalidCredentials,

    #[error("{url} refused access (HTTP {status}); the account may lack permission for this data")]
    AccessDenied { url: String, status: u16 },

    #[error("could not reach {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("login succeeded but no '{0}' cookie was issued")]
    LoginRejected(String),

    #[error("invalid session URL '{0}'")]
    InvalidUrl(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("cookie jar {path}: {source}")]
    CookieJar {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cookie jar is not valid JSON: {0}")]
    CookieJarFormat(#[from] serde_json::Error),
}

/// Where and how sessions are established
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Persisted cookie jar; `~/.gimp_download_cookiejar.json` when unset
    #[serde(default)]
    pub cookie_jar: Option<PathBuf>,
    /// Page that only answers 200 to a logged-in session
    #[serde(default = "default_profile_url")]
    pub profile_url: String,
    /// Protected location that triggers the login flow
    #[serde(default = "default_login_url")]
    pub login_url: String,
    /// Cookie the identity provider sets once logged in
    #[serde(default = "default_logged_in_cookie")]
    pub logged_in_cookie: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_jar: None,
            profile_url: default_profile_url(),
            login_url: default_login_url(),
            logged_in_cookie: default_logged_in_cookie(),
        }
    }
}

fn default_profile_url() -> String {
    "https://urs.earthdata.nasa.gov/profile".to_string()
}

fn default_login_url() -> String {
    "https://daacdata.apps.nsidc.org/pub/DATASETS/".to_string()
}

fn default_logged_in_cookie() -> String {
    "urs_user_already_logged".to_string()
}

impl SessionConfig {
    pub fn cookie_jar_path(&self) -> PathBuf {
        self.cookie_jar.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".gimp_download_cookiejar.json")
        })
    }
}

/// Login credentials, read from the environment only
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn from_env() -> Option<Self> {
        let username = std::env::var(USERNAME_ENV).ok().filter(|v| !v.is_empty())?;
        let password = std::env::var(PASSWORD_ENV).ok()?;
        Some(Self { username, password })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Validated session handle
#[derive(Debug, Clone)]
pub struct Session {
    client: Client,
    config: HttpConfig,
}

impl Session {
    pub fn new(client: Client, config: HttpConfig) -> Self {
        Self { client, config }
    }

    /// Session without cookies, for servers that need no login
    pub fn anonymous(config: HttpConfig) -> Result<Self, SessionError> {
        let client = config.client_builder().build()?;
        Ok(Self::new(client, config))
    }

    pub fn http(&self) -> HttpClient {
        HttpClient::new(self.client.clone(), self.config.clone())
    }
}

/// Produces the session used for a whole invocation
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn ensure_valid_session(&self) -> Result<Session, SessionError>;
}

/// Provider for public servers
pub struct AnonymousSessionProvider {
    config: HttpConfig,
}

impl AnonymousSessionProvider {
    pub fn new(config: HttpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionProvider for AnonymousSessionProvider {
    async fn ensure_valid_session(&self) -> Result<Session, SessionError> {
        Session::anonymous(self.config.clone())
    }
}

/// Cookie-jar backed login against an Earthdata-style identity provider
pub struct CookieSessionProvider {
    session: SessionConfig,
    http: HttpConfig,
    credentials: Option<Credentials>,
}

impl CookieSessionProvider {
    pub fn new(session: SessionConfig, http: HttpConfig, credentials: Option<Credentials>) -> Self {
        Self {
            session,
            http,
            credentials,
        }
    }

    fn url(&self, raw: &str) -> Result<Url, SessionError> {
        Url::parse(raw).map_err(|_| SessionError::InvalidUrl(raw.to_string()))
    }

    fn has_login_cookie(&self, jar: &Jar) -> Result<bool, SessionError> {
        let profile = self.url(&self.session.profile_url)?;
        let wanted = format!("{}=", self.session.logged_in_cookie);
        let found = jar
            .cookies(&profile)
            .and_then(|header| header.to_str().ok().map(str::to_owned))
            .map(|header| header.split("; ").any(|pair| pair.starts_with(&wanted)))
            .unwrap_or(false);
        Ok(found)
    }

    /// HEAD the profile page without following redirects
    async fn check(&self, probe: &Client, jar: &Jar) -> Result<bool, SessionError> {
        let url = &self.session.profile_url;
        debug!(url, "Validating session");

        let response = probe
            .head(url)
            .send()
            .await
            .map_err(|e| SessionError::Unreachable {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        match status {
            StatusCode::OK | StatusCode::TEMPORARY_REDIRECT => self.has_login_cookie(jar),
            s if s.is_redirection() => {
                debug!(url, status = s.as_u16(), "Redirected, session not valid");
                Ok(false)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            s => Err(SessionError::AccessDenied {
                url: url.clone(),
                status: s.as_u16(),
            }),
        }
    }

    async fn login(&self, client: &Client, credentials: &Credentials) -> Result<(), SessionError> {
        let url = &self.session.login_url;
        info!(url, username = %credentials.username, "Logging in");

        let response = client
            .get(url)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .send()
            .await
            .map_err(|e| SessionError::Unreachable {
                url: url.clone(),
                message: e.to_string(),
            })?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED => Err(SessionError::InvalidCredentials),
            s => Err(SessionError::AccessDenied {
                url: url.clone(),
                status: s.as_u16(),
            }),
        }
    }

    fn persisted_urls(&self) -> Result<Vec<Url>, SessionError> {
        Ok(vec![
            self.url(&self.session.profile_url)?,
            self.url(&self.session.login_url)?,
        ])
    }
}

#[async_trait]
impl SessionProvider for CookieSessionProvider {
    async fn ensure_valid_session(&self) -> Result<Session, SessionError> {
        let jar_path = self.session.cookie_jar_path();
        let jar = Arc::new(Jar::default());

        let stored = StoredCookies::load(&jar_path)?;
        if let Some(stored) = &stored {
            stored.apply(&jar);
        }

        let client = self
            .http
            .client_builder()
            .cookie_provider(Arc::clone(&jar))
            .build()?;
        let probe = self
            .http
            .client_builder()
            .cookie_provider(Arc::clone(&jar))
            .redirect(Policy::none())
            .build()?;

        if stored.is_some() {
            if self.check(&probe, &jar).await? {
                info!(path = %jar_path.display(), "Re-using stored session");
                return Ok(Session::new(client, self.http.clone()));
            }
            warn!(path = %jar_path.display(), "Stored session is no longer valid");
        }

        let credentials = self
            .credentials
            .as_ref()
            .ok_or(SessionError::MissingCredentials)?;
        self.login(&client, credentials).await?;

        if !self.check(&probe, &jar).await? {
            return Err(SessionError::LoginRejected(
                self.session.logged_in_cookie.clone(),
            ));
        }

        StoredCookies::capture(&jar, &self.persisted_urls()?).save(&jar_path)?;
        info!(path = %jar_path.display(), "Session established and saved");
        Ok(Session::new(client, self.http.clone()))
    }
}

/// On-disk form of the cookie jar: the `Cookie` header each URL would send
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredCookies {
    saved_at: Option<String>,
    entries: Vec<StoredEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    url: String,
    cookies: String,
}

impl StoredCookies {
    fn capture(jar: &Jar, urls: &[Url]) -> Self {
        let entries = urls
            .iter()
            .filter_map(|url| {
                let header = jar.cookies(url)?;
                let cookies = header.to_str().ok()?.to_string();
                Some(StoredEntry {
                    url: url.to_string(),
                    cookies,
                })
            })
            .collect();

        Self {
            saved_at: OffsetDateTime::now_utc().format(&Rfc3339).ok(),
            entries,
        }
    }

    fn apply(&self, jar: &Jar) {
        for entry in &self.entries {
            let Ok(url) = Url::parse(&entry.url) else {
                warn!(url = %entry.url, "Skipping stored cookies with invalid URL");
                continue;
            };
            for pair in entry.cookies.split("; ").filter(|p| !p.is_empty()) {
                jar.add_cookie_str(pair, &url);
            }
        }
    }

    fn load(path: &Path) -> Result<Option<Self>, SessionError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SessionError::CookieJar {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn save(&self, path: &Path) -> Result<(), SessionError> {
        let jar_error = |source| SessionError::CookieJar {
            path: path.to_path_buf(),
            source,
        };
        let text = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(jar_error)?;
        }
        std::fs::write(path, text).map_err(jar_error)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(jar_error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("glacier", "hunter2");
        let shown = format!("{creds:?}");
        assert!(shown.contains("glacier"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn test_stored_cookies_round_trip_through_jar() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("jar.json");
        let url = Url::parse("https://urs.example.com/profile").unwrap();

        let jar = Jar::default();
        jar.add_cookie_str("urs_user_already_logged=yes", &url);
        jar.add_cookie_str("token=abc", &url);
        StoredCookies::capture(&jar, &[url.clone()]).save(&path).unwrap();

        let loaded = StoredCookies::load(&path).unwrap().unwrap();
        let restored = Jar::default();
        loaded.apply(&restored);

        let header = restored.cookies(&url).unwrap();
        let header = header.to_str().unwrap();
        assert!(header.contains("urs_user_already_logged=yes"));
        assert!(header.contains("token=abc"));
    }

    #[test]
    fn test_missing_jar_loads_as_none() {
        let temp_dir = TempDir::new().unwrap();
        let loaded = StoredCookies::load(&temp_dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_login_cookie_detection() {
        let provider = CookieSessionProvider::new(
            SessionConfig {
                profile_url: "https://urs.example.com/profile".to_string(),
                ..SessionConfig::default()
            },
            HttpConfig::default(),
            None,
        );
        let url = Url::parse("https://urs.example.com/profile").unwrap();

        let jar = Jar::default();
        jar.add_cookie_str("other=1", &url);
        assert!(!provider.has_login_cookie(&jar).unwrap());

        jar.add_cookie_str("urs_user_already_logged=yes", &url);
        assert!(provider.has_login_cookie(&jar).unwrap());
    }
}
