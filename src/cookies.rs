//! Cookie jar backed by a Netscape `cookies.txt` export

use crate::errors::{AgentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Url;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// A single cookie as read from the jar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub host_only: bool,
    pub expires: Option<DateTime<Utc>>,
}

impl Cookie {
    /// Domain without the leading dot
    fn bare_domain(&self) -> &str {
        self.domain.trim_start_matches('.')
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    /// Whether a browser would send this cookie to `url`
    pub fn matches_url(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };

        let domain = self.bare_domain();
        let domain_ok = if self.host_only {
            host.eq_ignore_ascii_case(domain)
        } else {
            host.eq_ignore_ascii_case(domain)
                || host.to_lowercase().ends_with(&format!(".{}", domain.to_lowercase()))
        };

        let path_ok = self.path_matches(url.path());
        let scheme_ok = !self.secure || url.scheme() == "https";

        domain_ok && path_ok && scheme_ok
    }

    /// RFC 6265 path-match: `/app` covers `/app` and `/app/x`, not `/application`
    fn path_matches(&self, request_path: &str) -> bool {
        match request_path.strip_prefix(self.path.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || self.path.ends_with('/'),
            None => false,
        }
    }

    /// `Set-Cookie` header form, for seeding the HTTP client's jar
    fn to_set_cookie(&self) -> String {
        let mut header = format!("{}={}; Path={}", self.name, self.value, self.path);
        if !self.host_only {
            header.push_str(&format!("; Domain={}", self.bare_domain()));
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        if let Some(expires) = self.expires {
            header.push_str(&format!(
                "; Expires={}",
                expires.format("%a, %d %b %Y %H:%M:%S GMT")
            ));
        }
        header
    }

    /// URL the cookie is registered against in the client jar
    fn origin(&self) -> Option<Url> {
        Url::parse(&format!("https://{}{}", self.bare_domain(), self.path)).ok()
    }
}

/// Parse the tab-separated Netscape cookie format.
///
/// Expired cookies are dropped. An expiry of `0` marks a session cookie.
pub fn parse_netscape(contents: &str, now: DateTime<Utc>) -> Result<Vec<Cookie>> {
    let mut cookies = Vec::new();

    for (index, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim_end_matches('\r');

        let (line, http_only) = match line.strip_prefix("#HttpOnly_") {
            Some(rest) => (rest, true),
            None => (line, false),
        };

        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 7 {
            return Err(AgentError::Cookie(format!(
                "line {}: expected 7 tab-separated fields, found {}",
                index + 1,
                fields.len()
            )));
        }

        let expiry: i64 = fields[4].parse().map_err(|_| {
            AgentError::Cookie(format!("line {}: invalid expiry {:?}", index + 1, fields[4]))
        })?;

        let expires = if expiry == 0 {
            None
        } else {
            Utc.timestamp_opt(expiry, 0).single()
        };

        let cookie = Cookie {
            domain: fields[0].to_string(),
            host_only: !fields[1].eq_ignore_ascii_case("TRUE"),
            path: if fields[2].is_empty() { "/".to_string() } else { fields[2].to_string() },
            secure: fields[3].eq_ignore_ascii_case("TRUE"),
            name: fields[5].to_string(),
            value: fields[6].to_string(),
            http_only,
            expires,
        };

        if cookie.is_expired(now) {
            debug!("Skipping expired cookie {} for {}", cookie.name, cookie.domain);
            continue;
        }

        cookies.push(cookie);
    }

    Ok(cookies)
}

/// Read access to the shared cookie jar
#[async_trait]
pub trait CookieSource: Send + Sync {
    /// Look up one cookie by exact name for `url`
    async fn get(&self, url: &str, name: &str) -> Result<Option<Cookie>>;

    /// Bring the cookies sent with outgoing requests up to date
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

/// Cookie provider for the HTTP client whose contents can be swapped wholesale
#[derive(Debug, Default)]
pub struct CookieJar {
    current: RwLock<Arc<Jar>>,
}

impl CookieJar {
    /// Replace everything in the jar with `cookies`
    pub fn replace(&self, cookies: &[Cookie]) {
        let jar = Jar::default();
        for cookie in cookies {
            if let Some(origin) = cookie.origin() {
                jar.add_cookie_str(&cookie.to_set_cookie(), &origin);
            }
        }

        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Arc::new(jar);
    }

    fn current(&self) -> Arc<Jar> {
        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&*current)
    }
}

impl CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.current().set_cookies(cookie_headers, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.current().cookies(url)
    }
}

/// Cookie export on disk, mirrored into a jar the HTTP client sends from
#[derive(Debug, Clone)]
pub struct CookieFile {
    path: PathBuf,
    jar: Arc<CookieJar>,
}

impl CookieFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            jar: Arc::new(CookieJar::default()),
        }
    }

    /// Jar to install as the HTTP client's cookie provider
    pub fn jar(&self) -> Arc<CookieJar> {
        Arc::clone(&self.jar)
    }

    /// Re-read the export and make the jar hold exactly its cookies.
    ///
    /// A missing file yields no cookies and empties the jar. On a read or
    /// parse error the jar keeps its previous contents.
    pub async fn reload(&self) -> Result<Vec<Cookie>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Cookie file {} does not exist", self.path.display());
                self.jar.replace(&[]);
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(AgentError::Cookie(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let cookies = parse_netscape(&contents, Utc::now())?;
        self.jar.replace(&cookies);

        debug!("Loaded {} cookies from {}", cookies.len(), self.path.display());
        Ok(cookies)
    }
}

#[async_trait]
impl CookieSource for CookieFile {
    async fn get(&self, url: &str, name: &str) -> Result<Option<Cookie>> {
        let url = Url::parse(url)
            .map_err(|e| AgentError::Cookie(format!("invalid cookie url {:?}: {}", url, e)))?;

        let cookies = self.reload().await?;
        Ok(cookies
            .into_iter()
            .find(|cookie| cookie.name == name && cookie.matches_url(&url)))
    }

    async fn refresh(&self) -> Result<()> {
        self.reload().await.map(|_| ())
    }
}
