//! Configuration management for the check-in agent

use crate::errors::{AgentError, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// HTTP verb used for a check-in request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

/// How non-2xx responses from a target are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpStatusPolicy {
    /// Parse the body anyway and let success matching decide
    #[default]
    Permissive,
    /// Report the status code without reading the body
    Strict,
}

impl HttpStatusPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "permissive" => Some(HttpStatusPolicy::Permissive),
            "strict" => Some(HttpStatusPolicy::Strict),
            _ => None,
        }
    }
}

/// Declarative description of one check-in target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    pub id: u32,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub url: String,

    #[serde(default = "default_method")]
    pub method: HttpMethod,

    /// Identifier sent in the POST body
    #[serde(default)]
    pub request_param: Option<String>,

    /// JSON key the request parameter is sent under
    #[serde(default = "default_param_key")]
    pub request_param_key: String,

    /// Dotted path to the discriminant value in the response
    #[serde(default)]
    pub success_path: String,

    #[serde(default)]
    pub success_values: Vec<Value>,

    /// Per-request deadline; zero means "use the global default"
    #[serde(default)]
    pub timeout_ms: u64,
}

fn default_method() -> HttpMethod {
    HttpMethod::Post
}

fn default_param_key() -> String {
    "act_id".to_string()
}

impl TargetConfig {
    /// An empty config for ids nothing is configured for
    pub fn unconfigured(id: u32) -> Self {
        Self {
            id,
            name: String::new(),
            url: String::new(),
            method: HttpMethod::Get,
            request_param: None,
            request_param_key: default_param_key(),
            success_path: String::new(),
            success_values: Vec::new(),
            timeout_ms: 0,
        }
    }

    /// Whether the target carries enough to be executed
    pub fn is_complete(&self) -> bool {
        !self.url.trim().is_empty()
            && !self.success_path.is_empty()
            && !self.success_values.is_empty()
    }

    /// Key used for this target in persisted maps
    pub fn key(&self) -> String {
        self.id.to_string()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Display label for logs
    pub fn label(&self) -> &str {
        if self.name.is_empty() { "unnamed" } else { &self.name }
    }
}

/// Highest target id accepted; a pass visits every id up to the largest one
pub const MAX_TARGET_ID: u32 = 1000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Name of the cookie whose presence gates a check-in pass
    pub session_cookie_name: String,

    /// URL the session cookie is looked up for
    pub session_check_url: String,

    /// Login page shown to the user when the session cookie is missing
    pub redirect_url: String,

    /// Deadline for targets that don't set their own
    pub default_timeout_ms: u64,

    /// Interval between scheduled passes
    pub poll_interval_ms: u64,

    pub http_status_policy: HttpStatusPolicy,

    /// Check-in targets, sorted by id
    pub targets: Vec<TargetConfig>,

    /// Location of the persisted state document
    pub state_path: PathBuf,

    /// Netscape-format cookie export
    pub cookies_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let mut settings = Self {
            session_cookie_name: "account_id_v2".to_string(),
            session_check_url: "https://www.hoyolab.com".to_string(),
            redirect_url: "https://www.hoyolab.com/home".to_string(),
            default_timeout_ms: 8000,
            poll_interval_ms: 5 * 60 * 1000,
            http_status_policy: HttpStatusPolicy::default(),
            targets: builtin_targets(),
            state_path: PathBuf::from("checkin_state.json"),
            cookies_path: PathBuf::from("cookies.txt"),
        };
        settings.normalize_targets();
        settings
    }
}

impl Settings {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(name) = lookup("SESSION_COOKIE_NAME") {
            settings.session_cookie_name = name;
        }

        if let Some(url) = lookup("SESSION_CHECK_URL") {
            settings.session_check_url = url;
        }

        if let Some(url) = lookup("REDIRECT_URL") {
            settings.redirect_url = url;
        }

        if let Some(timeout) = lookup("DEFAULT_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                settings.default_timeout_ms = ms;
            }
        }

        if let Some(interval) = lookup("POLL_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                settings.poll_interval_ms = ms;
            }
        }

        if let Some(policy) = lookup("HTTP_STATUS_POLICY") {
            if let Some(policy) = HttpStatusPolicy::parse(&policy) {
                settings.http_status_policy = policy;
            }
        }

        if let Some(path) = lookup("STATE_FILE") {
            settings.state_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("COOKIES_FILE") {
            settings.cookies_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("TARGETS_FILE") {
            settings.targets = load_targets_file(Path::new(&path))?;
        } else {
            settings.targets = builtin_targets();
        }

        settings.normalize_targets();
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.session_cookie_name.is_empty() {
            return Err("session_cookie_name cannot be empty".to_string());
        }

        if Url::parse(&self.session_check_url).is_err() {
            return Err(format!(
                "session_check_url is not a valid URL: {:?}",
                self.session_check_url
            ));
        }

        if self.default_timeout_ms == 0 {
            return Err("default_timeout_ms must be greater than 0".to_string());
        }

        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".to_string());
        }

        for pair in self.targets.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(format!("target id {} is configured twice", pair[0].id));
            }
        }

        if self.targets.iter().any(|t| t.id == 0) {
            return Err("target ids start at 1".to_string());
        }

        if let Some(target) = self.targets.iter().find(|t| t.id > MAX_TARGET_ID) {
            return Err(format!(
                "target id {} exceeds the maximum of {}",
                target.id, MAX_TARGET_ID
            ));
        }

        Ok(())
    }

    /// Target for `id`, or an incomplete config when none is configured
    pub fn target(&self, id: u32) -> TargetConfig {
        self.targets
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .unwrap_or_else(|| TargetConfig::unconfigured(id))
    }

    /// Ids visited by a pass: `1..=N` where N is the highest configured id
    pub fn target_ids(&self) -> std::ops::RangeInclusive<u32> {
        let max = self.targets.iter().map(|t| t.id).max().unwrap_or(0);
        1..=max.min(MAX_TARGET_ID)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Fill in default timeouts and sort targets by id
    fn normalize_targets(&mut self) {
        for target in &mut self.targets {
            if target.timeout_ms == 0 {
                target.timeout_ms = self.default_timeout_ms;
            }
        }
        self.targets.sort_by_key(|t| t.id);
    }
}

/// Read a JSON array of target definitions
pub fn load_targets_file(path: &Path) -> Result<Vec<TargetConfig>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AgentError::Config(format!("cannot read targets file {}: {}", path.display(), e))
    })?;
    let targets: Vec<TargetConfig> = serde_json::from_str(&raw)?;
    Ok(targets)
}

/// HoYoLAB daily sign-in endpoints
fn builtin_targets() -> Vec<TargetConfig> {
    let target = |id, name: &str, url: &str, act_id: &str, checked: i64| TargetConfig {
        id,
        name: name.to_string(),
        url: url.to_string(),
        method: HttpMethod::Post,
        request_param: Some(act_id.to_string()),
        request_param_key: default_param_key(),
        success_path: "retcode".to_string(),
        success_values: vec![json!(0), json!(checked)],
        timeout_ms: 0,
    };

    vec![
        target(
            1,
            "Genshin Impact",
            "https://sg-hk4e-api.hoyolab.com/event/sol/sign?lang=vi-vn",
            "e202102251931481",
            -5003,
        ),
        target(
            2,
            "Honkai: Star Rail",
            "https://sg-public-api.hoyolab.com/event/luna/hkrpg/os/sign?lang=vi-vn",
            "e202303301540311",
            -5003,
        ),
        target(
            3,
            "Zenless Zone Zero",
            "https://sg-public-api.hoyolab.com/event/luna/zzz/os/sign",
            "e202406031448091",
            -500012,
        ),
        target(
            4,
            "Honkai Impact 3rd",
            "https://sg-public-api.hoyolab.com/event/mani/sign?lang=vi-vn",
            "e202110291205111",
            -5003,
        ),
    ]
}
