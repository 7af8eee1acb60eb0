//! Session gate: decides whether a check-in pass should run at all

use crate::config::Settings;
use crate::cookies::{Cookie, CookieSource};
use crate::messages::Message;
use crate::notify::Notifier;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Whether the session cookie is present
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub present: bool,
    pub cookie: Option<Cookie>,
}

impl SessionState {
    fn absent() -> Self {
        Self {
            present: false,
            cookie: None,
        }
    }
}

pub struct SessionGate {
    settings: Arc<Settings>,
    cookies: Arc<dyn CookieSource>,
    notifier: Arc<dyn Notifier>,
}

impl SessionGate {
    pub fn new(
        settings: Arc<Settings>,
        cookies: Arc<dyn CookieSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            cookies,
            notifier,
        }
    }

    /// Look up the session cookie. Read failures count as absent.
    pub async fn check(&self) -> SessionState {
        let url = &self.settings.session_check_url;
        let name = &self.settings.session_cookie_name;

        match self.cookies.get(url, name).await {
            Ok(Some(cookie)) => {
                debug!("Session cookie {} present for {}", name, url);
                SessionState {
                    present: true,
                    cookie: Some(cookie),
                }
            }
            Ok(None) => {
                debug!("Session cookie {} absent for {}", name, url);
                SessionState::absent()
            }
            Err(e) => {
                warn!("Failed to read session cookie, treating as absent: {}", e);
                SessionState::absent()
            }
        }
    }

    /// Check the session and tell the observer whether to prompt for login
    pub async fn check_and_notify(&self) -> SessionState {
        let state = self.check().await;
        self.notifier.send(Message::CookieCheckResult {
            cookie_exists: state.present,
        });
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AgentError, Result};
    use crate::notify::BroadcastNotifier;
    use async_trait::async_trait;

    enum FakeJar {
        Empty,
        Broken,
        Holding(Cookie),
    }

    #[async_trait]
    impl CookieSource for FakeJar {
        async fn get(&self, _url: &str, name: &str) -> Result<Option<Cookie>> {
            match self {
                FakeJar::Empty => Ok(None),
                FakeJar::Broken => Err(AgentError::Cookie("permission denied".to_string())),
                FakeJar::Holding(cookie) if cookie.name == name => Ok(Some(cookie.clone())),
                FakeJar::Holding(_) => Ok(None),
            }
        }
    }

    fn session_cookie() -> Cookie {
        Cookie {
            name: "account_id_v2".to_string(),
            value: "12345".to_string(),
            domain: ".hoyolab.com".to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: false,
            host_only: false,
            expires: None,
        }
    }

    fn gate(jar: FakeJar, notifier: &BroadcastNotifier) -> SessionGate {
        SessionGate::new(
            Arc::new(Settings::default()),
            Arc::new(jar),
            Arc::new(notifier.clone()),
        )
    }

    #[tokio::test]
    async fn test_present_cookie() {
        let notifier = BroadcastNotifier::new(4);
        let state = gate(FakeJar::Holding(session_cookie()), &notifier).check().await;
        assert!(state.present);
        assert_eq!(state.cookie, Some(session_cookie()));
    }

    #[tokio::test]
    async fn test_read_failure_counts_as_absent() {
        let notifier = BroadcastNotifier::new(4);
        let state = gate(FakeJar::Broken, &notifier).check().await;
        assert_eq!(state, SessionState::absent());
    }

    #[tokio::test]
    async fn test_check_and_notify_reports_absence() {
        let notifier = BroadcastNotifier::new(4);
        let mut rx = notifier.subscribe();

        let state = gate(FakeJar::Empty, &notifier).check_and_notify().await;

        assert!(!state.present);
        assert_eq!(
            rx.recv().await.unwrap(),
            Message::CookieCheckResult { cookie_exists: false }
        );
        assert!(rx.try_recv().is_err());
    }
}
