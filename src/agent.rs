//! Agent runtime: startup check, periodic alarm and observer requests

use crate::config::Settings;
use crate::cookies::{CookieFile, CookieSource};
use crate::errors::{AgentError, Result};
use crate::messages::{Request, Response};
use crate::notify::Notifier;
use crate::orchestrator::{CheckinOrchestrator, RunOutcome};
use crate::session::SessionGate;
use crate::store::{StateStore, load_enabled, load_status, save_enabled};
use crate::transport::{CheckinExecutor, HttpTransport};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Name of the periodic trigger, used in logs
pub const ALARM_NAME: &str = "cookieCheck";

/// Alarm period for a poll interval: whole minutes, at least one
pub fn alarm_period(poll_interval_ms: u64) -> Duration {
    let minutes = (poll_interval_ms as f64 / 60_000.0).round().max(1.0) as u64;
    Duration::from_secs(minutes * 60)
}

/// A request together with the channel its reply goes back on
pub type Envelope = (Request, oneshot::Sender<Response>);

/// Sending half used by observers to talk to a running agent
#[derive(Debug, Clone)]
pub struct AgentHandle {
    tx: mpsc::Sender<Envelope>,
}

impl AgentHandle {
    /// Create a handle and the receiver to pass to [`CheckinAgent::run_until`]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub async fn request(&self, request: Request) -> Result<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .await
            .map_err(|_| AgentError::Channel("agent is not running".to_string()))?;
        reply_rx
            .await
            .map_err(|_| AgentError::Channel("agent dropped the request".to_string()))
    }
}

/// Ties the session gate, orchestrator and state store together
pub struct CheckinAgent {
    settings: Arc<Settings>,
    gate: SessionGate,
    cookies: Arc<dyn CookieSource>,
    orchestrator: Arc<CheckinOrchestrator>,
    store: Arc<dyn StateStore>,
    agent_id: String,
}

impl CheckinAgent {
    pub fn new(
        settings: Arc<Settings>,
        cookies: Arc<dyn CookieSource>,
        executor: Arc<dyn CheckinExecutor>,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let gate = SessionGate::new(
            Arc::clone(&settings),
            Arc::clone(&cookies),
            Arc::clone(&notifier),
        );
        let orchestrator = Arc::new(CheckinOrchestrator::new(
            Arc::clone(&settings),
            executor,
            Arc::clone(&store),
            notifier,
        ));

        Self {
            settings,
            gate,
            cookies,
            orchestrator,
            store,
            agent_id: Uuid::new_v4().to_string(),
        }
    }

    /// Wire up the cookie file and HTTP transport described by `settings`
    pub fn from_settings(
        settings: Settings,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        settings.validate().map_err(AgentError::Config)?;

        let cookies = CookieFile::new(&settings.cookies_path);
        let transport = HttpTransport::new(Some(cookies.jar()), settings.http_status_policy)?;

        Ok(Self::new(
            Arc::new(settings),
            Arc::new(cookies),
            Arc::new(transport),
            store,
            notifier,
        ))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run one pass in its own task so a panic ends only that pass.
    ///
    /// The cookie jar is refreshed first; a failed refresh keeps the cookies
    /// loaded last time.
    pub async fn run_checkins(&self) -> Option<RunOutcome> {
        if let Err(e) = self.cookies.refresh().await {
            warn!("Failed to refresh cookies before the pass: {}", e);
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        match tokio::spawn(async move { orchestrator.run().await }).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Check-in pass aborted: {}", e);
                None
            }
        }
    }

    /// Check the session, notify the observer, and run a pass if logged in
    #[instrument(skip(self), fields(agent_id = %self.agent_id))]
    pub async fn check_and_run(&self) -> Option<RunOutcome> {
        let session = self.gate.check_and_notify().await;
        if !session.present {
            info!(
                "Session cookie {} not found, waiting for login at {}",
                self.settings.session_cookie_name, self.settings.redirect_url
            );
            return None;
        }

        self.run_checkins().await
    }

    /// Answer one observer request
    pub async fn handle(&self, request: Request) -> Response {
        debug!("Handling request {:?}", request);

        match request {
            Request::CheckCookie => {
                let session = self.gate.check().await;
                Response::CookieCheck {
                    success: true,
                    cookie_exists: session.present,
                    cookie: session.cookie,
                }
            }
            Request::RunCheckins => Response::ack(self.run_checkins().await.is_some()),
            Request::GetConfig => Response::Config {
                success: true,
                config: Box::new(self.settings.as_ref().clone()),
            },
            Request::SetEnabledItems { enabled_items } => {
                save_enabled(self.store.as_ref(), &enabled_items).await;
                info!("Updated enabled items: {:?}", enabled_items);
                Response::ack(true)
            }
            Request::GetState => Response::State {
                success: true,
                enabled_items: load_enabled(self.store.as_ref()).await,
                checkin_status: load_status(self.store.as_ref()).await,
            },
        }
    }

    /// Start the agent and run until Ctrl-C
    pub async fn start(self: Arc<Self>, requests: mpsc::Receiver<Envelope>) -> Result<()> {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to wait for shutdown signal: {}", e);
            }
        };
        self.run_until(requests, shutdown).await;
        Ok(())
    }

    /// Startup check, then serve the alarm and requests until `shutdown`
    pub async fn run_until<F>(self: Arc<Self>, mut requests: mpsc::Receiver<Envelope>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let period = alarm_period(self.settings.poll_interval_ms);
        info!(
            "Starting check-in agent {} with {} targets, alarm {} every {}s",
            self.agent_id,
            self.settings.targets.len(),
            ALARM_NAME,
            period.as_secs()
        );

        self.check_and_run().await;

        let alarm_agent = Arc::clone(&self);
        let alarm = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!("Alarm {} fired", ALARM_NAME);
                alarm_agent.check_and_run().await;
            }
        });

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                envelope = requests.recv() => match envelope {
                    Some((request, reply)) => {
                        let agent = Arc::clone(&self);
                        tokio::spawn(async move {
                            let response = agent.handle(request).await;
                            if reply.send(response).is_err() {
                                debug!("Requester went away before the reply");
                            }
                        });
                    }
                    None => {
                        warn!("Request channel closed, serving the alarm only");
                        shutdown.as_mut().await;
                        break;
                    }
                },
            }
        }

        alarm.abort();
        info!("Check-in agent {} stopped", self.agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpMethod, TargetConfig};
    use crate::cookies::Cookie;
    use crate::messages::Message;
    use crate::notify::BroadcastNotifier;
    use crate::store::MemoryStore;
    use crate::transport::Outcome;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct StaticCookies {
        cookie: Option<Cookie>,
        refreshes: AtomicUsize,
    }

    #[async_trait]
    impl CookieSource for StaticCookies {
        async fn get(&self, _url: &str, _name: &str) -> Result<Option<Cookie>> {
            Ok(self.cookie.clone())
        }

        async fn refresh(&self) -> Result<()> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Err(AgentError::Cookie("export locked".to_string()))
        }
    }

    #[derive(Default)]
    struct CountingExecutor {
        calls: AtomicUsize,
        panic: bool,
    }

    #[async_trait]
    impl CheckinExecutor for CountingExecutor {
        async fn execute(&self, _target: &TargetConfig) -> Outcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic {
                panic!("executor bug");
            }
            Outcome::Success(json!({"retcode": 0}))
        }
    }

    fn session_cookie() -> Cookie {
        Cookie {
            name: "account_id_v2".to_string(),
            value: "1".to_string(),
            domain: ".hoyolab.com".to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: false,
            host_only: false,
            expires: None,
        }
    }

    fn agent(
        cookie: Option<Cookie>,
        executor: Arc<CountingExecutor>,
        notifier: &BroadcastNotifier,
    ) -> CheckinAgent {
        let cookies = Arc::new(StaticCookies {
            cookie,
            ..Default::default()
        });
        agent_with_cookies(cookies, executor, notifier)
    }

    fn agent_with_cookies(
        cookies: Arc<StaticCookies>,
        executor: Arc<CountingExecutor>,
        notifier: &BroadcastNotifier,
    ) -> CheckinAgent {
        let settings = Settings {
            targets: vec![TargetConfig {
                id: 1,
                name: "one".to_string(),
                url: "https://example.test/sign".to_string(),
                method: HttpMethod::Post,
                request_param: None,
                request_param_key: "act_id".to_string(),
                success_path: "retcode".to_string(),
                success_values: vec![json!(0)],
                timeout_ms: 1000,
            }],
            ..Settings::default()
        };
        CheckinAgent::new(
            Arc::new(settings),
            cookies,
            executor,
            Arc::new(MemoryStore::new()),
            Arc::new(notifier.clone()),
        )
    }

    #[test]
    fn test_alarm_period_rounds_to_minutes() {
        assert_eq!(alarm_period(5 * 60 * 1000), Duration::from_secs(300));
        assert_eq!(alarm_period(1000), Duration::from_secs(60));
        assert_eq!(alarm_period(150_000), Duration::from_secs(180));
        assert_eq!(alarm_period(0), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_absent_session_skips_pass() {
        let executor = Arc::new(CountingExecutor::default());
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();

        let outcome = agent(None, Arc::clone(&executor), &notifier)
            .check_and_run()
            .await;

        assert!(outcome.is_none());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            rx.recv().await.unwrap(),
            Message::CookieCheckResult { cookie_exists: false }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_present_session_runs_pass() {
        let executor = Arc::new(CountingExecutor::default());
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();

        let outcome = agent(Some(session_cookie()), Arc::clone(&executor), &notifier)
            .check_and_run()
            .await
            .expect("pass should run");

        assert_eq!(outcome.succeeded(1), Some(true));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(rx.recv().await.unwrap().kind(), "COOKIE_CHECK_RESULT");
        assert_eq!(rx.recv().await.unwrap().kind(), "CHECKIN_STATUS_UPDATE");
    }

    #[tokio::test]
    async fn test_every_pass_refreshes_cookies() {
        let cookies = Arc::new(StaticCookies {
            cookie: Some(session_cookie()),
            ..Default::default()
        });
        let executor = Arc::new(CountingExecutor::default());
        let notifier = BroadcastNotifier::new(8);
        let agent = agent_with_cookies(Arc::clone(&cookies), Arc::clone(&executor), &notifier);

        assert!(agent.handle(Request::RunCheckins).await.is_success());
        assert!(agent.check_and_run().await.is_some());

        // a failing refresh does not stop the pass
        assert_eq!(cookies.refreshes.load(Ordering::SeqCst), 2);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_pass_is_contained() {
        let executor = Arc::new(CountingExecutor {
            panic: true,
            ..Default::default()
        });
        let notifier = BroadcastNotifier::new(8);
        let agent = agent(Some(session_cookie()), executor, &notifier);

        assert!(agent.run_checkins().await.is_none());
        assert!(!agent.handle(Request::RunCheckins).await.is_success());
    }

    #[tokio::test]
    async fn test_request_handling() {
        let executor = Arc::new(CountingExecutor::default());
        let notifier = BroadcastNotifier::new(8);
        let agent = agent(Some(session_cookie()), Arc::clone(&executor), &notifier);

        let response = serde_json::to_value(agent.handle(Request::CheckCookie).await).unwrap();
        assert_eq!(response["success"], json!(true));
        assert_eq!(response["cookieExists"], json!(true));
        assert_eq!(response["cookie"]["name"], json!("account_id_v2"));

        let response = serde_json::to_value(agent.handle(Request::GetConfig).await).unwrap();
        assert_eq!(response["config"]["sessionCookieName"], json!("account_id_v2"));
        assert_eq!(response["config"]["targets"][0]["id"], json!(1));

        let mut enabled = crate::store::EnablementMap::new();
        enabled.insert("1".to_string(), false);
        let response = agent
            .handle(Request::SetEnabledItems {
                enabled_items: enabled,
            })
            .await;
        assert!(response.is_success());

        assert!(agent.handle(Request::RunCheckins).await.is_success());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);

        let response = serde_json::to_value(agent.handle(Request::GetState).await).unwrap();
        assert_eq!(response["enabledItems"], json!({"1": false}));
        assert_eq!(response["checkinStatus"], json!({"1": false}));
    }

    #[tokio::test]
    async fn test_run_until_serves_requests_and_stops() {
        let executor = Arc::new(CountingExecutor::default());
        let notifier = BroadcastNotifier::new(8);
        let agent = Arc::new(agent(Some(session_cookie()), Arc::clone(&executor), &notifier));

        let (handle, requests) = AgentHandle::channel(4);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(Arc::clone(&agent).run_until(requests, async {
            let _ = stop_rx.await;
        }));

        let response = handle.request(Request::RunCheckins).await.unwrap();
        assert!(response.is_success());

        // startup pass plus the requested one
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

        stop_tx.send(()).unwrap();
        running.await.unwrap();

        assert!(handle.request(Request::GetState).await.is_err());
    }
}
