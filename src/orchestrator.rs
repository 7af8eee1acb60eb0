//! Check-in pass over all configured targets

use crate::config::{Settings, TargetConfig};
use crate::extract::{coerce_to_string, matches_any, resolve_with_fallback};
use crate::messages::Message;
use crate::notify::Notifier;
use crate::store::{StateStore, StatusMap, load_enabled, load_status, save_status};
use crate::transport::{CheckinExecutor, Outcome};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Result of one check-in pass
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub run_id: Uuid,
    /// Full status map as persisted after the pass
    pub status: StatusMap,
    /// One entry per failing target, in id order
    pub errors: Vec<String>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    pub fn succeeded(&self, id: u32) -> Option<bool> {
        self.status.get(&id.to_string()).copied()
    }
}

/// Drives the executor across targets and records the results
pub struct CheckinOrchestrator {
    settings: Arc<Settings>,
    executor: Arc<dyn CheckinExecutor>,
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
}

impl CheckinOrchestrator {
    pub fn new(
        settings: Arc<Settings>,
        executor: Arc<dyn CheckinExecutor>,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            executor,
            store,
            notifier,
        }
    }

    /// Run one pass: skip disabled and incomplete targets, execute the rest
    /// concurrently, persist the merged status and notify the observer.
    #[instrument(skip(self))]
    pub async fn run(&self) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let enabled = load_enabled(self.store.as_ref()).await;
        let previous = load_status(self.store.as_ref()).await;

        let mut visited = StatusMap::new();
        let mut runnable = Vec::new();

        for id in self.settings.target_ids() {
            let key = id.to_string();

            if enabled.get(&key) == Some(&false) {
                debug!("Item {} is disabled, skipping", id);
                visited.insert(key, false);
                continue;
            }

            let target = self.settings.target(id);
            if !target.is_complete() {
                debug!("Item {} has incomplete configuration, keeping previous status", id);
                let kept = previous.get(&key).copied().unwrap_or(false);
                visited.insert(key, kept);
                continue;
            }

            runnable.push(target);
        }

        let outcomes = join_all(runnable.iter().map(|target| self.executor.execute(target))).await;

        let mut errors = Vec::new();
        for (target, outcome) in runnable.iter().zip(outcomes) {
            let (succeeded, error) = evaluate(target, outcome);
            visited.insert(target.key(), succeeded);

            match error {
                Some(error) => {
                    warn!("{} ({})", error, target.label());
                    errors.push(error);
                }
                None => info!("Check-in succeeded for item {} ({})", target.id, target.label()),
            }
        }

        // Overlay onto what is stored now so ids this pass didn't visit survive
        let mut status = load_status(self.store.as_ref()).await;
        status.extend(visited);
        save_status(self.store.as_ref(), &status).await;

        self.notifier.send(Message::CheckinStatusUpdate {
            checkin_status: status.clone(),
        });
        if !errors.is_empty() {
            self.notifier.send(Message::CheckinError {
                errors: errors.clone(),
            });
        }

        info!(
            %run_id,
            attempted = runnable.len(),
            failed = errors.len(),
            "Check-in pass complete"
        );

        RunOutcome {
            run_id,
            status,
            errors,
            finished_at: Utc::now(),
        }
    }
}

/// Decide success for one executed target and format its error, if any
pub fn evaluate(target: &TargetConfig, outcome: Outcome) -> (bool, Option<String>) {
    let id = target.id;
    match outcome {
        Outcome::Success(body) => {
            let value = resolve_with_fallback(&body, &target.success_path);
            if matches_any(value, &target.success_values) {
                (true, None)
            } else {
                (
                    false,
                    Some(format!(
                        "Check-in failed for item {}: unexpected value ({})",
                        id,
                        coerce_to_string(value)
                    )),
                )
            }
        }
        Outcome::HttpError(code) => (false, Some(format!("API not OK for item {} ({})", id, code))),
        Outcome::Timeout => (
            false,
            Some(format!("Error fetching/parsing API for item {}: Timeout", id)),
        ),
        Outcome::TransportOrParseError(message) => (
            false,
            Some(format!("Error fetching/parsing API for item {}: {}", id, message)),
        ),
    }
}
