// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Self-Registration Loop - Background task announcing this controller
//!
//! Writes `<controller id>/address` into the registry right away, then again
//! after every `delay`. The timer starts only once an attempt has finished,
//! so a slow registry never causes overlapping attempts. Failures are
//! logged and retried at the next interval without backoff.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::events::ControllerEvent;
use crate::domain::registry::{controller_key, Registry, RegistryError, ADDRESS_LEAF};
use crate::infrastructure::event_bus::EventBus;

/// Default interval between registration attempts.
pub const DEFAULT_REGISTRATION_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    pub controller_id: String,

    /// Address announced to the registry
    pub controller_address: String,

    /// Pause between the end of one attempt and the start of the next
    pub delay: Duration,
}

pub struct RegistrationLoop {
    registry: Arc<dyn Registry>,
    config: RegistrationConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl RegistrationLoop {
    pub fn new(registry: Arc<dyn Registry>, config: RegistrationConfig) -> Self {
        Self {
            registry,
            config,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Perform one registration attempt.
    pub async fn register_once(&self) -> Result<(), RegistryError> {
        let key = controller_key(&self.config.controller_id, ADDRESS_LEAF);
        self.registry
            .set_value(&key, &self.config.controller_address)
            .await
    }

    /// Spawn the loop. The first attempt starts immediately.
    pub fn start(self) -> RegistrationHandle {
        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(token.clone()));
        RegistrationHandle { token, task }
    }

    async fn run(self, token: CancellationToken) {
        info!(
            controller_id = %self.config.controller_id,
            address = %self.config.controller_address,
            delay_secs = self.config.delay.as_secs(),
            "Starting registration loop"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                result = self.register_once() => self.report(result),
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.config.delay) => {}
            }
        }

        info!("Registration loop stopped");
    }

    fn report(&self, result: Result<(), RegistryError>) {
        let event = match result {
            Ok(()) => {
                debug!("Registered {} as {}", self.config.controller_id, self.config.controller_address);
                metrics::counter!("oim_registry_attempts_total", "outcome" => "ok").increment(1);
                ControllerEvent::RegistrationSucceeded {
                    controller_id: self.config.controller_id.clone(),
                    address: self.config.controller_address.clone(),
                    registered_at: Utc::now(),
                }
            }
            Err(e) => {
                warn!("Registration of {} failed: {}", self.config.controller_id, e);
                metrics::counter!("oim_registry_attempts_total", "outcome" => "error").increment(1);
                ControllerEvent::RegistrationFailed {
                    controller_id: self.config.controller_id.clone(),
                    reason: e.to_string(),
                    failed_at: Utc::now(),
                }
            }
        };
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

/// Handle to a running registration loop.
pub struct RegistrationHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl RegistrationHandle {
    /// Cancel the in-flight attempt, if any, and wait for the task to exit.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!("Registration task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::registry::InMemoryRegistry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Registry that blocks each call for `latency` and tracks concurrency.
    struct SlowRegistry {
        latency: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Registry for SlowRegistry {
        async fn set_value(&self, _key: &str, _value: &str) -> Result<(), RegistryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Err(RegistryError::Unreachable("timed out".into()))
        }
    }

    fn config(delay: Duration) -> RegistrationConfig {
        RegistrationConfig {
            controller_id: "host-0".into(),
            controller_address: "tcp://10.0.0.5:8999".into(),
            delay,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn registers_immediately() {
        let registry = InMemoryRegistry::new();
        let bus = Arc::new(EventBus::new(8));
        let mut events = bus.subscribe();

        let handle = RegistrationLoop::new(Arc::new(registry.clone()), config(Duration::from_secs(60)))
            .with_event_bus(bus)
            .start();

        assert!(matches!(
            events.recv().await.unwrap(),
            ControllerEvent::RegistrationSucceeded { .. }
        ));
        assert_eq!(registry.get("host-0/address").as_deref(), Some("tcp://10.0.0.5:8999"));

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_registry_never_overlaps() {
        let registry = Arc::new(SlowRegistry {
            latency: Duration::from_secs(5),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });

        let handle = RegistrationLoop::new(registry.clone(), config(Duration::from_secs(1))).start();
        tokio::time::sleep(Duration::from_secs(30)).await;
        handle.stop().await;

        assert_eq!(registry.max_active.load(Ordering::SeqCst), 1);
        // Each cycle takes 5s attempt + 1s delay.
        let calls = registry.calls.load(Ordering::SeqCst);
        assert!((5..=6).contains(&calls), "calls = {calls}");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_in_flight_attempt() {
        let registry = Arc::new(SlowRegistry {
            latency: Duration::from_secs(3600),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });

        let handle = RegistrationLoop::new(registry.clone(), config(Duration::from_secs(1))).start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.active.load(Ordering::SeqCst), 1);

        handle.stop().await;
        assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
    }
}
