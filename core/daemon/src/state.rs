//! Shared daemon state.
//!
//! Everything a request handler needs, built once at startup and shared
//! behind an `Arc`. The evaluator registry and the upstream breaker are the
//! only mutable in-memory state; durable data lives in SQLite.

use chrono::Utc;
use formcoach_protocol::HealthResponse;
use std::sync::Arc;
use tracing::{debug, info};

use crate::auth::{Authenticator, StaticTokenAuthenticator};
use crate::config::{DaemonConfig, RegistryConfig};
use crate::db::Db;
use crate::error::{ConfigError, StoreError, UpstreamError};
use crate::evaluator::EvaluatorDefaults;
use crate::gateway::UpstreamGateway;
use crate::orchestrator::FrameAnalysisOrchestrator;
use crate::profiles::ProfileStore;
use crate::recorder::SessionRecorder;
use crate::registry::EvaluatorRegistry;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

pub struct SharedState {
    registry: Arc<EvaluatorRegistry>,
    gateway: Arc<UpstreamGateway>,
    orchestrator: FrameAnalysisOrchestrator,
    recorder: SessionRecorder,
    profiles: ProfileStore,
    authenticator: Arc<dyn Authenticator>,
}

impl SharedState {
    pub fn from_config(config: &DaemonConfig) -> Result<Self, StartupError> {
        config.validate()?;
        let db = Db::new(config.storage.resolve_db_path()?)?;
        let gateway = UpstreamGateway::from_config(&config.vision)?;
        let authenticator = StaticTokenAuthenticator::new(config.auth.tokens.clone());
        if authenticator.is_empty() {
            tracing::warn!("No auth tokens configured; every API request will be rejected");
        }

        let defaults = EvaluatorDefaults {
            target_reps: config.sessions.default_target_reps,
            exercise_name: config.sessions.default_exercise.clone(),
        };
        let registry = Arc::new(EvaluatorRegistry::new(defaults));
        let profiles = ProfileStore::new(db.clone());
        let recorder = SessionRecorder::new(
            Arc::clone(&registry),
            db,
            config.sessions.end_without_session,
        );

        Ok(Self::new(
            registry,
            Arc::new(gateway),
            recorder,
            profiles,
            Arc::new(authenticator),
        ))
    }

    pub fn new(
        registry: Arc<EvaluatorRegistry>,
        gateway: Arc<UpstreamGateway>,
        recorder: SessionRecorder,
        profiles: ProfileStore,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let orchestrator =
            FrameAnalysisOrchestrator::new(Arc::clone(&registry), Arc::clone(&gateway));
        Self {
            registry,
            gateway,
            orchestrator,
            recorder,
            profiles,
            authenticator,
        }
    }

    pub fn registry(&self) -> &EvaluatorRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> &FrameAnalysisOrchestrator {
        &self.orchestrator
    }

    pub fn recorder(&self) -> &SessionRecorder {
        &self.recorder
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            tracked_evaluators: self.registry.len(),
            upstream: self.gateway.health(),
        }
    }
}

/// Periodically evicts evaluators that have sat idle past the configured TTL.
pub fn spawn_idle_sweeper(
    state: Arc<SharedState>,
    config: &RegistryConfig,
) -> tokio::task::JoinHandle<()> {
    let period = config.sweep_interval();
    let max_idle = config.idle_ttl();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let evicted = state.registry().sweep_idle(Utc::now(), max_idle);
            if evicted > 0 {
                info!(
                    evicted,
                    remaining = state.registry().len(),
                    "Evicted idle evaluators"
                );
            } else {
                debug!("Idle evaluator sweep found nothing to evict");
            }
        }
    })
}
