//! Upstream gateway with a process-wide circuit breaker.
//!
//! The breaker models the health of the one shared vision service, so its
//! counters are global and every user contends on them. It has two states:
//! closed (calls go through) and open (calls fail fast until the cooldown
//! expires). There is no half-open trial call; the first call after expiry is a
//! normal call.

use chrono::{DateTime, Duration, Utc};
use formcoach_protocol::{RawAnalysis, UpstreamHealth, UpstreamState};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::VisionConfig;
use crate::error::UpstreamError;
use crate::vision::{HttpVisionService, VisionService};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { until: DateTime<Utc> },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    failure_count: u32,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            threshold: threshold.max(1),
            cooldown,
        }
    }

    /// `Err(until)` while the cooldown is running. An expired cooldown
    /// closes the breaker.
    pub fn check(&mut self, now: DateTime<Utc>) -> Result<(), DateTime<Utc>> {
        if let BreakerState::Open { until } = self.state {
            if now < until {
                return Err(until);
            }
            debug!("Vision service cooldown expired");
            self.state = BreakerState::Closed;
        }
        Ok(())
    }

    pub fn record_success(&mut self) {
        self.failure_count = 0;
    }

    /// Counts a failed call. Returns the cooldown expiry when this failure
    /// opened the breaker.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.failure_count += 1;
        if self.failure_count < self.threshold {
            return None;
        }

        let until = now + self.cooldown;
        self.state = BreakerState::Open { until };
        self.failure_count = 0;
        Some(until)
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }
}

pub struct UpstreamGateway {
    service: Option<Arc<dyn VisionService>>,
    breaker: Mutex<CircuitBreaker>,
    clock: Clock,
}

impl UpstreamGateway {
    pub fn new(service: Option<Arc<dyn VisionService>>, breaker: CircuitBreaker) -> Self {
        Self {
            service,
            breaker: Mutex::new(breaker),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn from_config(config: &VisionConfig) -> Result<Self, UpstreamError> {
        let service = match config.base_url.as_deref() {
            Some(url) => {
                let http: Arc<dyn VisionService> =
                    Arc::new(HttpVisionService::new(url, config.request_timeout())?);
                Some(http)
            }
            None => None,
        };
        let breaker = CircuitBreaker::new(config.failure_threshold, config.cooldown());
        Ok(Self::new(service, breaker))
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.service.is_some()
    }

    /// Runs one analysis through the breaker. A cooldown rejection never
    /// touches the network.
    pub async fn analyze(&self, image: &str) -> Result<RawAnalysis, UpstreamError> {
        let admitted = self.lock_breaker().check((self.clock)());
        if let Err(until) = admitted {
            return Err(UpstreamError::Cooldown { until });
        }

        let service = self.service.as_ref().ok_or(UpstreamError::Unavailable)?;

        match service.analyze(image).await {
            Ok(analysis) => {
                self.lock_breaker().record_success();
                Ok(analysis)
            }
            Err(err) => {
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    /// Clears the upstream model state. Skipped when unconfigured; does not
    /// count toward the breaker.
    pub async fn reset(&self) -> Result<(), UpstreamError> {
        match self.service.as_ref() {
            Some(service) => service.reset().await,
            None => Ok(()),
        }
    }

    pub fn health(&self) -> UpstreamHealth {
        let breaker = self.lock_breaker();
        let now = (self.clock)();
        let cooldown_until = match breaker.state() {
            BreakerState::Open { until } if now < until => Some(until),
            _ => None,
        };
        UpstreamHealth {
            configured: self.is_configured(),
            state: if cooldown_until.is_some() {
                UpstreamState::Open
            } else {
                UpstreamState::Closed
            },
            failure_count: breaker.failure_count(),
            cooldown_until,
        }
    }

    fn record_failure(&self, err: &UpstreamError) {
        if !err.is_transport_failure() {
            return;
        }
        let mut breaker = self.lock_breaker();
        let opened = breaker.record_failure((self.clock)());
        warn!(
            error = %err,
            code = %err.code(),
            failure_count = breaker.failure_count(),
            "Vision service call failed"
        );
        if let Some(until) = opened {
            warn!(
                cooldown_until = %until.to_rfc3339(),
                "Vision service entering cooldown"
            );
        }
    }

    fn lock_breaker(&self) -> MutexGuard<'_, CircuitBreaker> {
        self.breaker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
