//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every registered backend
//! - Update backend health state based on results

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::health::probe::{HttpProbe, Probe, ProbeError};
use crate::load_balancer::BackendRegistry;
use crate::observability::metrics;

pub struct HealthMonitor<P = HttpProbe> {
    registry: Arc<BackendRegistry>,
    probe: P,
    interval: Duration,
    timeout: Duration,
}

impl HealthMonitor<HttpProbe> {
    pub fn from_config(registry: Arc<BackendRegistry>, config: &HealthCheckConfig) -> Self {
        Self::new(
            registry,
            HttpProbe::from_config(config),
            Duration::from_secs(config.interval_secs),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

impl<P: Probe> HealthMonitor<P> {
    pub fn new(registry: Arc<BackendRegistry>, probe: P, interval: Duration, timeout: Duration) -> Self {
        Self {
            registry,
            probe,
            interval,
            timeout,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval = ?self.interval,
            timeout = ?self.timeout,
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            // A tick runs to completion before the shutdown branch is polled
            // again, so a stop never lands between a probe and its update.
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every registered backend once and apply the results.
    pub async fn check_all(&self) {
        let addresses = self.registry.addresses();

        let probes = addresses.iter().map(|address| async move {
            let result = match time::timeout(self.timeout, self.probe.probe(address)).await {
                Ok(result) => result,
                Err(_) => Err(ProbeError::Timeout),
            };
            (address, result)
        });

        for (address, result) in join_all(probes).await {
            let healthy = result.is_ok();
            let previous = self.registry.set_health(address, healthy);

            match (previous, &result) {
                // Deregistered while the probe was in flight.
                (None, _) => continue,
                (Some(false), Ok(())) => {
                    tracing::info!(address = %address, "Backend is UP");
                }
                (Some(true), Err(e)) => {
                    tracing::warn!(address = %address, error = %e, "Backend is DOWN");
                }
                (Some(_), Err(e)) => {
                    tracing::debug!(address = %address, error = %e, "Backend still down");
                }
                (Some(_), Ok(())) => {}
            }

            metrics::record_backend_health(address, healthy);
        }
    }
}
