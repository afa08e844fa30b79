//! Service health reporting
//!
//! `GET /health` reports one [`ComponentHealth`] per moving part (database,
//! provider registry, background sweeps, webhook dispatcher) and folds them
//! into a score.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Fraction of healthy components needed for the service to count as
/// healthy.
const HEALTHY_THRESHOLD: f64 = 0.8;

/// Overall health of the service
///
/// # Example
/// ```
/// use calsync_api::utils::health::{ComponentHealth, HealthStatus};
///
/// let mut status = HealthStatus::new()
///     .add_component(ComponentHealth::healthy("database"))
///     .add_component(ComponentHealth::unhealthy("dispatcher", "worker stopped"));
/// status.calculate_score();
///
/// assert_eq!(status.score, 0.5);
/// assert!(!status.is_healthy);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub is_healthy: bool,

    /// `healthy_components / total_components`, 1.0 with no components.
    pub score: f64,

    pub message: Option<String>,

    pub components: Vec<ComponentHealth>,

    /// Unix timestamp of the check
    pub timestamp: i64,
}

impl HealthStatus {
    /// Healthy status with no components.
    pub fn new() -> Self {
        Self {
            is_healthy: true,
            score: 1.0,
            message: None,
            components: Vec::new(),
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn add_component(mut self, component: ComponentHealth) -> Self {
        self.components.push(component);
        self
    }

    /// Recompute `score` and `is_healthy`. A failing critical component
    /// makes the service unhealthy whatever the score.
    pub fn calculate_score(&mut self) {
        if self.components.is_empty() {
            return;
        }

        let healthy_count = self.components.iter().filter(|c| c.is_healthy).count();
        self.score = healthy_count as f64 / self.components.len() as f64;

        let critical_down: Vec<&str> = self
            .components
            .iter()
            .filter(|c| c.critical && !c.is_healthy)
            .map(|c| c.name.as_str())
            .collect();
        self.is_healthy = self.score >= HEALTHY_THRESHOLD && critical_down.is_empty();
        if !critical_down.is_empty() {
            self.message = Some(format!("critical components down: {}", critical_down.join(", ")));
        }
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Health of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component identifier, e.g. `"database"` or `"dispatcher"`
    pub name: String,

    pub is_healthy: bool,

    /// The service cannot do useful work without this component.
    #[serde(default)]
    pub critical: bool,

    pub message: Option<String>,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_healthy: true, critical: false, message: None }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), is_healthy: false, critical: false, message: Some(message.into()) }
    }

    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_status_is_healthy_without_components() {
        let mut status = HealthStatus::new();
        status.calculate_score();
        assert!(status.is_healthy);
        assert_eq!(status.score, 1.0);
        assert!(status.message.is_none());
    }

    #[test]
    fn score_at_threshold_is_healthy() {
        let mut status = HealthStatus::new()
            .add_component(ComponentHealth::healthy("database").critical())
            .add_component(ComponentHealth::healthy("providers"))
            .add_component(ComponentHealth::healthy("dispatcher"))
            .add_component(ComponentHealth::healthy("token_sweep"))
            .add_component(ComponentHealth::unhealthy("webhook_sweep", "stopped"));

        status.calculate_score();

        assert_eq!(status.score, 0.8);
        assert!(status.is_healthy);
    }

    #[test]
    fn failing_critical_component_overrides_score() {
        let mut status = HealthStatus::new()
            .add_component(ComponentHealth::unhealthy("database", "pool exhausted").critical())
            .add_component(ComponentHealth::healthy("providers"))
            .add_component(ComponentHealth::healthy("dispatcher"))
            .add_component(ComponentHealth::healthy("token_sweep"))
            .add_component(ComponentHealth::healthy("webhook_sweep"));

        status.calculate_score();

        assert_eq!(status.score, 0.8);
        assert!(!status.is_healthy);
        assert_eq!(status.message.as_deref(), Some("critical components down: database"));
    }
}
