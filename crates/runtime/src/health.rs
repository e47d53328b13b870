//! Node health tracking.
//!
//! A node tracks several health facets (evaluation, run, content, source)
//! and reports the least healthy of them. Ordering is explicit:
//! `Unknown < Healthy < Unhealthy < Exited`, greater meaning worse.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health level, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
    Exited,
}

impl std::fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthLevel::Unknown => "unknown",
            HealthLevel::Healthy => "healthy",
            HealthLevel::Unhealthy => "unhealthy",
            HealthLevel::Exited => "exited",
        };
        write!(f, "{}", s)
    }
}

/// One health observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Health {
    pub level: HealthLevel,
    pub message: String,
    pub update_time: DateTime<Utc>,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            level: HealthLevel::Unknown,
            message: String::new(),
            update_time: Utc::now(),
        }
    }
}

impl Health {
    /// A health observation stamped now.
    pub fn new(level: HealthLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            update_time: Utc::now(),
        }
    }

    pub fn healthy(message: impl Into<String>) -> Self {
        Self::new(HealthLevel::Healthy, message)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthLevel::Unhealthy, message)
    }

    pub fn exited(message: impl Into<String>) -> Self {
        Self::new(HealthLevel::Exited, message)
    }

    /// Combine health facets into the aggregate a node reports: the worst
    /// level wins; the update time is the most recent among contributors.
    pub fn least_healthy(facets: impl IntoIterator<Item = Health>) -> Health {
        let mut result = Health::default();
        let mut latest = result.update_time;
        for facet in facets {
            latest = latest.max(facet.update_time);
            if facet.level > result.level {
                result = facet;
            }
        }
        result.update_time = latest;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(HealthLevel::Unknown < HealthLevel::Healthy);
        assert!(HealthLevel::Healthy < HealthLevel::Unhealthy);
        assert!(HealthLevel::Unhealthy < HealthLevel::Exited);
    }

    #[test]
    fn test_all_healthy_aggregates_healthy() {
        let aggregate = Health::least_healthy(vec![
            Health::healthy("eval ok"),
            Health::healthy("run ok"),
        ]);
        assert_eq!(aggregate.level, HealthLevel::Healthy);
    }

    #[test]
    fn test_worst_facet_wins() {
        let aggregate = Health::least_healthy(vec![
            Health::healthy("eval ok"),
            Health::unhealthy("run failed"),
            Health::healthy("content ok"),
        ]);
        assert_eq!(aggregate.level, HealthLevel::Unhealthy);
        assert_eq!(aggregate.message, "run failed");
    }

    #[test]
    fn test_exited_beats_unhealthy() {
        let aggregate = Health::least_healthy(vec![
            Health::unhealthy("degraded"),
            Health::exited("gone"),
        ]);
        assert_eq!(aggregate.level, HealthLevel::Exited);
    }

    #[test]
    fn test_update_time_is_most_recent() {
        let old = Health {
            level: HealthLevel::Exited,
            message: "old".into(),
            update_time: Utc::now() - chrono::Duration::hours(1),
        };
        let recent = Health::healthy("fresh");
        let recent_time = recent.update_time;
        let aggregate = Health::least_healthy(vec![old, recent]);
        assert_eq!(aggregate.level, HealthLevel::Exited);
        assert_eq!(aggregate.update_time, recent_time);
    }
}
