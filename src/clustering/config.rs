use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::ClusterError;

pub const DEFAULT_CONFIG_PATH: &str = "assets/cluster_config.ron";

/// Tunables for search, interception and maintenance.
///
/// Cluster geometry (radii, capacity) is not configurable: every cluster
/// shares the constants in [`super::cluster`].
#[derive(Resource, Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    // Tracker
    pub movement_threshold: f64,

    // New-cluster search
    pub search_radius: f64,
    pub min_cluster_separation: f64,
    pub max_search_attempts: usize,
    pub fallback_jitter: f64,

    // Interceptor
    pub min_relocation_distance: f64,
    pub processing_cooldown_secs: f64,

    // Maintenance
    pub cleanup_interval_secs: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            movement_threshold: 2.0,
            search_radius: 1000.0,
            min_cluster_separation: 100.0,
            max_search_attempts: 50,
            fallback_jitter: 1000.0,
            min_relocation_distance: 100.0,
            processing_cooldown_secs: 1.0,
            cleanup_interval_secs: 300.0,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<(), ClusterError> {
        let positive = [
            ("movement_threshold", self.movement_threshold),
            ("search_radius", self.search_radius),
            ("min_cluster_separation", self.min_cluster_separation),
            ("min_relocation_distance", self.min_relocation_distance),
            ("processing_cooldown_secs", self.processing_cooldown_secs),
            ("cleanup_interval_secs", self.cleanup_interval_secs),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ClusterError::Config(format!("{name} must be positive, got {value}")));
            }
        }
        if !(self.fallback_jitter.is_finite() && self.fallback_jitter >= 0.0) {
            return Err(ClusterError::Config(format!(
                "fallback_jitter must not be negative, got {}",
                self.fallback_jitter
            )));
        }
        if self.max_search_attempts == 0 {
            return Err(ClusterError::Config("max_search_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn processing_cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.processing_cooldown_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs_f64(self.cleanup_interval_secs)
    }

    pub fn from_ron(contents: &str) -> Result<Self, ClusterError> {
        let config: Self = ron::from_str(contents)
            .map_err(|e| ClusterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a RON file, falling back to defaults when the file is missing
    /// or invalid. Configuration problems never stop the engine from starting.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::from_ron(&contents) {
                Ok(config) => {
                    info!("Loaded cluster config from {}", path.display());
                    config
                }
                Err(e) => {
                    error!("Failed to parse cluster config: {}", e);
                    error!("Using default ClusterConfig");
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to read {}: {}", path.display(), e);
                error!("Using default ClusterConfig");
                Self::default()
            }
        }
    }
}
