//! Configuration system for the evaluation engine
//!
//! This module provides a hierarchical configuration system that allows users
//! to configure the worker pool, component caches and project window through
//! presets or custom configurations.

use crate::core::bounds::Extent;
use crate::core::constants::{DEFAULT_MAX_DISTANCE_ZOOM, DEFAULT_ZOOM_TILE_BUDGET};
use crate::core::geo::{tile_range_for_extent, zoom_from_extent, TileRange};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineProfile {
    Balanced,
    Lightweight,
    Throughput,
    Custom(EngineConfig),
}

impl EngineProfile {
    pub fn resolve(&self) -> EngineConfig {
        match self {
            Self::Balanced => EngineConfig {
                workers: WorkerPoolConfig {
                    workers: 4,
                    thread_name: "rasterflow-worker".to_string(),
                },
                cache: CacheConfig {
                    distance_cache_entries: 16,
                    source_cache_entries: 32,
                },
                project: ProjectSettings::default(),
                max_distance_zoom: DEFAULT_MAX_DISTANCE_ZOOM,
            },
            Self::Lightweight => EngineConfig {
                workers: WorkerPoolConfig {
                    workers: 1,
                    thread_name: "rasterflow-worker".to_string(),
                },
                cache: CacheConfig {
                    distance_cache_entries: 2,
                    source_cache_entries: 4,
                },
                project: ProjectSettings::default(),
                max_distance_zoom: 18,
            },
            Self::Throughput => EngineConfig {
                workers: WorkerPoolConfig {
                    workers: 8,
                    thread_name: "rasterflow-worker".to_string(),
                },
                cache: CacheConfig {
                    distance_cache_entries: 64,
                    source_cache_entries: 128,
                },
                project: ProjectSettings::default(),
                max_distance_zoom: DEFAULT_MAX_DISTANCE_ZOOM,
            },
            Self::Custom(config) => config.clone(),
        }
    }
}

impl Default for EngineProfile {
    fn default() -> Self {
        Self::Balanced
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub workers: WorkerPoolConfig,
    pub cache: CacheConfig,
    pub project: ProjectSettings,
    /// Distance transforms above this zoom are coarsened before dispatch
    pub max_distance_zoom: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineProfile::default().resolve()
    }
}

impl EngineConfig {
    pub fn with_project(mut self, project: ProjectSettings) -> Self {
        self.project = project;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers.workers = workers;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of worker threads; each runs one job at a time
    pub workers: usize,
    pub thread_name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        EngineConfig::default().workers
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub distance_cache_entries: usize,
    pub source_cache_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        EngineConfig::default().cache
    }
}

/// The geographic window every source and broadcast operator renders into
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub extent: Extent,
    pub zoom: u8,
}

impl ProjectSettings {
    pub fn new(extent: Extent, zoom: u8) -> Self {
        Self { extent, zoom }
    }

    /// Derives the zoom from the extent using the default tile budget
    pub fn from_extent(extent: Extent) -> Self {
        Self::new(extent, zoom_from_extent(&extent, DEFAULT_ZOOM_TILE_BUDGET))
    }

    pub fn tile_range(&self) -> TileRange {
        tile_range_for_extent(&self.extent, self.zoom)
    }
}

impl Default for ProjectSettings {
    fn default() -> Self {
        // Brighton and Hove
        Self::new(
            Extent::new(-20_839.008_676_5, 6_579_722.087_031, 12_889.487_811, 6_640_614.986_501),
            20,
        )
    }
}
