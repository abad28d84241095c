//! Configuration for tiling, clustering, memory limits and storage access.
//!
//! Every section has serde defaults, so an empty JSON object is a valid
//! configuration:
//!
//! ```rust
//! use quadmap::Config;
//!
//! let config = Config::from_json(r#"{ "memory": { "limit_for_keep": 1000 } }"#).unwrap();
//! assert_eq!(config.memory.limit_for_keep, 1000);
//! assert_eq!(config.clustering.number_of_clusters, 30);
//! ```
use serde::de::Error;
use serde::{Deserialize, Serialize};

use quadmap_types::MAX_ZOOM;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub tiling: TilingConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub serving: ServingConfig,
}

/// Grid search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TilingConfig {
    /// Maximum number of points in one cell of the finest grid
    #[serde(default = "TilingConfig::default_max_points_per_tile")]
    pub max_points_per_tile: usize,

    /// Deepest zoom level the grid search may reach
    #[serde(default = "TilingConfig::default_max_zoom_limit")]
    pub max_zoom_limit: u32,

    /// Shuffle the points with this seed before bucketing them
    #[serde(default)]
    pub shuffle_seed: Option<u64>,
}

impl TilingConfig {
    const fn default_max_points_per_tile() -> usize {
        30
    }

    const fn default_max_zoom_limit() -> u32 {
        24
    }
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            max_points_per_tile: Self::default_max_points_per_tile(),
            max_zoom_limit: Self::default_max_zoom_limit(),
            shuffle_seed: None,
        }
    }
}

/// Representative selection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusteringConfig {
    /// Tiles with at most this many points keep every point
    #[serde(default = "ClusteringConfig::default_max_images_per_tile")]
    pub max_images_per_tile: usize,

    /// Representatives per clustered tile (k)
    #[serde(default = "ClusteringConfig::default_number_of_clusters")]
    pub number_of_clusters: usize,

    #[serde(default = "ClusteringConfig::default_max_iter")]
    pub max_iter: usize,

    #[serde(default = "ClusteringConfig::default_n_init")]
    pub n_init: usize,

    #[serde(default)]
    pub seed: u64,
}

impl ClusteringConfig {
    const fn default_max_images_per_tile() -> usize {
        30
    }

    const fn default_number_of_clusters() -> usize {
        30
    }

    const fn default_max_iter() -> usize {
        1000
    }

    const fn default_n_init() -> usize {
        1
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            max_images_per_tile: Self::default_max_images_per_tile(),
            number_of_clusters: Self::default_number_of_clusters(),
            max_iter: Self::default_max_iter(),
            n_init: Self::default_n_init(),
            seed: 0,
        }
    }
}

/// Resident tile limits for the zoom level builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Resident tile count that triggers a flush
    #[serde(default = "MemoryConfig::default_limit_for_total")]
    pub limit_for_total: usize,

    /// Resident tile count kept after a flush
    #[serde(default = "MemoryConfig::default_limit_for_keep")]
    pub limit_for_keep: usize,

    /// Tiles requested from storage on a parent miss
    #[serde(default = "MemoryConfig::default_limit_for_fetch")]
    pub limit_for_fetch: usize,
}

impl MemoryConfig {
    const fn default_limit_for_total() -> usize {
        8_000_000
    }

    const fn default_limit_for_keep() -> usize {
        4_000_000
    }

    const fn default_limit_for_fetch() -> usize {
        200_000
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            limit_for_total: Self::default_limit_for_total(),
            limit_for_keep: Self::default_limit_for_keep(),
            limit_for_fetch: Self::default_limit_for_fetch(),
        }
    }
}

/// Request sizing against the storage backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Records per insert request
    #[serde(default = "StorageConfig::default_insert_size")]
    pub insert_size: usize,

    /// Keys per query request
    #[serde(default = "StorageConfig::default_search_limit")]
    pub search_limit: usize,
}

impl StorageConfig {
    const fn default_insert_size() -> usize {
        500
    }

    const fn default_search_limit() -> usize {
        16_384
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            insert_size: Self::default_insert_size(),
            search_limit: Self::default_search_limit(),
        }
    }
}

/// Read-path settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServingConfig {
    /// Global tile indexes below this are returned for the initial paint
    #[serde(default = "ServingConfig::default_first_tiles_limit")]
    pub first_tiles_limit: u64,

    /// Accesses to other datasets before a loaded dataset is released
    #[serde(default = "ServingConfig::default_lease_counter_max")]
    pub lease_counter_max: u32,
}

impl ServingConfig {
    const fn default_first_tiles_limit() -> u64 {
        1365
    }

    const fn default_lease_counter_max() -> u32 {
        10
    }
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            first_tiles_limit: Self::default_first_tiles_limit(),
            lease_counter_max: Self::default_lease_counter_max(),
        }
    }
}

impl Config {
    pub fn with_max_points_per_tile(mut self, max_points: usize) -> Self {
        assert!(max_points > 0, "Max points per tile must be greater than zero");
        self.tiling.max_points_per_tile = max_points;
        self
    }

    pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.tiling.shuffle_seed = Some(seed);
        self
    }

    pub fn with_clusters(mut self, number_of_clusters: usize, max_images_per_tile: usize) -> Self {
        self.clustering.number_of_clusters = number_of_clusters;
        self.clustering.max_images_per_tile = max_images_per_tile;
        self
    }

    pub fn with_memory_limits(mut self, total: usize, keep: usize, fetch: usize) -> Self {
        self.memory = MemoryConfig {
            limit_for_total: total,
            limit_for_keep: keep,
            limit_for_fetch: fetch,
        };
        self
    }

    pub fn with_storage_limits(mut self, insert_size: usize, search_limit: usize) -> Self {
        self.storage = StorageConfig {
            insert_size,
            search_limit,
        };
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.tiling.max_points_per_tile == 0 {
            return Err("Max points per tile must be greater than zero".to_string());
        }
        if self.tiling.max_zoom_limit > MAX_ZOOM {
            return Err(format!("Max zoom limit must be at most {}", MAX_ZOOM));
        }

        let clustering = &self.clustering;
        if clustering.number_of_clusters == 0 {
            return Err("Number of clusters must be greater than zero".to_string());
        }
        if clustering.number_of_clusters > clustering.max_images_per_tile {
            return Err(
                "Number of clusters must not exceed max images per tile".to_string(),
            );
        }
        if clustering.max_iter == 0 || clustering.n_init == 0 {
            return Err("K-means iterations and restarts must be greater than zero".to_string());
        }

        let memory = &self.memory;
        if memory.limit_for_total == 0 || memory.limit_for_keep == 0 || memory.limit_for_fetch == 0
        {
            return Err("Memory limits must be greater than zero".to_string());
        }
        if memory.limit_for_keep > memory.limit_for_total {
            return Err("Limit for keep must not exceed limit for total".to_string());
        }

        if self.storage.insert_size == 0 || self.storage.search_limit == 0 {
            return Err("Storage request sizes must be greater than zero".to_string());
        }

        if self.serving.lease_counter_max == 0 {
            return Err("Lease counter must be greater than zero".to_string());
        }

        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(Error::custom(e));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
