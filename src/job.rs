//! The offline build job for one dataset.

use crate::builder::{BuildStats, ZoomLevelBuilder};
use crate::collections::{EmbeddingsCollection, ImageToTileCollection, TileCollection};
use crate::config::Config;
use crate::error::{QuadmapError, Result};
use crate::points::PointStore;
use crate::registry::DatasetRegistry;
use crate::storage::StorageBackend;
use crate::tiling::Tiler;
use std::time::{Duration, Instant};

/// Summary of a finished build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub dataset: String,
    pub points: usize,
    pub max_zoom: u32,
    pub images_indexed: usize,
    pub stats: BuildStats,
    pub elapsed: Duration,
}

/// Build (or rebuild) the tile pyramid of a registered dataset.
///
/// Input problems (unregistered dataset, missing or empty embeddings,
/// invalid points, existing output without `repopulate`) are reported before
/// any output collection is touched. Once the outputs have been created, any
/// failure drops both of them again before the error is returned.
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub dataset: String,
    pub repopulate: bool,
    pub config: Config,
}

impl BuildJob {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            repopulate: false,
            config: Config::default(),
        }
    }

    pub fn repopulate(mut self, repopulate: bool) -> Self {
        self.repopulate = repopulate;
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn run(
        &self,
        backend: &mut dyn StorageBackend,
        registry: &mut DatasetRegistry,
    ) -> Result<BuildReport> {
        let started = Instant::now();
        self.config.validate().map_err(QuadmapError::InvalidConfig)?;
        registry.require(&self.dataset)?;
        self.check_outputs(backend)?;

        let points = EmbeddingsCollection::for_dataset(&self.dataset).load(backend)?;
        let mut store = PointStore::new(points)?;
        if let Some(seed) = self.config.tiling.shuffle_seed {
            store = store.shuffled(seed);
        }
        let grid = Tiler::from_config(&self.config.tiling).tile(&store)?;

        drop_outputs(backend, &self.dataset)?;
        let built = ZoomLevelBuilder::new(&self.dataset, &store, &grid, &mut *backend, &self.config)
            .build()
            .and_then(|output| {
                registry.set_zoom_levels(&self.dataset, output.max_zoom)?;
                if registry.path().is_some() {
                    registry.save()?;
                }
                Ok(output)
            });

        let output = match built {
            Ok(output) => output,
            Err(e) => {
                log::error!("Build of {} failed: {}", self.dataset, e);
                if let Err(teardown) = drop_outputs(backend, &self.dataset) {
                    log::error!(
                        "Could not drop output collections of {}: {}",
                        self.dataset,
                        teardown
                    );
                }
                return Err(e);
            }
        };

        let report = BuildReport {
            dataset: self.dataset.clone(),
            points: store.len(),
            max_zoom: output.max_zoom,
            images_indexed: output.image_to_tile.len(),
            stats: output.stats,
            elapsed: started.elapsed(),
        };
        log::info!(
            "Built {}: {} points, zoom 0..={}, {} tiles in {:?}",
            report.dataset,
            report.points,
            report.max_zoom,
            report.stats.tiles_written,
            report.elapsed
        );
        Ok(report)
    }

    /// Existing non-empty outputs may only be replaced with `repopulate`.
    fn check_outputs(&self, backend: &dyn StorageBackend) -> Result<()> {
        if self.repopulate {
            return Ok(());
        }
        for name in output_names(&self.dataset) {
            if backend.has_collection(&name)? {
                let entities = backend.num_entities(&name)?;
                if entities > 0 {
                    return Err(QuadmapError::CollectionExists { name, entities });
                }
            }
        }
        Ok(())
    }
}

fn output_names(dataset: &str) -> [String; 2] {
    [
        TileCollection::for_dataset(dataset).name().to_string(),
        ImageToTileCollection::for_dataset(dataset).name().to_string(),
    ]
}

/// Drop the tile and image-to-tile collections of `dataset`.
pub fn drop_outputs(backend: &mut dyn StorageBackend, dataset: &str) -> Result<()> {
    for name in output_names(dataset) {
        if backend.has_collection(&name)? {
            log::info!("Dropping collection {}", name);
            backend.drop_collection(&name)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::ImagePoint;
    use crate::registry::DatasetEntry;
    use crate::storage::MemoryBackend;

    fn setup(n: u64) -> (MemoryBackend, DatasetRegistry) {
        let mut backend = MemoryBackend::new();
        let points: Vec<ImagePoint> = (0..n)
            .map(|i| ImagePoint::new(i, format!("{i}.jpg"), (i % 9) as f64, (i / 9) as f64))
            .collect();
        EmbeddingsCollection::for_dataset("ds")
            .insert(&mut backend, &points, 100)
            .unwrap();
        let mut registry = DatasetRegistry::in_memory();
        registry.upsert(DatasetEntry::new("ds"));
        (backend, registry)
    }

    #[test]
    fn test_run_updates_registry() {
        let (mut backend, mut registry) = setup(81);
        let report = BuildJob::new("ds").run(&mut backend, &mut registry).unwrap();
        assert_eq!(report.points, 81);
        assert_eq!(report.images_indexed, 81);
        assert_eq!(
            registry.get("ds").unwrap().zoom_levels,
            i64::from(report.max_zoom)
        );
    }

    #[test]
    fn test_existing_output_needs_repopulate() {
        let (mut backend, mut registry) = setup(40);
        BuildJob::new("ds").run(&mut backend, &mut registry).unwrap();

        let err = BuildJob::new("ds").run(&mut backend, &mut registry).unwrap_err();
        assert!(matches!(err, QuadmapError::CollectionExists { .. }));
        // The refused run left the first build in place.
        assert!(backend.num_entities("ds_image_to_tile").unwrap() > 0);

        BuildJob::new("ds")
            .repopulate(true)
            .run(&mut backend, &mut registry)
            .unwrap();
    }

    #[test]
    fn test_empty_output_is_replaced_without_repopulate() {
        let (mut backend, mut registry) = setup(10);
        backend.create_collection("ds_zoom_levels_clusters").unwrap();
        assert!(BuildJob::new("ds").run(&mut backend, &mut registry).is_ok());
    }

    #[test]
    fn test_unregistered_dataset_creates_nothing() {
        let (mut backend, _) = setup(10);
        let mut registry = DatasetRegistry::in_memory();
        let err = BuildJob::new("ds").run(&mut backend, &mut registry).unwrap_err();
        assert!(matches!(err, QuadmapError::UnknownDataset(_)));
        assert!(!backend.has_collection("ds_zoom_levels_clusters").unwrap());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let (mut backend, mut registry) = setup(10);
        let config = Config::default().with_clusters(50, 30);
        let err = BuildJob::new("ds")
            .config(config)
            .run(&mut backend, &mut registry)
            .unwrap_err();
        assert!(matches!(err, QuadmapError::InvalidConfig(_)));
    }
}
