//! Registry of datasets known to the viewer.
//!
//! The registry is a JSON document shared with the web front end:
//!
//! ```json
//! { "datasets": [ { "name": "wikiart", "website_name": "WikiArt", "zoom_levels": 7 } ] }
//! ```
//!
//! `zoom_levels` is `-1` until a build for the dataset succeeds. Fields this
//! crate does not know about are kept as they are.

use crate::error::{QuadmapError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// `zoom_levels` of a dataset that has never been built.
pub const UNBUILT_ZOOM_LEVELS: i64 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_name: Option<String>,
    #[serde(default = "unbuilt")]
    pub zoom_levels: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collate_fn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_class: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn unbuilt() -> i64 {
    UNBUILT_ZOOM_LEVELS
}

impl DatasetEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            website_name: None,
            zoom_levels: UNBUILT_ZOOM_LEVELS,
            dir_name: None,
            collate_fn: None,
            dataset_class: None,
            extra: Map::new(),
        }
    }

    pub fn with_website_name(mut self, website_name: impl Into<String>) -> Self {
        self.website_name = Some(website_name.into());
        self
    }

    pub fn is_built(&self) -> bool {
        self.zoom_levels >= 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    datasets: Vec<DatasetEntry>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRegistry {
    path: Option<PathBuf>,
    document: RegistryDocument,
}

impl DatasetRegistry {
    /// Empty registry not tied to a file.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            document: RegistryDocument::default(),
        }
    }

    /// Load a registry file. A malformed document is an input error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            QuadmapError::InvalidInput(format!(
                "cannot read dataset registry {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut registry = Self::from_json(&text)?;
        registry.path = Some(path.to_path_buf());
        Ok(registry)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let document = serde_json::from_str(json).map_err(|e| {
            QuadmapError::InvalidInput(format!("malformed dataset registry: {}", e))
        })?;
        Ok(Self {
            path: None,
            document,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.document)?)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the registry back to the file it was loaded from.
    pub fn save(&self) -> Result<()> {
        let path = self.path.as_deref().ok_or_else(|| {
            QuadmapError::InvalidInput("registry was not loaded from a file".to_string())
        })?;
        self.save_to(path)
    }

    /// Write the registry to `path`, replacing it atomically.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        let mut file = File::create(&temp)?;
        file.write_all(self.to_json()?.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, path)?;
        Ok(())
    }

    pub fn datasets(&self) -> &[DatasetEntry] {
        &self.document.datasets
    }

    pub fn get(&self, name: &str) -> Option<&DatasetEntry> {
        self.document.datasets.iter().find(|d| d.name == name)
    }

    /// Entry for `name`, or an input error naming the dataset.
    pub fn require(&self, name: &str) -> Result<&DatasetEntry> {
        self.get(name)
            .ok_or_else(|| QuadmapError::UnknownDataset(name.to_string()))
    }

    /// First registered dataset, used when none is named.
    pub fn first(&self) -> Option<&DatasetEntry> {
        self.document.datasets.first()
    }

    pub fn set_zoom_levels(&mut self, name: &str, zoom_levels: u32) -> Result<()> {
        let entry = self
            .document
            .datasets
            .iter_mut()
            .find(|d| d.name == name)
            .ok_or_else(|| QuadmapError::UnknownDataset(name.to_string()))?;
        entry.zoom_levels = i64::from(zoom_levels);
        Ok(())
    }

    /// Register a dataset or update its descriptive fields.
    ///
    /// An existing entry keeps its `zoom_levels` and unknown fields; a new
    /// one starts unbuilt.
    pub fn upsert(&mut self, entry: DatasetEntry) {
        match self
            .document
            .datasets
            .iter_mut()
            .find(|d| d.name == entry.name)
        {
            Some(existing) => {
                existing.website_name = entry.website_name;
                existing.dir_name = entry.dir_name;
                existing.collate_fn = entry.collate_fn;
                existing.dataset_class = entry.dataset_class;
                existing.extra.extend(entry.extra);
            }
            None => {
                let mut entry = entry;
                entry.zoom_levels = UNBUILT_ZOOM_LEVELS;
                self.document.datasets.push(entry);
            }
        }
    }
}
