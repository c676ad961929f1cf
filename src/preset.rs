//! Preset Bank
//!
//! Named graph descriptions that can be loaded into a running engine by name
//! or by position. The bank ships empty; callers fill it from code or JSON.
//!
//! Loading builds the whole graph on the control context and hands it to the
//! [`Controller`]. An unknown name or index is logged and reported, and the
//! running graph and its registry stay as they were.

use crate::engine::{Controller, EngineError};
use crate::graph::SoundGraph;
use crate::patch::{GraphDef, PatchError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Errors from preset lookup and loading
#[derive(Debug, Error)]
pub enum PresetError {
    #[error("preset not found: {0}")]
    NotFound(String),

    #[error("preset index {index} out of range ({len} presets)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("failed to build preset: {0}")]
    Build(#[from] PatchError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("preset JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Preset metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PresetInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// A named, buildable graph description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub info: PresetInfo,
    pub def: GraphDef,
}

impl Preset {
    pub fn new(info: PresetInfo, def: GraphDef) -> Self {
        Self { info, def }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Build the preset into a ready-to-run graph
    pub fn build(&self, sample_rate: f64) -> Result<SoundGraph, PresetError> {
        Ok(self.def.build(sample_rate)?)
    }
}

/// Ordered collection of presets
#[derive(Debug, Clone, Default)]
pub struct PresetBank {
    presets: Vec<Preset>,
}

impl PresetBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON array of presets
    pub fn from_json(json: &str) -> Result<Self, PresetError> {
        Ok(Self {
            presets: serde_json::from_str(json)?,
        })
    }

    pub fn to_json(&self) -> Result<String, PresetError> {
        Ok(serde_json::to_string_pretty(&self.presets)?)
    }

    /// Append a preset. Name lookups return the first match.
    pub fn register(&mut self, preset: Preset) {
        self.presets.push(preset);
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.presets.iter().map(Preset::name).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.info.name == name)
    }

    pub fn get_index(&self, index: usize) -> Option<&Preset> {
        self.presets.get(index)
    }

    /// Presets carrying any of the given tags
    pub fn search_tags(&self, tags: &[&str]) -> Vec<&PresetInfo> {
        self.presets
            .iter()
            .map(|p| &p.info)
            .filter(|info| info.tags.iter().any(|t| tags.contains(&t.as_str())))
            .collect()
    }

    /// Build and install the named preset
    pub fn load_by_name(&self, name: &str, controller: &mut Controller) -> Result<(), PresetError> {
        let Some(preset) = self.get(name) else {
            warn!(preset = name, "unknown preset name");
            return Err(PresetError::NotFound(name.to_string()));
        };
        Self::load(preset, controller)
    }

    /// Build and install the preset at `index`
    pub fn load_by_index(&self, index: usize, controller: &mut Controller) -> Result<(), PresetError> {
        let Some(preset) = self.get_index(index) else {
            warn!(index, len = self.len(), "preset index out of range");
            return Err(PresetError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        };
        Self::load(preset, controller)
    }

    fn load(preset: &Preset, controller: &mut Controller) -> Result<(), PresetError> {
        let graph = preset.build(controller.sample_rate()).map_err(|e| {
            warn!(preset = preset.name(), error = %e, "preset failed to build");
            e
        })?;
        controller.install(graph)?;
        info!(
            preset = preset.name(),
            description = %preset.info.description,
            params = controller.registry().len(),
            "preset loaded"
        );
        Ok(())
    }
}
