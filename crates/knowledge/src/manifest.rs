//! Persisted knowledge base manifest.
//!
//! The manifest is the synchronizer's view of what storage held at the end of
//! the last successful pass: one entry per live document id.

use mentor_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// What the manifest remembers about one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestEntry {
    pub content_hash: String,
    pub version: u32,

    #[serde(default)]
    pub chapter: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    pub source_path: String,
}

/// Ordered map of document id to manifest entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeBaseManifest {
    #[serde(default)]
    documents: BTreeMap<String, ManifestEntry>,
}

impl KnowledgeBaseManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a manifest. A missing file is an empty manifest.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            AppError::Knowledge(format!("Failed to read manifest at {:?}: {}", path, e))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            AppError::Knowledge(format!("Failed to parse manifest at {:?}: {}", path, e))
        })
    }

    /// Write the manifest, replacing the previous file atomically.
    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;

        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ManifestEntry> {
        self.documents.get(id)
    }

    pub fn insert(&mut self, id: impl Into<String>, entry: ManifestEntry) {
        self.documents.insert(id.into(), entry);
    }

    pub fn remove(&mut self, id: &str) -> Option<ManifestEntry> {
        self.documents.remove(id)
    }

    /// Document ids in ascending order.
    pub fn ids(&self) -> Vec<String> {
        self.documents.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
