use crate::error::Result;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const METADATA_FILE: &str = "metadata.json";
pub const MODEL_FILE: &str = "model.onnx";

/// Lists the model IDs found under `root`: the names of its immediate
/// subdirectories, sorted. A missing root yields an empty list.
pub fn model_ids(root: &Path) -> Result<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut ids = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            std::io::Error::other(format!("failed to read model directory: {}", e))
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            ids.push(name.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

/// Files belonging to one model directory.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    dir: PathBuf,
}

impl ModelFiles {
    pub fn new(root: &Path, model_id: &str) -> Self {
        Self {
            dir: root.join(model_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    pub fn metadata(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn model(&self) -> PathBuf {
        self.dir.join(MODEL_FILE)
    }
}
