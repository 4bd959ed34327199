//! Scene description loading
//!
//! A scene lists the views (images) of a reconstruction relative to a root
//! directory. Only the fields needed to locate images are read.

use crate::error::{DispatchError, IoResultExt, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// One image of the scene
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    /// View identifier
    pub id: u32,
    /// Image path, relative to the scene root
    pub image_path: PathBuf,
}

/// Scene description file contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneDescription {
    /// Directory that view image paths are relative to
    #[serde(default)]
    pub root_path: PathBuf,
    /// Views, in id order once loaded
    pub views: Vec<View>,
}

/// Feature and descriptor files produced for one view, features first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewArtifacts {
    paths: [PathBuf; 2],
}

impl ViewArtifacts {
    /// Derive artifact paths from the image file stem
    pub fn for_image(outdir: &Path, image: &Path) -> Self {
        let stem = image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            paths: [
                outdir.join(format!("{}.feat", stem)),
                outdir.join(format!("{}.desc", stem)),
            ],
        }
    }

    /// Feature (keypoint) file
    pub fn feat(&self) -> &Path {
        &self.paths[0]
    }

    /// Descriptor file
    pub fn desc(&self) -> &Path {
        &self.paths[1]
    }
}

impl AsRef<[PathBuf]> for ViewArtifacts {
    fn as_ref(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl SceneDescription {
    /// Load and validate a scene description
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_path(path)?;
        let mut scene: Self =
            serde_json::from_str(&text).map_err(|e| DispatchError::scene(path, e.to_string()))?;
        scene.validate().map_err(|message| DispatchError::scene(path, message))?;
        scene.views.sort_by_key(|view| view.id);
        Ok(scene)
    }

    /// Views must have distinct ids and distinct image stems, since the
    /// stem names the output artifacts.
    fn validate(&self) -> std::result::Result<(), String> {
        let mut ids = HashSet::new();
        let mut stems = HashSet::new();

        for view in &self.views {
            if !ids.insert(view.id) {
                return Err(format!("duplicate view id {}", view.id));
            }
            let stem = view
                .image_path
                .file_stem()
                .ok_or_else(|| format!("view {} has no image file name", view.id))?;
            if !stems.insert(stem.to_os_string()) {
                return Err(format!(
                    "view {} reuses image name '{}'",
                    view.id,
                    stem.to_string_lossy()
                ));
            }
        }
        Ok(())
    }

    /// Absolute (root-joined) image path of a view
    pub fn image_path(&self, view: &View) -> PathBuf {
        self.root_path.join(&view.image_path)
    }

    /// Number of views
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Check if the scene has no views
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}
