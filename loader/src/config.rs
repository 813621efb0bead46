use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::LoadError;

pub const DEFAULT_PALETTE: &str = "dflt.cmp";
pub const UI_PALETTE: &str = "uicolormap.cmp";

/// Where the loader looks for assets. Keys missing from a config file take their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Searched first for everything except levels.
    pub resource_archives: Vec<PathBuf>,
    /// Searched first for levels.
    pub episode_archives: Vec<PathBuf>,
    /// Palette for models and for bitmaps without one of their own.
    pub default_palette: String,
    /// Palette for font atlases without one of their own.
    pub ui_palette: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            resource_archives: vec![
                Path::new("Resource").join("Res2.gob"),
                Path::new("Resource").join("Res1hi.gob"),
            ],
            episode_archives: vec![
                Path::new("Episode").join("JK1.GOB"),
                Path::new("Episode").join("JK1CTF.GOB"),
                Path::new("Episode").join("JK1MP.GOB"),
            ],
            default_palette: DEFAULT_PALETTE.to_string(),
            ui_palette: UI_PALETTE.to_string(),
        }
    }
}

impl LoaderConfig {
    /// The default archive layout under a game install directory.
    pub fn for_game_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self::default().relative_to(dir)
    }

    /// Resolves relative archive paths against `dir`.
    pub fn relative_to<P: AsRef<Path>>(mut self, dir: P) -> Self {
        let dir = dir.as_ref();
        for path in self.resource_archives.iter_mut().chain(self.episode_archives.iter_mut()) {
            if path.is_relative() {
                *path = dir.join(&*path);
            }
        }
        self
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| LoadError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| LoadError::ConfigFormat {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn archives(&self) -> impl Iterator<Item = &PathBuf> {
        self.resource_archives.iter().chain(&self.episode_archives)
    }
}
