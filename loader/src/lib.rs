//! Resolves asset names to archive members, decodes them and caches the results.
//!
//! Every name is loaded at most once per [`Loader`], however many threads ask for it
//! at the same time. Assets that cannot be found, or that fail to decode, load as the
//! format's empty value so partially installed games remain usable; the two cases are
//! logged at different levels. Archive I/O failures, including those hit while loading
//! an asset's own references, are returned to the caller and never cached.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    io,
    path::PathBuf,
    sync::Arc,
};

use parking_lot::Mutex;
use thiserror::Error;

use bm::Bitmap;
use cmp::ColorMap;
use common::{BoxError, Decode, DecodeError, Format};
use gob::{Archives, GobError, Item};
use jk3do::{resource_error, Model, ModelResources};
use jkl::{Level, LevelResources};
use key::Keyframe;
use mat::Material;
use pup::Puppet;
use sft::Font;

mod config;

pub use config::{LoaderConfig, DEFAULT_PALETTE, UI_PALETTE};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Archive(#[from] GobError),
    #[error("unable to read config {path:?}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path:?}")]
    ConfigFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Which archive list is searched first.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Search {
    ResourcesFirst,
    EpisodesFirst,
}

/// A manifest entry together with the archive holding it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Listing {
    pub archive: PathBuf,
    pub item: Item,
}

type Slot = Arc<Mutex<Option<Arc<dyn Any + Send + Sync>>>>;

/// Archive search and the decoded asset cache.
///
/// A name's lock is held for the whole of its decode, and models decode their meshes on
/// the rayon global pool. Calling into a `Loader` from rayon tasks can therefore deadlock:
/// a worker waiting on the mesh join may steal a task that loads the name it already
/// holds. Load from ordinary threads.
pub struct Loader {
    config: LoaderConfig,
    archives: Archives,
    cache: Mutex<HashMap<(TypeId, String), Slot>>,
}

impl Loader {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            archives: Archives::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn archives(&self) -> &Archives {
        &self.archives
    }

    fn search_order(&self, search: Search) -> impl Iterator<Item = &PathBuf> {
        let (first, second) = match search {
            Search::ResourcesFirst => {
                (&self.config.resource_archives, &self.config.episode_archives)
            }
            Search::EpisodesFirst => {
                (&self.config.episode_archives, &self.config.resource_archives)
            }
        };
        first.iter().chain(second)
    }

    fn extract_from<'a, I>(&self, archives: I, name: &str) -> Result<Option<Vec<u8>>, LoadError>
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        for archive in archives {
            if let Some(data) = self.archives.extract(archive, name)? {
                log::debug!("found {} in {:?}", name, archive);
                return Ok(Some(data));
            }
        }
        Ok(None)
    }

    /// Raw bytes of the first resource archive member matching `name`.
    pub fn load_resource(&self, name: &str) -> Result<Option<Vec<u8>>, LoadError> {
        self.extract_from(&self.config.resource_archives, name)
    }

    /// Raw bytes of the first episode archive member matching `name`.
    pub fn load_episode(&self, name: &str) -> Result<Option<Vec<u8>>, LoadError> {
        self.extract_from(&self.config.episode_archives, name)
    }

    /// Raw bytes of `name` from any configured archive, resources first.
    pub fn extract(&self, name: &str) -> Result<Option<Vec<u8>>, LoadError> {
        self.extract_from(self.search_order(Search::ResourcesFirst), name)
    }

    /// Manifest entries of every configured archive matching `filter`.
    ///
    /// A filter starting with `.` matches extensions; anything else matches the start of
    /// either the full member name or its file name. The empty filter matches everything.
    pub fn list_manifest(&self, filter: &str) -> Result<Vec<Listing>, LoadError> {
        let filter = filter.to_lowercase();
        let mut listings = Vec::new();
        for archive in self.config.archives() {
            let manifest = self.archives.open_manifest(archive)?;
            listings.extend(
                manifest
                    .items
                    .iter()
                    .filter(|item| matches_filter(&item.name, &filter))
                    .map(|item| Listing {
                        archive: archive.clone(),
                        item: item.clone(),
                    }),
            );
        }
        Ok(listings)
    }

    fn slot<T: 'static>(&self, name: &str) -> Slot {
        let mut cache = self.cache.lock();
        Arc::clone(cache.entry((TypeId::of::<T>(), name.to_lowercase())).or_default())
    }

    fn load<T, F>(&self, name: &str, search: Search, decode: F) -> Result<Arc<T>, LoadError>
    where
        T: Default + Send + Sync + 'static,
        F: FnOnce(&[u8]) -> Result<T, DecodeError>,
    {
        let slot = self.slot::<T>(name);
        // Held until the value is stored, so a second caller waits instead of decoding again.
        let mut slot = slot.lock();
        if let Some(cached) = slot.as_ref() {
            if let Ok(value) = Arc::clone(cached).downcast::<T>() {
                log::trace!("cache hit for {}", name);
                return Ok(value);
            }
        }

        let value = match self.extract_from(self.search_order(search), name)? {
            Some(data) => match decode(&data) {
                Ok(value) => value,
                Err(error) => {
                    let error = nested_archive_failure(error)?;
                    log::error!("failed to decode {}: {}", name, error_chain(&error));
                    T::default()
                }
            },
            None => {
                log::warn!("{} not found", name);
                T::default()
            }
        };

        let value = Arc::new(value);
        *slot = Some(Arc::clone(&value) as Arc<dyn Any + Send + Sync>);
        Ok(value)
    }

    fn palette(&self, format: Format, name: &str) -> Result<Arc<cmp::Palette>, DecodeError> {
        self.load_cmp(name)
            .map(|color_map| Arc::clone(&color_map.palette))
            .map_err(|error| resource_error(format, name)(error.into()))
    }

    pub fn load_cmp(&self, name: &str) -> Result<Arc<ColorMap>, LoadError> {
        self.load(name, Search::ResourcesFirst, |data| ColorMap::decode(data, &()))
    }

    pub fn load_mat(&self, name: &str) -> Result<Arc<Material>, LoadError> {
        self.load(name, Search::ResourcesFirst, |data| Material::decode(data, &()))
    }

    /// Bitmaps without a palette of their own get the default palette.
    pub fn load_bm(&self, name: &str) -> Result<Arc<Bitmap>, LoadError> {
        self.load(name, Search::ResourcesFirst, |data| {
            let mut bitmap = Bitmap::decode(data, &())?;
            if bitmap.palette.is_none() {
                bitmap.palette = Some(self.palette(Format::Bitmap, &self.config.default_palette)?);
            }
            Ok(bitmap)
        })
    }

    /// Font atlases without a palette of their own get the UI palette.
    pub fn load_sft(&self, name: &str) -> Result<Arc<Font>, LoadError> {
        self.load(name, Search::ResourcesFirst, |data| {
            let mut font = Font::decode(data, &())?;
            if font.bitmap.palette.is_none() {
                font.fill_palette(self.palette(Format::Font, &self.config.ui_palette)?);
            }
            Ok(font)
        })
    }

    pub fn load_3do(&self, name: &str) -> Result<Arc<Model>, LoadError> {
        self.load(name, Search::ResourcesFirst, |data| Model::decode(data, self))
    }

    pub fn load_jkl(&self, name: &str) -> Result<Arc<Level>, LoadError> {
        self.load(name, Search::EpisodesFirst, |data| Level::decode(data, self))
    }

    pub fn load_key(&self, name: &str) -> Result<Arc<Keyframe>, LoadError> {
        self.load(name, Search::ResourcesFirst, |data| Keyframe::decode(data, &()))
    }

    pub fn load_pup(&self, name: &str) -> Result<Arc<Puppet>, LoadError> {
        self.load(name, Search::ResourcesFirst, |data| Puppet::decode(data, &()))
    }
}

impl ModelResources for Loader {
    fn material(&self, name: &str) -> Result<Arc<Material>, BoxError> {
        Ok(self.load_mat(name)?)
    }

    fn color_map(&self, name: &str) -> Result<Arc<ColorMap>, BoxError> {
        Ok(self.load_cmp(name)?)
    }

    fn default_color_map(&self) -> Result<Arc<ColorMap>, BoxError> {
        Ok(self.load_cmp(&self.config.default_palette)?)
    }
}

impl LevelResources for Loader {
    fn model(&self, name: &str) -> Result<Arc<Model>, BoxError> {
        Ok(self.load_3do(name)?)
    }
}

/// Pulls the archive failure of a nested load back out of the decode error wrapping it.
///
/// Ok carries a decode failure of the asset itself; Err an archive I/O failure that must
/// reach the caller instead of being cached as an empty asset.
fn nested_archive_failure(error: DecodeError) -> Result<DecodeError, LoadError> {
    match error {
        DecodeError::Resource { format, name, source } => match source.downcast::<LoadError>() {
            Ok(error) => Err(*error),
            Err(source) => Ok(DecodeError::Resource { format, name, source }),
        },
        error => Ok(error),
    }
}

fn matches_filter(name: &str, filter: &str) -> bool {
    let name = name.to_lowercase();
    if filter.starts_with('.') {
        return name.ends_with(filter);
    }
    let file_name = name.rsplit(|c| c == '\\' || c == '/').next().unwrap_or(&name);
    name.starts_with(filter) || file_name.starts_with(filter)
}

/// An error followed by each of its sources.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(error) = source {
        message.push_str(": ");
        message.push_str(&error.to_string());
        source = error.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_by_extension_or_prefix() {
        assert!(matches_filter("mat\\Floor.MAT", ".mat"));
        assert!(!matches_filter("mat\\floor.mat", ".3do"));
        assert!(matches_filter("mat\\floor.mat", "mat\\"));
        assert!(matches_filter("mat\\floor.mat", "floor"));
        assert!(!matches_filter("mat\\floor.mat", "oor"));
        assert!(matches_filter("anything", ""));
    }

    #[test]
    fn error_chain_includes_sources() {
        let error = DecodeError::Resource {
            format: Format::Model,
            name: "floor.mat".to_string(),
            source: "truncated".into(),
        };
        assert_eq!("3DO: unable to load floor.mat: truncated", error_chain(&error));
    }
}
