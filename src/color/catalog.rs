use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::color::term_map::{TermMap, TermMapInfo};
use crate::error::LoadError;

pub const DEFAULT_COLOR_SPACE: &str = "SRGB";

/// One palette rendering of a term map, authored for a display color space.
#[derive(Debug, Clone, Deserialize)]
pub struct TermMapAsset {
    pub color_space: String,
    pub path: PathBuf,
}

/// A term map as declared in configuration or a manifest file.
#[derive(Debug, Clone, Deserialize)]
pub struct TermMapDescriptor {
    #[serde(flatten)]
    pub info: TermMapInfo,
    pub assets: Vec<TermMapAsset>,
}

/// Picks the asset for `color_space`: an exact match wins, then SRGB, then
/// whichever asset was declared first. Returns whether the match was exact.
pub fn choose_asset<'a>(
    assets: &'a [TermMapAsset],
    color_space: &str,
) -> Option<(&'a TermMapAsset, bool)> {
    if let Some(exact) = assets
        .iter()
        .find(|a| a.color_space.eq_ignore_ascii_case(color_space))
    {
        return Some((exact, true));
    }
    assets
        .iter()
        .find(|a| a.color_space.eq_ignore_ascii_case(DEFAULT_COLOR_SPACE))
        .or_else(|| assets.first())
        .map(|a| (a, false))
}

/// The term maps available to a session, in declaration order.
#[derive(Debug, Default)]
pub struct TermMapCatalog {
    maps: IndexMap<String, Arc<TermMap>>,
    matched_color_space: bool,
}

impl TermMapCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every descriptor. Relative asset paths resolve against `base_dir`.
    pub fn load(
        descriptors: &[TermMapDescriptor],
        color_space: &str,
        base_dir: Option<&Path>,
    ) -> Result<Self, LoadError> {
        let mut catalog = Self::new();
        for descriptor in descriptors {
            let (asset, exact) = choose_asset(&descriptor.assets, color_space)
                .ok_or_else(|| LoadError::NoAssets(descriptor.info.id.clone()))?;
            let path = match base_dir {
                Some(dir) if asset.path.is_relative() => dir.join(&asset.path),
                _ => asset.path.clone(),
            };
            tracing::info!(
                map = %descriptor.info.id,
                color_space = %asset.color_space,
                path = %path.display(),
                "Loading term map"
            );
            let map = TermMap::open(descriptor.info.clone(), &path)?;
            catalog.matched_color_space |= exact;
            catalog.insert(map);
        }
        Ok(catalog)
    }

    /// Loads a JSON array of descriptors; asset paths are relative to the manifest.
    pub fn from_manifest(path: impl AsRef<Path>, color_space: &str) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let descriptors: Vec<TermMapDescriptor> = serde_json::from_str(&text)?;
        Self::load(&descriptors, color_space, path.parent())
    }

    pub fn insert(&mut self, map: TermMap) -> Arc<TermMap> {
        let map = Arc::new(map);
        self.maps.insert(map.id().to_string(), map.clone());
        map
    }

    pub fn get(&self, id: &str) -> Result<Arc<TermMap>, LoadError> {
        self.maps
            .get(id)
            .cloned()
            .ok_or_else(|| LoadError::UnknownTermMap(id.to_string()))
    }

    pub fn first(&self) -> Option<Arc<TermMap>> {
        self.maps.first().map(|(_, map)| map.clone())
    }

    /// Cycles through the catalog: nothing selected gives the first map, the
    /// last map gives none.
    pub fn next_after(&self, current: Option<&str>) -> Option<Arc<TermMap>> {
        match current {
            None => self.first(),
            Some(id) => {
                let next = self.maps.get_index_of(id).map_or(0, |index| index + 1);
                self.maps.get_index(next).map(|(_, map)| map.clone())
            }
        }
    }

    /// True when at least one map had an asset for the preferred color space.
    pub fn matched_color_space(&self) -> bool {
        self.matched_color_space
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TermMap>> {
        self.maps.values()
    }
}
