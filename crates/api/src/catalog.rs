//! Track catalog
//!
//! Read-only mapping from track id to download location. Built once at
//! startup and shared through `AppState`.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read track catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("Track catalog is not a JSON object of id -> url: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Track catalog key is not an integer track id: {0:?}")]
    InvalidTrackId(String),
}

#[derive(Debug, Clone)]
pub struct TrackCatalog {
    downloads: HashMap<i32, String>,
}

impl TrackCatalog {
    /// Catalog shipped with the storefront demo tracks
    pub fn builtin() -> Self {
        Self::from_entries((1..=6).map(|n| {
            (
                n,
                format!("https://www.soundhelix.com/examples/mp3/SoundHelix-Song-{}.mp3", n),
            )
        }))
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (i32, String)>,
    {
        Self {
            downloads: entries.into_iter().collect(),
        }
    }

    /// Parse `{"1": "https://...", "2": "https://..."}`
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let raw: HashMap<String, String> = serde_json::from_str(json)?;
        let downloads = raw
            .into_iter()
            .map(|(key, url)| {
                key.trim()
                    .parse::<i32>()
                    .map(|id| (id, url))
                    .map_err(|_| CatalogError::InvalidTrackId(key))
            })
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(Self { downloads })
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let catalog = Self::from_json_str(&std::fs::read_to_string(path)?)?;
        tracing::info!(path = %path.display(), tracks = catalog.len(), "Track catalog loaded");
        Ok(catalog)
    }

    pub fn download_url(&self, track_id: i32) -> Option<&str> {
        self.downloads.get(&track_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.downloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty()
    }
}
