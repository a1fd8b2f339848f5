//! Loaded sprite table and the asset-loading collaborator seam.
//!
//! The catalog is what descriptors are validated against during
//! reconciliation. Image decoding is not done here; a loader resolves a
//! manifest into sheets however it likes and reports back through
//! [`crate::SyncClient::on_assets_ready`].

use std::collections::HashMap;

use crate::error::AssetError;
use crate::protocol::{AssetManifest, SpriteAsset, SpriteRef};

// ---------------------------------------------------------------------------
// Sprite sheets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SpriteSheet {
    pub frame_count: u32,
    pub frame_speed: f64,
    pub single_image: bool,
    pub x_offset: f64,
    pub y_offset: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Image URLs backing this sheet, one per frame unless `single_image`.
    pub images: Vec<String>,
}

impl SpriteSheet {
    pub fn from_asset(asset: &SpriteAsset, assets_url: &str) -> Self {
        Self {
            frame_count: asset.frame_count,
            frame_speed: asset.frame_speed,
            single_image: asset.single_image,
            x_offset: asset.x_offset,
            y_offset: asset.y_offset,
            width: asset.width,
            height: asset.height,
            images: frame_urls(assets_url, asset),
        }
    }
}

/// Image URLs for an asset.
///
/// Strip sprites live in one `<path>.png`; per-frame sprites are numbered
/// `<path>__000.png`, `<path>__001.png`, …
pub fn frame_urls(assets_url: &str, asset: &SpriteAsset) -> Vec<String> {
    let base = format!("{}{}", assets_url, asset.image_path);
    if asset.frame_count > 0 && !asset.single_image {
        (0..asset.frame_count)
            .map(|i| format!("{}__{:03}.png", base, i))
            .collect()
    } else {
        vec![format!("{}.png", base)]
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Sprite name → animation → sheet, for everything loaded so far.
#[derive(Debug, Clone, Default)]
pub struct AssetCatalog {
    sprites: HashMap<String, HashMap<String, SpriteSheet>>,
}

impl AssetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every entry of `manifest` without touching any image.
    pub fn from_manifest(manifest: &AssetManifest, assets_url: &str) -> Self {
        let mut catalog = Self::new();
        for (name, anims) in &manifest.sprites {
            for (animation, asset) in anims {
                catalog.insert(name, animation, SpriteSheet::from_asset(asset, assets_url));
            }
        }
        catalog
    }

    pub fn insert(&mut self, name: &str, animation: &str, sheet: SpriteSheet) {
        self.sprites
            .entry(name.to_string())
            .or_default()
            .insert(animation.to_string(), sheet);
    }

    /// Add everything from `other`, replacing sheets with the same key.
    pub fn merge(&mut self, other: AssetCatalog) {
        for (name, anims) in other.sprites {
            self.sprites.entry(name).or_default().extend(anims);
        }
    }

    pub fn get(&self, name: &str, animation: &str) -> Option<&SpriteSheet> {
        self.sprites.get(name)?.get(animation)
    }

    pub fn contains(&self, name: &str, animation: &str) -> bool {
        self.get(name, animation).is_some()
    }

    /// Look up the sheet a descriptor's sprite points at.
    pub fn resolve(&self, sprite: &SpriteRef) -> Result<&SpriteSheet, AssetError> {
        let anims = self
            .sprites
            .get(&sprite.name)
            .ok_or_else(|| AssetError::UnknownSprite {
                name: sprite.name.clone(),
            })?;
        anims
            .get(&sprite.animation)
            .ok_or_else(|| AssetError::UnknownAnimation {
                name: sprite.name.clone(),
                animation: sprite.animation.clone(),
            })
    }

    /// The part of `manifest` not loaded yet.
    pub fn missing(&self, manifest: &AssetManifest) -> AssetManifest {
        let mut out = AssetManifest::default();
        for (name, anims) in &manifest.sprites {
            for (animation, asset) in anims {
                if !self.contains(name, animation) {
                    out.insert(name, animation, asset.clone());
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.sprites.values().map(|a| a.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Loader seam
// ---------------------------------------------------------------------------

/// A load job handed to an [`AssetLoader`].
///
/// `epoch` identifies the connection attempt that asked; completions for an
/// older epoch are discarded by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetRequest {
    pub epoch: u64,
    pub manifest: AssetManifest,
    pub assets_url: String,
}

#[derive(Debug)]
pub enum LoadStatus {
    /// Resolved synchronously.
    Ready(AssetCatalog),
    /// Completion will be reported later via `on_assets_ready`.
    Pending,
}

pub trait AssetLoader {
    fn load(&mut self, request: AssetRequest) -> LoadStatus;
}

/// Resolves manifests immediately into sheets with computed image URLs.
///
/// Used by headless clients that never draw.
#[derive(Debug, Default)]
pub struct ManifestLoader;

impl AssetLoader for ManifestLoader {
    fn load(&mut self, request: AssetRequest) -> LoadStatus {
        LoadStatus::Ready(AssetCatalog::from_manifest(
            &request.manifest,
            &request.assets_url,
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(path: &str, frames: u32, single: bool) -> SpriteAsset {
        SpriteAsset {
            image_path: path.into(),
            frame_count: frames,
            frame_speed: 0.0,
            single_image: single,
            x_offset: 0.0,
            y_offset: 0.0,
            width: None,
            height: None,
        }
    }

    #[test]
    fn per_frame_urls_are_zero_padded() {
        let urls = frame_urls("http://assets", &asset("/ship/idle", 3, false));
        assert_eq!(
            urls,
            vec![
                "http://assets/ship/idle__000.png",
                "http://assets/ship/idle__001.png",
                "http://assets/ship/idle__002.png",
            ]
        );
    }

    #[test]
    fn strip_sprite_has_one_url() {
        let urls = frame_urls("", &asset("/bg", 8, true));
        assert_eq!(urls, vec!["/bg.png"]);
    }

    #[test]
    fn resolve_reports_which_part_is_missing() {
        let mut manifest = AssetManifest::default();
        manifest.insert("ship", "default", asset("/ship", 1, true));
        let catalog = AssetCatalog::from_manifest(&manifest, "");

        assert!(catalog.resolve(&SpriteRef::new("ship", "default")).is_ok());
        assert_eq!(
            catalog.resolve(&SpriteRef::new("ship", "explode")),
            Err(AssetError::UnknownAnimation {
                name: "ship".into(),
                animation: "explode".into()
            })
        );
        assert_eq!(
            catalog.resolve(&SpriteRef::new("rock", "default")),
            Err(AssetError::UnknownSprite { name: "rock".into() })
        );
    }

    #[test]
    fn missing_skips_loaded_sprites() {
        let mut first = AssetManifest::default();
        first.insert("ship", "default", asset("/ship", 1, true));
        let catalog = AssetCatalog::from_manifest(&first, "");

        let mut second = first.clone();
        second.insert("ship", "thrust", asset("/ship-thrust", 4, false));
        second.insert("star", "default", asset("/star", 1, true));

        let missing = catalog.missing(&second);
        assert_eq!(missing.animation_count(), 2);
        assert!(!missing.sprites.get("ship").unwrap().contains_key("default"));
        assert!(catalog.missing(&first).is_empty());
    }

    #[test]
    fn merge_extends_existing_sprites() {
        let mut a = AssetCatalog::new();
        a.insert("ship", "default", SpriteSheet::from_asset(&asset("/s", 1, true), ""));
        let mut b = AssetCatalog::new();
        b.insert("ship", "thrust", SpriteSheet::from_asset(&asset("/t", 1, true), ""));
        a.merge(b);
        assert_eq!(a.len(), 2);
        assert!(a.contains("ship", "thrust"));
    }
}
