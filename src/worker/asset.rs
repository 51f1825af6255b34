use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;

use crate::foundation::error::RenderFault;
use crate::worker::protocol::ClientKey;

const HEX_LINE_BYTES: usize = 40;

/// An external image decoded to 8-bit RGB.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageAsset {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Packed RGB samples, top row first.
    pub rgb8: Vec<u8>,
}

impl ImageAsset {
    /// Decode an image file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read image '{}'", path.display()))?;
        Self::decode(&bytes)
    }

    /// Decode an in-memory image in any format `image` recognizes.
    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        let rgb = image::load_from_memory(bytes)
            .context("decode image from memory")?
            .to_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(Self {
            width,
            height,
            rgb8: rgb.into_raw(),
        })
    }

    /// PostScript that defines `/InkAssetWidth`, `/InkAssetHeight` and `/InkAssetData` (a hex
    /// string of RGB samples) in `userdict`.
    pub fn prelude(&self) -> Vec<u8> {
        let hex_len = self.rgb8.len() * 2 + self.rgb8.len() / HEX_LINE_BYTES;
        let mut ps = String::with_capacity(hex_len + 96);
        ps.push_str("userdict begin\n");
        let _ = writeln!(ps, "/InkAssetWidth {} def", self.width);
        let _ = writeln!(ps, "/InkAssetHeight {} def", self.height);
        ps.push_str("/InkAssetData <\n");
        for line in self.rgb8.chunks(HEX_LINE_BYTES) {
            for b in line {
                let _ = write!(ps, "{b:02x}");
            }
            ps.push('\n');
        }
        ps.push_str("> def\nend\n");
        ps.into_bytes()
    }
}

#[derive(Debug)]
struct CachedAsset {
    key: ClientKey,
    path: PathBuf,
    prelude: Arc<Vec<u8>>,
}

/// The most recently loaded asset, remembered for the client that loaded it.
///
/// Consecutive jobs of one client with the same asset path reuse the prelude; anything else
/// reloads and replaces it.
#[derive(Debug, Default)]
pub struct AssetCache {
    entry: Option<CachedAsset>,
    loads: u64,
}

impl AssetCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prelude for `path` on behalf of `key`, loading it on a miss.
    pub fn prelude_for(
        &mut self,
        key: ClientKey,
        path: &Path,
    ) -> Result<Arc<Vec<u8>>, RenderFault> {
        if let Some(entry) = &self.entry
            && entry.key == key
            && entry.path == path
        {
            tracing::trace!(%key, "asset cache hit");
            return Ok(entry.prelude.clone());
        }

        let asset = ImageAsset::load(path).map_err(|e| RenderFault::AssetIo {
            path: path.display().to_string(),
            detail: format!("{e:#}"),
        })?;
        self.loads += 1;
        tracing::debug!(
            %key,
            path = %path.display(),
            width = asset.width,
            height = asset.height,
            "loaded asset"
        );
        let prelude = Arc::new(asset.prelude());
        self.entry = Some(CachedAsset {
            key,
            path: path.to_path_buf(),
            prelude: prelude.clone(),
        });
        Ok(prelude)
    }

    /// Drop the entry if it belongs to `key`.
    pub fn forget(&mut self, key: ClientKey) {
        if self.entry.as_ref().is_some_and(|e| e.key == key) {
            self.entry = None;
        }
    }

    /// Client owning the cached entry.
    pub fn cached_key(&self) -> Option<ClientKey> {
        self.entry.as_ref().map(|e| e.key)
    }

    /// Number of loads (cache misses) so far.
    pub fn loads(&self) -> u64 {
        self.loads
    }
}

#[cfg(test)]
#[path = "../../tests/unit/worker/asset.rs"]
mod tests;
