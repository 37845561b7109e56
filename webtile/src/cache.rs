//! On-disk tile cache layout and probe.
//!
//! A cache entry is the pair (image file, georeference sidecar). The probe
//! treats anything less than both files as a miss so a partially written
//! entry is never served. Layout under the cache root:
//!
//! ```text
//! <root>/<host>/<layer>/<style>/<format>/<lod>/<lat>_<lon>.<ext>
//! <root>/<host>/<layer>/<style>/<format>/<lod>/<lat>_<lon>.wld
//! ```
//!
//! Host dots become underscores, `,` and `/` are sanitized out of every
//! component, and `-` in the coordinate basename becomes `n` so filenames
//! never carry a minus sign.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::protocol::{BoundingBox, ImageRequest};

/// Extension of the georeference sidecar (ESRI world file).
pub const WORLD_EXTENSION: &str = "wld";

// =============================================================================
// Tile key
// =============================================================================

/// Deterministic cache location for one tile request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileKey {
    host: String,
    layer: String,
    style: String,
    format: String,
    lod: i32,
    lat: i32,
    lon: i32,
}

impl TileKey {
    pub fn from_request(request: &ImageRequest) -> Self {
        Self {
            host: request.host.clone(),
            layer: request.layer.clone(),
            style: request.style.clone(),
            format: request.format.clone(),
            lod: request.lod,
            lat: request.lat,
            lon: request.lon,
        }
    }

    /// Directory for this tile, relative to the cache root.
    pub fn directory(&self) -> PathBuf {
        let host = self.host.replace('.', "_");
        [
            sanitize(&host),
            sanitize(&self.layer),
            sanitize(&self.style),
            sanitize(&self.format),
            self.lod.to_string(),
        ]
        .iter()
        .collect()
    }

    /// Base filename without extension: `<lat>_<lon>` with `-` folded to `n`.
    pub fn basename(&self) -> String {
        format!("{}_{}", self.lat, self.lon).replace('-', "n")
    }

    /// Image extension derived from the format field.
    ///
    /// Empty when the format names none of the known encodings; the image
    /// file then has no extension at all.
    pub fn image_extension(&self) -> &'static str {
        let format = self.format.to_ascii_lowercase();
        let mut ending = "";
        if format.contains("jpeg") || format.contains("jpg") {
            ending = "jpg";
        }
        if format.contains("tif") {
            ending = "tif";
        }
        if format.contains("png") {
            ending = "png";
        }
        if format.contains("gif") {
            ending = "gif";
        }
        ending
    }

    pub fn image_path(&self, root: &Path) -> PathBuf {
        let mut name = self.basename();
        let ext = self.image_extension();
        if !ext.is_empty() {
            name.push('.');
            name.push_str(ext);
        }
        root.join(self.directory()).join(name)
    }

    pub fn world_path(&self, root: &Path) -> PathBuf {
        let name = format!("{}.{}", self.basename(), WORLD_EXTENSION);
        root.join(self.directory()).join(name)
    }
}

// Path components must not smuggle separators or commas into the layout.
fn sanitize(component: &str) -> String {
    component.replace([',', '/'], "_")
}

// =============================================================================
// Tile cache
// =============================================================================

/// Disk-backed tile cache rooted at a single directory.
///
/// The cache does no locking of its own: a given tile key is written by at
/// most one instance (serialized by the request processor loop), and readers
/// rely on the both-files probe rather than partial-file reads.
#[derive(Debug, Clone)]
pub struct TileCache {
    root: PathBuf,
}

impl TileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns true iff both the image and its sidecar exist.
    ///
    /// Side-effect-free and safe to call concurrently.
    pub fn probe(&self, key: &TileKey) -> bool {
        key.image_path(&self.root).is_file() && key.world_path(&self.root).is_file()
    }

    /// Persists a validated tile body and its georeference sidecar.
    ///
    /// Returns the image path. The caller validates the body first, so a
    /// rejected fetch never reaches the disk.
    pub fn write_entry(
        &self,
        key: &TileKey,
        body: &[u8],
        bbox: &BoundingBox,
        image_size: f64,
    ) -> std::io::Result<PathBuf> {
        let directory = self.root.join(key.directory());
        fs::create_dir_all(&directory)?;

        let image_path = key.image_path(&self.root);
        fs::write(&image_path, body)?;

        let mut world = fs::File::create(key.world_path(&self.root))?;
        world.write_all(world_file_contents(bbox, image_size).as_bytes())?;

        Ok(image_path)
    }
}

/// Renders the six-line world file for a tile.
///
/// Lines: x-scale, two zero rotation terms, negative y-scale, then the origin
/// (west longitude, north latitude). Scales span the bounding box over
/// `image_size - 1` pixel steps.
pub fn world_file_contents(bbox: &BoundingBox, image_size: f64) -> String {
    let x_scale = (bbox.east - bbox.west) / (image_size - 1.0);
    let y_scale = (bbox.north - bbox.south) / -(image_size - 1.0);
    format!(
        "{}\n0.0000000\n0.0000000\n{}\n{}\n{}\n",
        x_scale, y_scale, bbox.west, bbox.north
    )
}
