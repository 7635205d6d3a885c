use std::borrow::Cow;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use image::{imageops, DynamicImage, GrayImage, RgbImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{LoadError, ParameterError};
use crate::runtime::VisionRuntime;

/// Side of one palette tile; one tile holds every (G, B) pair for a single R.
pub const TILE_SIZE: u32 = 256;
/// Tiles per palette row.
pub const TILES_PER_ROW: u32 = 16;
/// Side of the square palette asset.
pub const PALETTE_SIZE: u32 = TILE_SIZE * TILES_PER_ROW;
/// One entry per 24-bit RGB value.
pub const TABLE_LEN: usize = 1 << 24;
pub const DEFAULT_BLUR_RADIUS: u32 = 9;
/// Term ids are stored as single bytes.
pub const MAX_TERMS: usize = 1 << 8;

/// Checks a pre-lookup Gaussian kernel size: 0 disables it, otherwise odd.
pub fn validate_blur_radius(radius: i32) -> Result<u32, ParameterError> {
    if radius < 0 || (radius != 0 && radius % 2 == 0) {
        return Err(ParameterError::BlurRadius(radius));
    }
    Ok(radius as u32)
}

/// Descriptive metadata of a term map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermMapInfo {
    pub name: String,
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reference: String,
    pub terms: Vec<String>,
}

/// A precomputed RGB -> color term lookup.
///
/// The table is immutable once built and may be read from any thread without
/// synchronisation. Only the query-time blur radius can change afterwards.
pub struct TermMap {
    info: TermMapInfo,
    table: Box<[u8]>,
    blur_radius: AtomicU32,
}

#[inline]
fn rgb_key(r: u8, g: u8, b: u8) -> usize {
    ((r as usize) << 16) | ((g as usize) << 8) | b as usize
}

impl TermMap {
    /// Loads a palette asset from disk.
    pub fn open(info: TermMapInfo, path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let palette = image::load_from_memory(&bytes)?;
        tracing::debug!(map = %info.id, path = %path.display(), "Decoded term map asset");
        Self::from_image(info, &palette)
    }

    /// Builds the map from an already decoded palette, reduced to one gray channel.
    pub fn from_image(info: TermMapInfo, palette: &DynamicImage) -> Result<Self, LoadError> {
        let gray = match palette {
            DynamicImage::ImageLuma8(gray) => Cow::Borrowed(gray),
            other => Cow::Owned(other.to_luma8()),
        };
        Self::from_palette(info, &gray)
    }

    /// Unpacks a 16x16 grid of 256x256 tiles into the flat lookup table.
    ///
    /// Tile `i` (row-major over the grid) fills table entries
    /// `[i * 65536, (i + 1) * 65536)` with its pixels read row-major, so the
    /// tile index is R, the pixel row is G and the pixel column is B.
    pub fn from_palette(info: TermMapInfo, palette: &GrayImage) -> Result<Self, LoadError> {
        if palette.dimensions() != (PALETTE_SIZE, PALETTE_SIZE) {
            return Err(LoadError::Dimensions {
                expected: (PALETTE_SIZE, PALETTE_SIZE),
                actual: palette.dimensions(),
            });
        }

        let tile = TILE_SIZE as usize;
        let stride = PALETTE_SIZE as usize;
        let raw = palette.as_raw();
        let mut table = vec![0u8; TABLE_LEN];
        for (i, chunk) in table.chunks_exact_mut(tile * tile).enumerate() {
            let x0 = (i % TILES_PER_ROW as usize) * tile;
            let y0 = (i / TILES_PER_ROW as usize) * tile;
            for (y, dst) in chunk.chunks_exact_mut(tile).enumerate() {
                let start = (y0 + y) * stride + x0;
                dst.copy_from_slice(&raw[start..start + tile]);
            }
        }
        Self::from_table(info, table)
    }

    /// Wraps a fully populated table. Every entry must name a declared term.
    pub fn from_table(info: TermMapInfo, table: Vec<u8>) -> Result<Self, LoadError> {
        if info.terms.is_empty() {
            return Err(LoadError::NoTerms(info.id));
        }
        if info.terms.len() > MAX_TERMS {
            return Err(LoadError::TooManyTerms {
                id: info.id,
                count: info.terms.len(),
                max: MAX_TERMS,
            });
        }
        if table.len() != TABLE_LEN {
            return Err(LoadError::TableLength {
                expected: TABLE_LEN,
                actual: table.len(),
            });
        }
        let count = info.terms.len();
        if let Some(&value) = table.iter().find(|&&v| v as usize >= count) {
            return Err(LoadError::TermOutOfRange { value, count });
        }
        tracing::info!(map = %info.id, terms = count, "Term map ready");
        Ok(Self {
            info,
            table: table.into_boxed_slice(),
            blur_radius: AtomicU32::new(DEFAULT_BLUR_RADIUS),
        })
    }

    /// Computes the table from a classification function over RGB.
    pub fn from_fn(
        info: TermMapInfo,
        classify: impl Fn(u8, u8, u8) -> u8,
    ) -> Result<Self, LoadError> {
        let mut table = vec![0u8; TABLE_LEN];
        for (r, chunk) in table.chunks_exact_mut(1 << 16).enumerate() {
            for (gb, entry) in chunk.iter_mut().enumerate() {
                *entry = classify(r as u8, (gb >> 8) as u8, gb as u8);
            }
        }
        Self::from_table(info, table)
    }

    pub fn info(&self) -> &TermMapInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn description(&self) -> &str {
        &self.info.description
    }

    pub fn reference(&self) -> &str {
        &self.info.reference
    }

    pub fn terms(&self) -> &[String] {
        &self.info.terms
    }

    pub fn term_index(&self, term: &str) -> Option<usize> {
        self.info.terms.iter().position(|t| t == term)
    }

    /// Term id of a single color.
    #[inline]
    pub fn classify(&self, r: u8, g: u8, b: u8) -> u8 {
        self.table[rgb_key(r, g, b)]
    }

    pub fn blur_radius(&self) -> u32 {
        self.blur_radius.load(Ordering::Relaxed)
    }

    /// Sets the pre-lookup Gaussian kernel size, see [`validate_blur_radius`].
    pub fn set_blur_radius(&self, radius: i32) -> Result<(), ParameterError> {
        let radius = validate_blur_radius(radius)?;
        self.blur_radius.store(radius, Ordering::Relaxed);
        Ok(())
    }

    fn denoise<'a>(&self, image: &'a RgbImage) -> Cow<'a, RgbImage> {
        match self.blur_radius() {
            0 | 1 => Cow::Borrowed(image),
            k => {
                let sigma = 0.3 * ((k as f32 - 1.0) * 0.5 - 1.0) + 0.8;
                Cow::Owned(imageops::blur(image, sigma))
            }
        }
    }

    fn lookup_rows(
        &self,
        image: &RgbImage,
        runtime: &VisionRuntime,
        value: impl Fn(u8) -> u8 + Sync,
    ) -> GrayImage {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return GrayImage::new(width, height);
        }
        let source = self.denoise(image);
        let mut out = vec![0u8; width as usize * height as usize];
        runtime.install(|| {
            out.par_chunks_mut(width as usize)
                .zip(source.as_raw().par_chunks(width as usize * 3))
                .for_each(|(dst, src)| {
                    for (d, p) in dst.iter_mut().zip(src.chunks_exact(3)) {
                        *d = value(self.classify(p[0], p[1], p[2]));
                    }
                });
        });
        GrayImage::from_raw(width, height, out).unwrap_or_else(|| GrayImage::new(width, height))
    }

    /// Per-pixel term ids of `image`.
    pub fn create_map(&self, image: &RgbImage, runtime: &VisionRuntime) -> GrayImage {
        self.lookup_rows(image, runtime, |term| term)
    }

    /// 255 where the pixel classifies as `term`, 0 elsewhere.
    pub fn query(&self, image: &RgbImage, term: u8, runtime: &VisionRuntime) -> GrayImage {
        self.lookup_rows(image, runtime, |t| if t == term { 255 } else { 0 })
    }
}

impl std::fmt::Debug for TermMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermMap")
            .field("info", &self.info)
            .field("blur_radius", &self.blur_radius())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Luma, Rgb};
    use std::sync::Arc;

    pub(crate) fn info(terms: &[&str]) -> TermMapInfo {
        TermMapInfo {
            name: "Test Map".to_string(),
            id: "test_map".to_string(),
            description: "Test Description".to_string(),
            reference: "Test Reference".to_string(),
            terms: terms.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Red-dominant, green-dominant, blue-dominant.
    pub(crate) fn dominant_channel(r: u8, g: u8, b: u8) -> u8 {
        if r >= g && r >= b {
            0
        } else if g >= b {
            1
        } else {
            2
        }
    }

    pub(crate) fn rgb_map() -> TermMap {
        TermMap::from_fn(info(&["Red", "Green", "Blue"]), dominant_channel).expect("term map")
    }

    fn runtime() -> Arc<VisionRuntime> {
        VisionRuntime::init(2).expect("runtime")
    }

    #[test]
    fn palette_tiles_unpack_by_rgb_key() {
        let palette = GrayImage::from_fn(PALETTE_SIZE, PALETTE_SIZE, |x, y| {
            let r = (y / TILE_SIZE) * TILES_PER_ROW + x / TILE_SIZE;
            let g = y % TILE_SIZE;
            let b = x % TILE_SIZE;
            Luma([dominant_channel(r as u8, g as u8, b as u8)])
        });
        let map = TermMap::from_palette(info(&["Red", "Green", "Blue"]), &palette).expect("map");

        for &(r, g, b) in &[(255, 0, 0), (0, 200, 10), (3, 4, 250), (17, 16, 15), (0, 0, 0)] {
            assert_eq!(map.classify(r, g, b), dominant_channel(r, g, b), "{r},{g},{b}");
        }
        map.set_blur_radius(0).unwrap();
        let image = RgbImage::from_vec(2, 1, vec![250, 10, 10, 10, 10, 250]).unwrap();
        let mask = map.query(&image, 2, &runtime());
        assert_eq!(mask.as_raw(), &vec![0, 255]);
    }

    #[test]
    fn wrong_palette_size_is_a_load_error() {
        let palette = GrayImage::new(256, 256);
        let err = TermMap::from_palette(info(&["Only"]), &palette).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Dimensions {
                expected: (4096, 4096),
                actual: (256, 256)
            }
        ));
    }

    #[test]
    fn undeclared_term_in_asset_is_rejected() {
        let err = TermMap::from_fn(info(&["A", "B"]), |_, _, _| 2).unwrap_err();
        assert!(matches!(err, LoadError::TermOutOfRange { value: 2, count: 2 }));
    }

    #[test]
    fn term_count_is_capped_by_the_byte_table() {
        let names: Vec<String> = (0..=MAX_TERMS).map(|i| format!("T{i}")).collect();
        let terms: Vec<&str> = names.iter().map(String::as_str).collect();

        let err = TermMap::from_table(info(&terms), vec![0; TABLE_LEN]).unwrap_err();
        assert!(matches!(
            err,
            LoadError::TooManyTerms { count: 257, max: 256, .. }
        ));

        let widest = TermMap::from_table(info(&terms[..MAX_TERMS]), vec![0; TABLE_LEN]).unwrap();
        assert_eq!(widest.terms().len(), 256);
    }

    #[test]
    fn map_without_terms_is_rejected() {
        let err = TermMap::from_table(info(&[]), vec![0; TABLE_LEN]).unwrap_err();
        assert!(matches!(err, LoadError::NoTerms(_)));
    }

    #[test]
    fn open_reports_missing_asset() {
        let err = TermMap::open(info(&["A"]), "/nonexistent/palette.png").unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn open_reports_undecodable_asset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();
        let err = TermMap::open(info(&["A"]), &path).unwrap_err();
        assert!(matches!(err, LoadError::Decode(_)));
    }

    #[test]
    fn metadata_is_exposed() {
        let map = rgb_map();
        assert_eq!(map.name(), "Test Map");
        assert_eq!(map.id(), "test_map");
        assert_eq!(map.description(), "Test Description");
        assert_eq!(map.reference(), "Test Reference");
        assert_eq!(map.terms().len(), 3);
        assert_eq!(map.term_index("Blue"), Some(2));
        assert_eq!(map.term_index("Mauve"), None);
    }

    #[test]
    fn query_marks_matching_pixels_only() {
        let map = rgb_map();
        map.set_blur_radius(0).unwrap();
        let image = RgbImage::from_fn(8, 4, |x, _| {
            if x < 4 {
                Rgb([200, 10, 10])
            } else {
                Rgb([10, 200, 10])
            }
        });
        let mask = map.query(&image, 1, &runtime());
        assert_eq!(mask.dimensions(), (8, 4));
        for (x, _, p) in mask.enumerate_pixels() {
            assert_eq!(p[0], if x < 4 { 0 } else { 255 });
        }
        let terms = map.create_map(&image, &runtime());
        assert_eq!(terms.get_pixel(0, 0)[0], 0);
        assert_eq!(terms.get_pixel(7, 3)[0], 1);
    }

    #[test]
    fn blur_radius_validation_is_shared() {
        assert_eq!(validate_blur_radius(0), Ok(0));
        assert_eq!(validate_blur_radius(9), Ok(9));
        assert_eq!(validate_blur_radius(4), Err(ParameterError::BlurRadius(4)));
        assert_eq!(validate_blur_radius(-3), Err(ParameterError::BlurRadius(-3)));
    }

    #[test]
    fn blur_radius_accepts_zero_and_odd_only() {
        let map = rgb_map();
        assert_eq!(map.blur_radius(), DEFAULT_BLUR_RADIUS);
        assert_eq!(map.set_blur_radius(4), Err(ParameterError::BlurRadius(4)));
        assert_eq!(map.set_blur_radius(-3), Err(ParameterError::BlurRadius(-3)));
        assert_eq!(map.blur_radius(), DEFAULT_BLUR_RADIUS);
        map.set_blur_radius(0).unwrap();
        assert_eq!(map.blur_radius(), 0);
        map.set_blur_radius(5).unwrap();
        assert_eq!(map.blur_radius(), 5);
    }

    fn isolated_pixels(mask: &GrayImage) -> usize {
        let (w, h) = mask.dimensions();
        let mut count = 0;
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let v = mask.get_pixel(x, y)[0];
                let neighbours = [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)];
                if neighbours.iter().all(|&(nx, ny)| mask.get_pixel(nx, ny)[0] != v) {
                    count += 1;
                }
            }
        }
        count
    }

    #[test]
    fn blurring_suppresses_isolated_mask_flips() {
        let map = TermMap::from_fn(info(&["Dark", "Light"]), |r, _, _| (r >= 128) as u8).unwrap();
        let noisy = RgbImage::from_fn(64, 64, |x, y| {
            if x % 7 == 3 && y % 7 == 3 {
                Rgb([220, 220, 220])
            } else {
                Rgb([90, 90, 90])
            }
        });
        let runtime = runtime();

        map.set_blur_radius(0).unwrap();
        let sharp = map.query(&noisy, 1, &runtime);
        map.set_blur_radius(9).unwrap();
        let blurred = map.query(&noisy, 1, &runtime);

        assert_eq!(isolated_pixels(&sharp), 81);
        assert!(isolated_pixels(&blurred) <= 2);
    }

    #[test]
    fn empty_image_gives_empty_mask() {
        let map = rgb_map();
        let mask = map.query(&RgbImage::new(0, 0), 0, &runtime());
        assert_eq!(mask.dimensions(), (0, 0));
    }
}
