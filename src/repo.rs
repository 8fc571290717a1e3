//! Image repositories: where brick pixel data comes from.
//!
//! A repository maps a [`Brick`] to a 2-D raster and the header cards
//! needed to project into it. File-system layout (directory structure,
//! filename schemes across data releases) stays behind the
//! [`ImageRepo`] trait; the readout core only asks "given a brick,
//! produce an array and a header".

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array2;

use crate::brick::Brick;
use crate::geom::tan::{CardMap, CardValue};

/// Header cards a repository extracts for the projection.
const WCS_CARDS: [&str; 10] = [
    "CTYPE1", "CTYPE2", "CRVAL1", "CRVAL2", "CRPIX1", "CRPIX2", "CD1_1", "CD1_2", "CD2_1", "CD2_2",
];

/// Raster metadata: shape plus the header cards needed to project
/// into the pixels.
#[derive(Debug, Clone)]
pub struct ImageMeta {
    /// (height, width) of the raster, i.e. (NAXIS2, NAXIS1). Index the
    /// pixel array as `[y, x]`.
    pub shape: (usize, usize),
    pub cards: CardMap,
}

impl ImageMeta {
    /// A standard TAN header for a raster centered on `crval`, with a
    /// north-up, east-left diagonal CD matrix of `pixscale` degrees
    /// per pixel.
    pub fn with_tan(shape: (usize, usize), crval: (f64, f64), pixscale: f64) -> ImageMeta {
        let (ny, nx) = shape;
        let mut cards = CardMap::new();
        let mut num = |key: &str, v: f64| {
            cards.insert(key.to_string(), CardValue::Number(v));
        };
        num("CRVAL1", crval.0);
        num("CRVAL2", crval.1);
        // FITS 1-based reference pixel at the raster center.
        num("CRPIX1", nx as f64 / 2.0 + 0.5);
        num("CRPIX2", ny as f64 / 2.0 + 0.5);
        num("CD1_1", -pixscale);
        num("CD1_2", 0.0);
        num("CD2_1", 0.0);
        num("CD2_2", pixscale);
        cards.insert("CTYPE1".to_string(), CardValue::Text("RA---TAN".to_string()));
        cards.insert("CTYPE2".to_string(), CardValue::Text("DEC--TAN".to_string()));
        ImageMeta { shape, cards }
    }
}

/// Errors from resolving or decoding a brick raster.
#[derive(Debug)]
pub enum RepoError {
    /// The raster file for the brick does not exist.
    Missing { path: PathBuf },
    /// The raster file could not be read.
    Io { path: PathBuf, source: io::Error },
    /// The raster file exists but is not a usable image.
    Malformed { path: PathBuf, reason: String },
}

impl fmt::Display for RepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoError::Missing { path } => write!(f, "missing raster {}", path.display()),
            RepoError::Io { path, source } => {
                write!(f, "reading {}: {source}", path.display())
            }
            RepoError::Malformed { path, reason } => {
                write!(f, "malformed raster {}: {reason}", path.display())
            }
        }
    }
}

impl std::error::Error for RepoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RepoError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Source of per-brick rasters and their projection headers.
///
/// Implementations memoize opened rasters per instance; callers keep
/// one repository per process or worker, never shared across threads.
pub trait ImageRepo {
    /// Pixel data for `brick`.
    fn image(&mut self, brick: &Brick) -> Result<Arc<Array2<f32>>, RepoError>;

    /// Header metadata for `brick`.
    fn metadata(&mut self, brick: &Brick) -> Result<Arc<ImageMeta>, RepoError>;
}

/// Repository over per-brick FITS files under a root directory.
///
/// `pattern` names files relative to `root`, with `{brickid}`,
/// `{brickname}` and `{pre}` (first three name characters)
/// placeholders, e.g.
/// `coadd/{pre}/{brickname}/image-{brickname}-r.fits`.
pub struct FitsImageRepo {
    root: PathBuf,
    pattern: String,
    images: HashMap<u32, Arc<Array2<f32>>>,
    metas: HashMap<u32, Arc<ImageMeta>>,
}

impl FitsImageRepo {
    pub fn new(root: impl Into<PathBuf>, pattern: impl Into<String>) -> FitsImageRepo {
        FitsImageRepo {
            root: root.into(),
            pattern: pattern.into(),
            images: HashMap::new(),
            metas: HashMap::new(),
        }
    }

    /// The path of the raster file backing `brick`.
    pub fn filename(&self, brick: &Brick) -> PathBuf {
        let pre: String = brick.name.chars().take(3).collect();
        let rel = self
            .pattern
            .replace("{brickid}", &brick.id.to_string())
            .replace("{brickname}", &brick.name)
            .replace("{pre}", &pre);
        self.root.join(rel)
    }

    /// Warm the cache for a list of bricks.
    pub fn preload(&mut self, bricks: &[Brick]) -> Result<(), RepoError> {
        for brick in bricks {
            self.image(brick)?;
        }
        Ok(())
    }

    fn load(&self, brick: &Brick) -> Result<(Array2<f32>, ImageMeta), RepoError> {
        let path = self.filename(brick);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RepoError::Missing { path });
            }
            Err(e) => return Err(RepoError::Io { path, source: e }),
        };
        read_fits_image(BufReader::new(file), path)
    }
}

impl ImageRepo for FitsImageRepo {
    fn image(&mut self, brick: &Brick) -> Result<Arc<Array2<f32>>, RepoError> {
        if let Some(img) = self.images.get(&brick.id) {
            return Ok(img.clone());
        }
        let (img, meta) = self.load(brick)?;
        let img = Arc::new(img);
        self.images.insert(brick.id, img.clone());
        self.metas.entry(brick.id).or_insert_with(|| Arc::new(meta));
        Ok(img)
    }

    fn metadata(&mut self, brick: &Brick) -> Result<Arc<ImageMeta>, RepoError> {
        if let Some(meta) = self.metas.get(&brick.id) {
            return Ok(meta.clone());
        }
        let (img, meta) = self.load(brick)?;
        let meta = Arc::new(meta);
        self.metas.insert(brick.id, meta.clone());
        self.images
            .entry(brick.id)
            .or_insert_with(|| Arc::new(img));
        Ok(meta)
    }
}

/// Decode the first image HDU of a FITS stream into `(height, width)`
/// row-major f32 pixels plus the projection cards.
fn read_fits_image(
    reader: BufReader<File>,
    path: PathBuf,
) -> Result<(Array2<f32>, ImageMeta), RepoError> {
    use fitsrs::Fits;
    use fitsrs::card::Value;
    use fitsrs::hdu::HDU;
    use fitsrs::hdu::data::image::Pixels;

    let malformed = |reason: String| RepoError::Malformed {
        path: path.clone(),
        reason,
    };

    let mut hdu_list = Fits::from_reader(reader);

    // Find the first image HDU with actual data (NAXIS >= 2); the
    // primary HDU may be empty with the image in an extension.
    let hdu = loop {
        match hdu_list.next() {
            Some(Ok(HDU::Primary(hdu))) | Some(Ok(HDU::XImage(hdu))) => {
                if hdu.get_header().get_xtension().get_naxis() >= 2 {
                    break hdu;
                }
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(malformed(e.to_string())),
            None => return Err(malformed("no image HDU with data".to_string())),
        }
    };

    let header = hdu.get_header();
    let nx = *header.get_xtension().get_naxisn(1).unwrap() as usize;
    let ny = *header.get_xtension().get_naxisn(2).unwrap() as usize;

    let number = |key: &str| -> Option<f64> {
        match header.get(key) {
            Some(Value::Float { value, .. }) => Some(*value),
            Some(Value::Integer { value, .. }) => Some(*value as f64),
            _ => None,
        }
    };
    let bzero = number("BZERO").unwrap_or(0.0);
    let bscale = number("BSCALE").unwrap_or(1.0);

    let mut cards = CardMap::new();
    for key in WCS_CARDS {
        match header.get(key) {
            Some(Value::Float { value, .. }) => {
                cards.insert(key.to_string(), CardValue::Number(*value));
            }
            Some(Value::Integer { value, .. }) => {
                cards.insert(key.to_string(), CardValue::Number(*value as f64));
            }
            Some(Value::String { value, .. }) => {
                cards.insert(key.to_string(), CardValue::Text(value.trim().to_string()));
            }
            _ => {}
        }
    }

    let image_data = hdu_list.get_data(&hdu);
    let pixels = image_data.pixels();
    let raw: Vec<f32> = match pixels {
        Pixels::U8(it) => it.map(|v| (v as f64 * bscale + bzero) as f32).collect(),
        Pixels::I16(it) => it.map(|v| (v as f64 * bscale + bzero) as f32).collect(),
        Pixels::I32(it) => it.map(|v| (v as f64 * bscale + bzero) as f32).collect(),
        Pixels::I64(it) => it.map(|v| (v as f64 * bscale + bzero) as f32).collect(),
        Pixels::F32(it) => it.map(|v| (v as f64 * bscale + bzero) as f32).collect(),
        Pixels::F64(it) => it.map(|v| (v * bscale + bzero) as f32).collect(),
    };

    if raw.len() != nx * ny {
        return Err(malformed(format!(
            "pixel count mismatch: expected {} ({nx}x{ny}), got {}",
            nx * ny,
            raw.len()
        )));
    }

    // FITS is row-major with NAXIS1 (x) varying fastest.
    let img = Array2::from_shape_vec((ny, nx), raw)
        .map_err(|e| malformed(e.to_string()))?;
    Ok((img, ImageMeta { shape: (ny, nx), cards }))
}

/// In-memory repository for synthetic data and tests.
#[derive(Default)]
pub struct MemoryRepo {
    images: HashMap<u32, Arc<Array2<f32>>>,
    metas: HashMap<u32, Arc<ImageMeta>>,
}

impl MemoryRepo {
    pub fn new() -> MemoryRepo {
        MemoryRepo::default()
    }

    /// Register the raster and metadata for a brick id.
    pub fn insert(&mut self, brick_id: u32, image: Array2<f32>, meta: ImageMeta) {
        self.images.insert(brick_id, Arc::new(image));
        self.metas.insert(brick_id, Arc::new(meta));
    }
}

impl ImageRepo for MemoryRepo {
    fn image(&mut self, brick: &Brick) -> Result<Arc<Array2<f32>>, RepoError> {
        self.images
            .get(&brick.id)
            .cloned()
            .ok_or_else(|| RepoError::Missing {
                path: PathBuf::from(format!("memory:{}", brick.name)),
            })
    }

    fn metadata(&mut self, brick: &Brick) -> Result<Arc<ImageMeta>, RepoError> {
        self.metas
            .get(&brick.id)
            .cloned()
            .ok_or_else(|| RepoError::Missing {
                path: PathBuf::from(format!("memory:{}", brick.name)),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::tan::TanWcs;

    fn brick() -> Brick {
        Brick::new(
            0,
            1,
            "1822p325".to_string(),
            182.25,
            32.5,
            182.0,
            182.5,
            32.25,
            32.75,
            490,
            614,
        )
    }

    #[test]
    fn filename_substitution() {
        let repo = FitsImageRepo::new(
            "/data",
            "coadd/{pre}/{brickname}/image-{brickname}-{brickid}.fits",
        );
        assert_eq!(
            repo.filename(&brick()),
            PathBuf::from("/data/coadd/182/1822p325/image-1822p325-1.fits")
        );
    }

    #[test]
    fn missing_file_reported() {
        let mut repo = FitsImageRepo::new("/nonexistent-tessera-root", "image-{brickid}.fits");
        match repo.image(&brick()) {
            Err(RepoError::Missing { path }) => {
                assert!(path.ends_with("image-1.fits"));
            }
            other => panic!("expected Missing, got {other:?}"),
        }
    }

    #[test]
    fn memory_repo_round_trip() {
        let mut repo = MemoryRepo::new();
        let meta = ImageMeta::with_tan((4, 6), (182.25, 32.5), 0.01);
        let img = Array2::from_shape_fn((4, 6), |(y, x)| (y * 6 + x) as f32);
        repo.insert(1, img, meta);

        let b = brick();
        let img = repo.image(&b).unwrap();
        assert_eq!(img.dim(), (4, 6));
        assert_eq!(img[[2, 3]], 15.0);
        assert_eq!(repo.metadata(&b).unwrap().shape, (4, 6));

        // A brick with no registered raster is missing.
        let other = Brick::new(
            1, 2, "x".to_string(), 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0, 0,
        );
        assert!(matches!(
            repo.image(&other),
            Err(RepoError::Missing { .. })
        ));
    }

    #[test]
    fn with_tan_header_builds_projection() {
        let meta = ImageMeta::with_tan((100, 100), (182.25, 32.5), 0.01);
        let wcs = TanWcs::from_cards(&meta.cards).unwrap();
        assert_eq!(wcs.crval, [182.25, 32.5]);
        // 0-based center of a 100-pixel axis.
        assert_eq!(wcs.crpix, [49.5, 49.5]);

        let (ra, dec) = wcs.pixel_to_sky(49.5, 49.5);
        assert!((ra - 182.25).abs() < 1e-7);
        assert!((dec - 32.5).abs() < 1e-7);
    }
}
