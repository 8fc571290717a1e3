//! The covered subset of the brick catalogue.
//!
//! The full catalogue tiles the entire sky; only some bricks have
//! backing data. A `Footprint` records that subset and answers
//! membership queries for coordinates and brick ids. The covered set
//! can be persisted so a data directory is scanned only once.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::brick::Brick;
use crate::index::BrickIndex;

/// Whole-sky area in square degrees.
const FULL_SKY_DEG2: f64 = 41253.0;

const MAGIC: &[u8; 4] = b"TSFP";
const VERSION: u32 = 1;

/// RA/Dec extent of the covered bricks, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FootprintRange {
    pub ramin: f64,
    pub ramax: f64,
    pub decmin: f64,
    pub decmax: f64,
}

/// The set of bricks that actually have backing data.
pub struct Footprint {
    /// Covered internal indices, sorted and deduplicated.
    covered: Vec<usize>,
    range: FootprintRange,
    area: f64,
}

impl Footprint {
    /// Build a footprint from covered internal indices.
    ///
    /// Indices must refer to bricks of `index`; they are sorted and
    /// deduplicated here.
    pub fn new(index: &BrickIndex, mut covered: Vec<usize>) -> Footprint {
        covered.sort_unstable();
        covered.dedup();
        if let Some(&last) = covered.last() {
            assert!(last < index.len(), "covered index {last} out of range");
        }

        let mut range = FootprintRange {
            ramin: 0.0,
            ramax: 0.0,
            decmin: 0.0,
            decmax: 0.0,
        };
        for (n, &i) in covered.iter().enumerate() {
            let b = index.get_brick(i);
            if n == 0 {
                range = FootprintRange {
                    ramin: b.ra1,
                    ramax: b.ra2,
                    decmin: b.dec1,
                    decmax: b.dec2,
                };
            } else {
                range.ramin = range.ramin.min(b.ra1);
                range.ramax = range.ramax.max(b.ra2);
                range.decmin = range.decmin.min(b.dec1);
                range.decmax = range.decmax.max(b.dec2);
            }
        }

        let area = if index.is_empty() {
            0.0
        } else {
            FULL_SKY_DEG2 * covered.len() as f64 / index.len() as f64
        };

        Footprint {
            covered,
            range,
            area,
        }
    }

    /// Build a footprint from BRICKIDs, e.g. a reloaded covered set.
    pub fn from_ids(index: &BrickIndex, ids: &[u32]) -> Result<Footprint, crate::index::IndexError> {
        Ok(Footprint::new(index, index.search_by_id(ids)?))
    }

    /// Number of covered bricks.
    pub fn len(&self) -> usize {
        self.covered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.covered.is_empty()
    }

    /// Covered internal indices, sorted.
    pub fn covered(&self) -> &[usize] {
        &self.covered
    }

    /// Covered outline area in square degrees (whole-sky fraction).
    pub fn area(&self) -> f64 {
        self.area
    }

    /// RA/Dec extent of the covered bricks.
    pub fn range(&self) -> FootprintRange {
        self.range
    }

    /// The covered bricks, in index order.
    pub fn bricks<'a>(&'a self, index: &'a BrickIndex) -> impl Iterator<Item = &'a Brick> + 'a {
        self.covered.iter().map(move |&i| index.get_brick(i))
    }

    /// Whether a queried brick index is covered. `None` (no brick at
    /// all) is never covered.
    pub fn covers(&self, index: Option<usize>) -> bool {
        match index {
            Some(i) => self.covered.binary_search(&i).is_ok(),
            None => false,
        }
    }

    /// Membership per element, for batched query results.
    pub fn covers_all(&self, indices: &[Option<usize>]) -> Vec<bool> {
        indices.iter().map(|&i| self.covers(i)).collect()
    }

    /// Keep only the coordinates inside the footprint, preserving
    /// their order.
    pub fn filter(&self, index: &BrickIndex, coords: &[(f64, f64)]) -> Vec<(f64, f64)> {
        coords
            .iter()
            .zip(index.query(coords))
            .filter(|&(_, bid)| self.covers(bid))
            .map(|(&c, _)| c)
            .collect()
    }

    /// Persist the covered set as BRICKIDs.
    pub fn save_covered(&self, path: &Path) -> io::Result<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        w.write_all(MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        w.write_all(&(self.covered.len() as u64).to_le_bytes())?;
        for &i in &self.covered {
            w.write_all(&(i as u32 + 1).to_le_bytes())?;
        }
        w.flush()
    }

    /// Reload a covered set persisted by [`Footprint::save_covered`].
    pub fn load_covered(path: &Path) -> io::Result<Vec<u32>> {
        let file = File::open(path)?;
        let mut r = BufReader::new(file);

        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid magic bytes",
            ));
        }
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf)?;
        let version = u32::from_le_bytes(buf);
        if version != VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported version: {version}"),
            ));
        }
        let mut buf8 = [0u8; 8];
        r.read_exact(&mut buf8)?;
        let count = u64::from_le_bytes(buf8) as usize;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            r.read_exact(&mut buf)?;
            ids.push(u32::from_le_bytes(buf));
        }
        Ok(ids)
    }

    /// Scan a directory tree for per-brick files, returning the
    /// covered internal indices.
    ///
    /// A file counts if its name ends in a `-<BRICKID>.fits` token and
    /// the id exists in the catalogue; anything else is skipped.
    pub fn scan(root: &Path, index: &BrickIndex) -> io::Result<Vec<usize>> {
        let mut covered = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    stack.push(path);
                } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if let Some(id) = parse_brick_filename(name) {
                        if let Ok(found) = index.search_by_id(&[id]) {
                            covered.push(found[0]);
                        }
                    }
                }
            }
        }
        Ok(covered)
    }
}

impl fmt::Display for Footprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Footprint: {} bricks, area={:.4} deg^2, ra=[{}, {}], dec=[{}, {}]",
            self.covered.len(),
            self.area,
            self.range.ramin,
            self.range.ramax,
            self.range.decmin,
            self.range.decmax
        )
    }
}

/// Extract a BRICKID from a per-brick filename like `tractor-12.fits`.
fn parse_brick_filename(name: &str) -> Option<u32> {
    let stem = name.strip_suffix(".fits")?;
    let (_, id) = stem.rsplit_once('-')?;
    id.parse().ok()
}
