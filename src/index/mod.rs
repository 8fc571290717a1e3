//! High level table/list/index of bricks, with methods for locating,
//! reordering and querying them.
//!
//! Bricks are laid out in uniform declination rows; the number of
//! columns varies with the row so that all bricks have approximately
//! the same area. Each brick's (row, col) cell is hashed as
//! `row * (colmax + 1) + col`, and because the catalogue is row-major
//! the hash sequence is strictly increasing, so locating a coordinate
//! is a binary search.

pub mod builder;
pub mod store;

use std::fmt;

use crate::brick::Brick;

/// One row of the brick catalogue table, as loaded from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct BrickTableRow {
    pub id: u32,
    pub name: String,
    pub ra: f64,
    pub dec: f64,
    pub ra1: f64,
    pub ra2: f64,
    pub dec1: f64,
    pub dec2: f64,
    pub row: u32,
    pub col: u32,
}

/// Fatal catalogue-construction errors.
///
/// The index is load-bearing for every later query, so a catalogue
/// that violates its invariants is rejected outright, never partially
/// accepted.
#[derive(Debug)]
pub enum CatalogError {
    /// BRICKID is not `position + 1`; internal indices, hash positions
    /// and BRICKIDs must stay interchangeable.
    BadId { index: usize, id: u32 },
    /// The (row, col) hash sequence is not strictly increasing; the
    /// catalogue must be row-major sorted for binary search to work.
    UnsortedHash { index: usize },
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::BadId { index, id } => {
                write!(f, "brick at position {index} has id {id}, expected {}", index + 1)
            }
            CatalogError::UnsortedHash { index } => {
                write!(f, "brick at position {index} breaks row-major (row, col) order")
            }
        }
    }
}

impl std::error::Error for CatalogError {}

/// A requested brick does not exist.
#[derive(Debug)]
pub enum IndexError {
    NameNotFound(String),
    IdsNotFound(Vec<u32>),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::NameNotFound(name) => write!(f, "no brick named {name}"),
            IndexError::IdsNotFound(ids) => write!(f, "brick ids not found: {ids:?}"),
        }
    }
}

impl std::error::Error for IndexError {}

/// The result of [`BrickIndex::optimize`]: a coordinate batch regrouped
/// so that same-brick points are contiguous.
#[derive(Debug, Clone)]
pub struct Optimized {
    /// The input coordinates, reordered.
    pub coords: Vec<(f64, f64)>,
    /// `coords[k] == original[index[k]]`.
    pub index: Vec<usize>,
    /// `coords[inverse[i]] == original[i]`.
    pub inverse: Vec<usize>,
}

/// Immutable index over the full brick catalogue.
///
/// Built once per process; holds no interior mutability, so it is
/// `Send + Sync` and can be shared read-only across workers.
pub struct BrickIndex {
    bricks: Vec<Brick>,
    /// Brick count per declination row.
    ncols: Vec<u32>,
    rowmax: u32,
    colmax: u32,
    /// `row * (colmax + 1) + col` per brick, strictly increasing.
    hash: Vec<u64>,
    /// Brick positions sorted by name, for name lookup.
    names_sortarg: Vec<u32>,
}

impl BrickIndex {
    /// Build the index from the catalogue table, validating the dense
    /// 1-based id invariant and the row-major hash order.
    pub fn new(table: Vec<BrickTableRow>) -> Result<BrickIndex, CatalogError> {
        for (i, r) in table.iter().enumerate() {
            if r.id as usize != i + 1 {
                return Err(CatalogError::BadId { index: i, id: r.id });
            }
        }

        let rowmax = table.iter().map(|r| r.row).max().unwrap_or(0);
        let colmax = table.iter().map(|r| r.col).max().unwrap_or(0);

        let mut ncols = vec![0u32; rowmax as usize + 1];
        for r in &table {
            ncols[r.row as usize] += 1;
        }

        let mut hash: Vec<u64> = Vec::with_capacity(table.len());
        for (i, r) in table.iter().enumerate() {
            let h = r.row as u64 * (colmax as u64 + 1) + r.col as u64;
            if let Some(&prev) = hash.last() {
                if h <= prev {
                    return Err(CatalogError::UnsortedHash { index: i });
                }
            }
            hash.push(h);
        }

        let bricks: Vec<Brick> = table
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                Brick::new(
                    i, r.id, r.name, r.ra, r.dec, r.ra1, r.ra2, r.dec1, r.dec2, r.row, r.col,
                )
            })
            .collect();

        let mut names_sortarg: Vec<u32> = (0..bricks.len() as u32).collect();
        names_sortarg.sort_by(|&a, &b| bricks[a as usize].name.cmp(&bricks[b as usize].name));

        Ok(BrickIndex {
            bricks,
            ncols,
            rowmax,
            colmax,
            hash,
            names_sortarg,
        })
    }

    pub fn len(&self) -> usize {
        self.bricks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bricks.is_empty()
    }

    /// The brick at an internal index.
    pub fn get_brick(&self, index: usize) -> &Brick {
        &self.bricks[index]
    }

    /// All bricks in catalogue order.
    pub fn bricks(&self) -> &[Brick] {
        &self.bricks
    }

    /// Find the internal index of the brick whose grid cell contains
    /// each coordinate.
    ///
    /// Coordinates are (RA, Dec) in decimal degrees with RA in
    /// `[0, 360)`. A coordinate whose cell has no catalogue entry (a
    /// gap in the grid, RA out of range, or a non-finite value) yields
    /// `None` rather than a neighbouring brick.
    pub fn query(&self, coords: &[(f64, f64)]) -> Vec<Option<usize>> {
        coords
            .iter()
            .map(|&(ra, dec)| self.query_one(ra, dec))
            .collect()
    }

    fn query_one(&self, ra: f64, dec: f64) -> Option<usize> {
        if self.bricks.is_empty() || !ra.is_finite() || !dec.is_finite() {
            return None;
        }
        let rowmax = self.rowmax as f64;
        // Rows are centered at dec = (row/rowmax - 1/2) * 180, so the
        // containing row is round(dec * rowmax / 180 + rowmax / 2).
        let row = (dec * rowmax / 180.0 + rowmax / 2.0 + 0.5).floor() as i64;
        let row = row.clamp(0, self.rowmax as i64) as usize;
        let ncols = self.ncols[row] as f64;
        let col = (ra * ncols / 360.0).floor();
        if !(0.0..ncols).contains(&col) {
            return None;
        }
        let h = row as u64 * (self.colmax as u64 + 1) + col as u64;
        self.hash.binary_search(&h).ok()
    }

    /// Locate internal indices for the given BRICKIDs.
    ///
    /// Fails listing every offending id if any is absent.
    pub fn search_by_id(&self, ids: &[u32]) -> Result<Vec<usize>, IndexError> {
        let mut out = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for &id in ids {
            if id >= 1 && id as usize <= self.bricks.len() {
                out.push(id as usize - 1);
            } else {
                missing.push(id);
            }
        }
        if !missing.is_empty() {
            return Err(IndexError::IdsNotFound(missing));
        }
        Ok(out)
    }

    /// Locate the internal index of the brick with the given name.
    pub fn search_by_name(&self, name: &str) -> Result<usize, IndexError> {
        let arg = &self.names_sortarg;
        match arg.binary_search_by(|&i| self.bricks[i as usize].name.as_str().cmp(name)) {
            Ok(pos) => Ok(arg[pos] as usize),
            Err(_) => Err(IndexError::NameNotFound(name.to_string())),
        }
    }

    /// Reorder a coordinate batch so points in the same brick are
    /// contiguous, grouping future per-brick work.
    ///
    /// This is a pure reordering: values are untouched and the
    /// permutation pair reconstructs the input order exactly. Points
    /// that fall in no catalogued brick group together at the end.
    pub fn optimize(&self, coords: &[(f64, f64)]) -> Optimized {
        let bids = self.query(coords);
        let mut index: Vec<usize> = (0..coords.len()).collect();
        index.sort_by_key(|&i| bids[i].map_or(u64::MAX, |b| b as u64));

        let mut inverse = vec![0usize; coords.len()];
        for (k, &i) in index.iter().enumerate() {
            inverse[i] = k;
        }
        let coords = index.iter().map(|&i| coords[i]).collect();
        Optimized {
            coords,
            index,
            inverse,
        }
    }
}

impl fmt::Debug for BrickIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrickIndex")
            .field("bricks", &self.bricks.len())
            .field("rowmax", &self.rowmax)
            .field("colmax", &self.colmax)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(
        id: u32,
        name: &str,
        center: (f64, f64),
        ra_bounds: (f64, f64),
        dec_bounds: (f64, f64),
        rowcol: (u32, u32),
    ) -> BrickTableRow {
        BrickTableRow {
            id,
            name: name.to_string(),
            ra: center.0,
            dec: center.1,
            ra1: ra_bounds.0,
            ra2: ra_bounds.1,
            dec1: dec_bounds.0,
            dec2: dec_bounds.1,
            row: rowcol.0,
            col: rowcol.1,
        }
    }

    /// Two declination rows covering the full sky: the southern row has
    /// 2 bricks, the northern 3.
    fn five_brick_table() -> Vec<BrickTableRow> {
        vec![
            row(1, "0900m450", (90.0, -45.0), (0.0, 180.0), (-90.0, 0.0), (0, 0)),
            row(2, "2700m450", (270.0, -45.0), (180.0, 360.0), (-90.0, 0.0), (0, 1)),
            row(3, "0600p450", (60.0, 45.0), (0.0, 120.0), (0.0, 90.0), (1, 0)),
            row(4, "1800p450", (180.0, 45.0), (120.0, 240.0), (0.0, 90.0), (1, 1)),
            row(5, "3000p450", (300.0, 45.0), (240.0, 360.0), (0.0, 90.0), (1, 2)),
        ]
    }

    #[test]
    fn five_centers_resolve_row_major() {
        let index = BrickIndex::new(five_brick_table()).unwrap();
        let centers: Vec<(f64, f64)> =
            index.bricks().iter().map(|b| (b.ra, b.dec)).collect();
        let found = index.query(&centers);
        assert_eq!(found, vec![Some(0), Some(1), Some(2), Some(3), Some(4)]);
        for (i, f) in found.iter().enumerate() {
            assert_eq!(index.get_brick(f.unwrap()).id, i as u32 + 1);
        }
    }

    #[test]
    fn grid_gap_yields_none() {
        // Drop the middle northern brick but keep ids dense; its cell
        // becomes a hole in the grid.
        let mut table = five_brick_table();
        table.remove(3);
        table[3].id = 4;
        // With 2 bricks left in row 1, a northern point now maps to
        // col floor(ra * 2 / 360); ra = 350 probes the absent (1, 1).
        let index = BrickIndex::new(table).unwrap();
        assert_eq!(index.query(&[(350.0, 45.0)]), vec![None]);
        // The surviving cells still resolve.
        assert_eq!(index.query(&[(10.0, 45.0)]), vec![Some(2)]);
    }

    #[test]
    fn out_of_range_coordinates_yield_none() {
        let index = BrickIndex::new(five_brick_table()).unwrap();
        assert_eq!(index.query(&[(360.0, 10.0)]), vec![None]);
        assert_eq!(index.query(&[(-5.0, 10.0)]), vec![None]);
        assert_eq!(index.query(&[(f64::NAN, 10.0)]), vec![None]);
        assert_eq!(index.query(&[(10.0, f64::NAN)]), vec![None]);
    }

    #[test]
    fn poles_resolve() {
        let index = BrickIndex::new(five_brick_table()).unwrap();
        assert_eq!(index.query(&[(10.0, -90.0)]), vec![Some(0)]);
        assert_eq!(index.query(&[(10.0, 90.0)]), vec![Some(2)]);
    }

    #[test]
    fn bad_id_rejected() {
        let mut table = five_brick_table();
        table[2].id = 7;
        match BrickIndex::new(table) {
            Err(CatalogError::BadId { index: 2, id: 7 }) => {}
            other => panic!("expected BadId, got {other:?}"),
        }
    }

    #[test]
    fn unsorted_hash_rejected() {
        let mut table = five_brick_table();
        // Swap the (row, col) cells of the first two bricks; ids stay
        // dense but the hash order breaks.
        table[0].col = 1;
        table[1].col = 0;
        match BrickIndex::new(table) {
            Err(CatalogError::UnsortedHash { index: 1 }) => {}
            other => panic!("expected UnsortedHash, got {other:?}"),
        }
    }

    #[test]
    fn empty_catalogue() {
        let index = BrickIndex::new(Vec::new()).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.query(&[(10.0, 10.0)]), vec![None]);
    }

    #[test]
    fn search_by_id_found_and_missing() {
        let index = BrickIndex::new(five_brick_table()).unwrap();
        assert_eq!(index.search_by_id(&[1, 5, 3]).unwrap(), vec![0, 4, 2]);
        match index.search_by_id(&[2, 0, 99]) {
            Err(IndexError::IdsNotFound(ids)) => assert_eq!(ids, vec![0, 99]),
            other => panic!("expected IdsNotFound, got {other:?}"),
        }
    }

    #[test]
    fn search_by_name_found_and_missing() {
        let index = BrickIndex::new(five_brick_table()).unwrap();
        assert_eq!(index.search_by_name("1800p450").unwrap(), 3);
        assert_eq!(index.search_by_name("0900m450").unwrap(), 0);
        match index.search_by_name("nonesuch") {
            Err(IndexError::NameNotFound(name)) => assert_eq!(name, "nonesuch"),
            other => panic!("expected NameNotFound, got {other:?}"),
        }
    }

    #[test]
    fn optimize_permutation_law() {
        let index = BrickIndex::new(five_brick_table()).unwrap();
        let coords = vec![
            (350.0, 40.0),
            (10.0, -30.0),
            (130.0, 20.0),
            (200.0, -10.0),
            (30.0, 60.0),
            (10.0, -30.0),
            (131.0, 21.0),
        ];
        let opt = index.optimize(&coords);

        // index is a bijection on 0..n.
        let mut seen = opt.index.clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..coords.len()).collect::<Vec<_>>());

        // sorted[inverse[i]] == coords[i], and index/inverse agree.
        for (i, &c) in coords.iter().enumerate() {
            assert_eq!(opt.coords[opt.inverse[i]], c);
            assert_eq!(opt.index[opt.inverse[i]], i);
        }

        // Same-brick points are contiguous: queried ids never decrease.
        let bids = index.query(&opt.coords);
        let keys: Vec<u64> = bids.iter().map(|b| b.map_or(u64::MAX, |v| v as u64)).collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]), "not grouped: {keys:?}");
    }

    #[test]
    fn optimize_keeps_unlocatable_points() {
        let index = BrickIndex::new(five_brick_table()).unwrap();
        let coords = vec![(10.0, 10.0), (-20.0, 0.0), (200.0, -50.0)];
        let opt = index.optimize(&coords);
        assert_eq!(opt.coords.len(), 3);
        // The out-of-range point groups at the end.
        assert_eq!(opt.coords[2], (-20.0, 0.0));
        assert_eq!(opt.coords[opt.inverse[1]], (-20.0, 0.0));
    }

    #[test]
    fn optimize_empty() {
        let index = BrickIndex::new(five_brick_table()).unwrap();
        let opt = index.optimize(&[]);
        assert!(opt.coords.is_empty());
        assert!(opt.index.is_empty());
        assert!(opt.inverse.is_empty());
    }
}
