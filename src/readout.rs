//! Batched, order-preserving pixel readout.
//!
//! Given an unordered coordinate batch, the reader resolves bricks,
//! drops points outside the footprint, regroups the rest so each brick
//! is visited once, projects each run onto its brick's raster, gathers
//! bounds-checked pixel values, and scatters the results back into the
//! caller's original order. Batching never changes results, only cost.

use std::fmt;

use crate::brick::Brick;
use crate::footprint::Footprint;
use crate::geom::tan::{TanWcs, WcsError};
use crate::index::BrickIndex;
use crate::repo::{ImageRepo, RepoError};

/// Failure of a batch readout or a per-brick pixel operation.
#[derive(Debug)]
pub enum ReadoutError {
    Repo(RepoError),
    Wcs(WcsError),
}

impl fmt::Display for ReadoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadoutError::Repo(e) => e.fmt(f),
            ReadoutError::Wcs(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for ReadoutError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReadoutError::Repo(e) => Some(e),
            ReadoutError::Wcs(e) => Some(e),
        }
    }
}

impl From<RepoError> for ReadoutError {
    fn from(e: RepoError) -> ReadoutError {
        ReadoutError::Repo(e)
    }
}

impl From<WcsError> for ReadoutError {
    fn from(e: WcsError) -> ReadoutError {
        ReadoutError::Wcs(e)
    }
}

impl Brick {
    /// Pixel coordinates of sky positions in this brick's raster.
    ///
    /// The returned positions are x-first; index the raster as
    /// `[y, x]`.
    pub fn query(
        &self,
        repo: &mut dyn ImageRepo,
        coords: &[(f64, f64)],
    ) -> Result<Vec<(f64, f64)>, ReadoutError> {
        let meta = repo.metadata(self)?;
        let wcs = TanWcs::from_cards(&meta.cards)?;
        Ok(wcs.sky_to_pixel_batch(coords))
    }

    /// Sky coordinates of raster pixel positions.
    pub fn revert(
        &self,
        repo: &mut dyn ImageRepo,
        xys: &[(f64, f64)],
    ) -> Result<Vec<(f64, f64)>, ReadoutError> {
        let meta = repo.metadata(self)?;
        let wcs = TanWcs::from_cards(&meta.cards)?;
        Ok(wcs.pixel_to_sky_batch(xys))
    }

    /// Values of the raster pixels containing each coordinate.
    ///
    /// Coordinates whose nearest pixel falls outside the raster bounds
    /// read as `default`.
    pub fn readout(
        &self,
        repo: &mut dyn ImageRepo,
        coords: &[(f64, f64)],
        default: f32,
    ) -> Result<Vec<f32>, ReadoutError> {
        let meta = repo.metadata(self)?;
        let wcs = TanWcs::from_cards(&meta.cards)?;
        let img = repo.image(self)?;
        let (ny, nx) = img.dim();

        let mut values = vec![default; coords.len()];
        for (value, &(ra, dec)) in values.iter_mut().zip(coords) {
            let (x, y) = wcs.sky_to_pixel(ra, dec);
            let x = x.round();
            let y = y.round();
            if x >= 0.0 && x < nx as f64 && y >= 0.0 && y < ny as f64 {
                *value = img[[y as usize, x as usize]];
            }
        }
        Ok(values)
    }
}

/// Read one pixel value per coordinate from `repo`.
///
/// Coordinates outside the footprint, or whose nearest pixel falls
/// outside their brick's raster, read as `default`. A brick whose
/// raster file is absent fills `default` for its run when
/// `ignore_missing` is set (with a warning on stderr) and aborts the
/// whole batch otherwise; partial output is never mixed with a
/// propagated failure. Results come back in the caller's coordinate
/// order.
pub fn readout(
    coords: &[(f64, f64)],
    index: &BrickIndex,
    footprint: &Footprint,
    repo: &mut dyn ImageRepo,
    default: f32,
    ignore_missing: bool,
) -> Result<Vec<f32>, ReadoutError> {
    let mut out = vec![default; coords.len()];

    let bids = index.query(coords);
    let mask = footprint.covers_all(&bids);

    let inside: Vec<(f64, f64)> = coords
        .iter()
        .zip(&mask)
        .filter(|&(_, &m)| m)
        .map(|(&c, _)| c)
        .collect();
    if inside.is_empty() {
        return Ok(out);
    }

    let opt = index.optimize(&inside);
    let bids = index.query(&opt.coords);

    let mut pixels = vec![default; opt.coords.len()];
    let mut start = 0;
    while start < opt.coords.len() {
        // Covered points always resolve to a brick.
        let Some(bid) = bids[start] else {
            start += 1;
            continue;
        };
        let mut end = start + 1;
        while end < opt.coords.len() && bids[end] == Some(bid) {
            end += 1;
        }

        let brick = index.get_brick(bid);
        match brick.readout(repo, &opt.coords[start..end], default) {
            Ok(values) => pixels[start..end].copy_from_slice(&values),
            Err(ReadoutError::Repo(RepoError::Missing { path })) if ignore_missing => {
                eprintln!(
                    "warning: treating brick {} as uncovered: missing raster {}",
                    brick.name,
                    path.display()
                );
            }
            Err(e) => return Err(e),
        }
        start = end;
    }

    // Scatter back: pixels is in brick-sorted order; inverse maps the
    // k-th covered input to its slot there.
    let mut k = 0;
    for (slot, &m) in out.iter_mut().zip(&mask) {
        if m {
            *slot = pixels[opt.inverse[k]];
            k += 1;
        }
    }
    Ok(out)
}
