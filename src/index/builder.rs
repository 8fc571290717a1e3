//! Generate a full-sky brick table.
//!
//! The sky is divided into uniform declination rows; each row gets a
//! number of equal-width columns proportional to cos(dec), keeping
//! brick areas roughly uniform from equator to pole. The reference
//! survey geometry uses 721 rows of 0.25 degree height, with the two
//! pole rows reduced to half-height caps.

use super::BrickTableRow;

/// Build a full-sky brick table with `nrows` declination rows.
///
/// Row `r` is centered at `dec = -90 + r * height` with
/// `height = 180 / (nrows - 1)`; rows 0 and `nrows - 1` are the pole
/// caps. Bricks are emitted row-major, so ids are dense and 1-based
/// and the (row, col) hash sequence is strictly increasing.
pub fn build_bricks(nrows: u32) -> Vec<BrickTableRow> {
    assert!(nrows >= 2, "need at least two declination rows");
    let rowmax = nrows - 1;
    let height = 180.0 / rowmax as f64;

    let mut out = Vec::new();
    let mut id = 1u32;
    for row in 0..=rowmax {
        let dec = -90.0 + row as f64 * height;
        let dec1 = (dec - height / 2.0).max(-90.0);
        let dec2 = (dec + height / 2.0).min(90.0);
        let ncol = ncols_at(dec, height);
        let width = 360.0 / ncol as f64;
        for col in 0..ncol {
            let ra1 = col as f64 * width;
            let ra2 = ra1 + width;
            let ra = 0.5 * (ra1 + ra2);
            out.push(BrickTableRow {
                id,
                name: brick_name(ra, dec),
                ra,
                dec,
                ra1,
                ra2,
                dec1,
                dec2,
                row,
                col,
            });
            id += 1;
        }
    }
    out
}

/// Column count for a row centered at `dec`: enough `height`-wide
/// bricks to go around the dec circle, at least one.
fn ncols_at(dec: f64, height: f64) -> u32 {
    ((360.0 * dec.to_radians().cos() / height).round() as u32).max(1)
}

/// Survey-style brick name: RA and Dec of the center scaled by 10,
/// with a 'p'/'m' sign separator, e.g. "1822p325".
pub fn brick_name(ra: f64, dec: f64) -> String {
    let sign = if dec < 0.0 { 'm' } else { 'p' };
    format!(
        "{:04}{}{:03}",
        (ra * 10.0).round() as i64,
        sign,
        (dec.abs() * 10.0).round() as i64
    )
}
