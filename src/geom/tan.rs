//! Tangent-plane (gnomonic) WCS projection.
//!
//! Implements the FITS TAN convention of Calabretta & Greisen (2002):
//! sky coordinates are rotated into the projection's native spherical
//! frame (direction-cosine form, longitude of pole fixed at 180
//! degrees), projected radially onto the tangent plane, and mapped to
//! pixels through the CD matrix.
//!
//! All angles are decimal degrees; pixel coordinates are 0-indexed.

use std::collections::HashMap;
use std::fmt;

use super::sphere::radec_to_xyz;

/// Native longitude of the celestial pole, per the FITS WCS default.
const LONGPOLE: f64 = 180.0;

/// Degrees per radian.
const R2D: f64 = 180.0 / std::f64::consts::PI;

/// A parsed FITS header card value.
#[derive(Debug, Clone, PartialEq)]
pub enum CardValue {
    Text(String),
    Number(f64),
}

/// FITS header cards keyed by card name.
pub type CardMap = HashMap<String, CardValue>;

/// Errors raised when a projection cannot be built.
#[derive(Debug)]
pub enum WcsError {
    /// CTYPE1/CTYPE2 do not describe a tangent-plane projection.
    NotTangentPlane,
    /// A required header card is absent or has the wrong type.
    MissingCard(&'static str),
    /// The CD matrix is not invertible.
    SingularMatrix,
}

impl fmt::Display for WcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WcsError::NotTangentPlane => write!(f, "not a tangent plane projection"),
            WcsError::MissingCard(name) => write!(f, "missing or non-numeric card {name}"),
            WcsError::SingularMatrix => write!(f, "CD matrix is singular"),
        }
    }
}

impl std::error::Error for WcsError {}

/// TAN (gnomonic) projection between sky and pixel coordinates.
///
/// The native rotation matrix and the inverse of the CD matrix are
/// derived once at construction, so per-point transforms never rebuild
/// them; batch readout constructs one `TanWcs` per brick run.
#[derive(Debug, Clone)]
pub struct TanWcs {
    /// Reference point on sky (RA, Dec) in degrees.
    pub crval: [f64; 2],
    /// Reference point in 0-indexed pixel coordinates.
    pub crpix: [f64; 2],
    /// CD matrix mapping pixel offsets to intermediate world coordinates
    /// (degrees). `cd[0] = [cd1_1, cd1_2]`, `cd[1] = [cd2_1, cd2_2]`.
    pub cd: [[f64; 2]; 2],
    rot: [[f64; 3]; 3],
    cd_inv: [[f64; 2]; 2],
}

impl TanWcs {
    pub fn new(crval: [f64; 2], crpix: [f64; 2], cd: [[f64; 2]; 2]) -> Result<TanWcs, WcsError> {
        let det = cd[0][0] * cd[1][1] - cd[0][1] * cd[1][0];
        if det == 0.0 || !det.is_finite() {
            return Err(WcsError::SingularMatrix);
        }
        let inv = 1.0 / det;
        let cd_inv = [
            [cd[1][1] * inv, -cd[0][1] * inv],
            [-cd[1][0] * inv, cd[0][0] * inv],
        ];
        Ok(TanWcs {
            crval,
            crpix,
            cd,
            rot: rotation_matrix(crval[0], crval[1]),
            cd_inv,
        })
    }

    /// Build a projection from FITS header cards.
    ///
    /// CRPIX is converted from the FITS 1-based convention to 0-based.
    pub fn from_cards(cards: &CardMap) -> Result<TanWcs, WcsError> {
        for key in ["CTYPE1", "CTYPE2"] {
            match cards.get(key) {
                Some(CardValue::Text(ctype)) if ctype.contains("TAN") => {}
                Some(_) => return Err(WcsError::NotTangentPlane),
                None => return Err(WcsError::MissingCard(key)),
            }
        }
        let crval = [number(cards, "CRVAL1")?, number(cards, "CRVAL2")?];
        let crpix = [
            number(cards, "CRPIX1")? - 1.0,
            number(cards, "CRPIX2")? - 1.0,
        ];
        let cd = [
            [number(cards, "CD1_1")?, number(cards, "CD1_2")?],
            [number(cards, "CD2_1")?, number(cards, "CD2_2")?],
        ];
        TanWcs::new(crval, crpix, cd)
    }

    /// Forward transform: (RA, Dec) in degrees to pixel coordinates.
    ///
    /// No range checking is performed; coordinates far from the
    /// reference point project with increasing distortion, and the
    /// antipode is degenerate.
    pub fn sky_to_pixel(&self, ra: f64, dec: f64) -> (f64, f64) {
        let (lon, lat) = self.to_native(ra, dec);
        let (sin_lon, cos_lon) = lon.to_radians().sin_cos();
        let rdiv = R2D / lat.to_radians().tan();
        let ix = rdiv * sin_lon;
        let iy = -rdiv * cos_lon;
        (
            self.cd_inv[0][0] * ix + self.cd_inv[0][1] * iy + self.crpix[0],
            self.cd_inv[1][0] * ix + self.cd_inv[1][1] * iy + self.crpix[1],
        )
    }

    /// Inverse transform: pixel coordinates to (RA, Dec) in degrees,
    /// with RA wrapped into `[0, 360)`.
    pub fn pixel_to_sky(&self, x: f64, y: f64) -> (f64, f64) {
        let u = x - self.crpix[0];
        let v = y - self.crpix[1];
        let ix = self.cd[0][0] * u + self.cd[0][1] * v;
        let iy = self.cd[1][0] * u + self.cd[1][1] * v;
        // The clip keeps the reference pixel itself finite: it sits on
        // the pole of the native system.
        let r2 = (ix * ix + iy * iy).max(1e-28);
        let rinv = R2D / r2.sqrt();
        let lat = rinv.atan().to_degrees();
        let lon = f64::atan2(ix, -iy).to_degrees();
        let (ra, dec) = self.from_native(lon, lat);
        (ra.rem_euclid(360.0), dec)
    }

    /// Forward transform over a batch of coordinates.
    pub fn sky_to_pixel_batch(&self, coords: &[(f64, f64)]) -> Vec<(f64, f64)> {
        coords
            .iter()
            .map(|&(ra, dec)| self.sky_to_pixel(ra, dec))
            .collect()
    }

    /// Inverse transform over a batch of pixel positions.
    pub fn pixel_to_sky_batch(&self, xys: &[(f64, f64)]) -> Vec<(f64, f64)> {
        xys.iter().map(|&(x, y)| self.pixel_to_sky(x, y)).collect()
    }

    /// Approximate pixel scale in degrees per pixel from the CD matrix
    /// determinant.
    pub fn pixel_scale(&self) -> f64 {
        let det = self.cd[0][0] * self.cd[1][1] - self.cd[0][1] * self.cd[1][0];
        det.abs().sqrt()
    }

    /// Rotate (lon, lat) from the celestial frame into the native frame.
    fn to_native(&self, lon: f64, lat: f64) -> (f64, f64) {
        let v = radec_to_xyz(lon, lat);
        let r = &self.rot;
        angles(
            r[0][0] * v[0] + r[1][0] * v[1] + r[2][0] * v[2],
            r[0][1] * v[0] + r[1][1] * v[1] + r[2][1] * v[2],
            r[0][2] * v[0] + r[1][2] * v[1] + r[2][2] * v[2],
        )
    }

    /// Rotate (lon, lat) from the native frame back to the celestial
    /// frame. The rotation is orthogonal, so the inverse is the
    /// transpose of the forward matrix.
    fn from_native(&self, lon: f64, lat: f64) -> (f64, f64) {
        let v = radec_to_xyz(lon, lat);
        let r = &self.rot;
        angles(
            r[0][0] * v[0] + r[0][1] * v[1] + r[0][2] * v[2],
            r[1][0] * v[0] + r[1][1] * v[1] + r[1][2] * v[2],
            r[2][0] * v[0] + r[2][1] * v[1] + r[2][2] * v[2],
        )
    }
}

/// Recover (lon, lat) in degrees from rotated direction cosines.
fn angles(b0: f64, b1: f64, b2: f64) -> (f64, f64) {
    let lat = b2.clamp(-1.0, 1.0).asin().to_degrees();
    let lon = f64::atan2(b1, b0).to_degrees();
    (lon, lat)
}

/// Rotation taking the celestial frame to the native frame of a
/// projection with reference point (ra0, dec0), per Eq. 7 of Greisen &
/// Calabretta with theta0 = 90. Applied transposed for the forward
/// direction, untransposed for the inverse.
fn rotation_matrix(ra0: f64, dec0: f64) -> [[f64; 3]; 3] {
    let (sp, cp) = LONGPOLE.to_radians().sin_cos();
    let (sa, ca) = ra0.to_radians().sin_cos();
    let (sd, cd) = dec0.to_radians().sin_cos();
    [
        [-sa * sp - ca * cp * sd, sa * cp - ca * sp * sd, ca * cd],
        [ca * sp - sa * cp * sd, -ca * cp - sa * sp * sd, sa * cd],
        [cp * cd, sp * cd, sd],
    ]
}

fn number(cards: &CardMap, key: &'static str) -> Result<f64, WcsError> {
    match cards.get(key) {
        Some(CardValue::Number(v)) => Ok(*v),
        _ => Err(WcsError::MissingCard(key)),
    }
}
