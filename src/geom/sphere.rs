use std::f64::consts::TAU;

/// Convert (RA, Dec) in decimal degrees to a unit vector `[x, y, z]`.
pub fn radec_to_xyz(ra: f64, dec: f64) -> [f64; 3] {
    let (sin_ra, cos_ra) = ra.to_radians().sin_cos();
    let (sin_dec, cos_dec) = dec.to_radians().sin_cos();
    [cos_dec * cos_ra, cos_dec * sin_ra, sin_dec]
}

/// Convert a unit vector to (RA, Dec) in decimal degrees.
/// RA is in `[0, 360)`, Dec is in `[-90, 90]`.
pub fn xyz_to_radec(xyz: [f64; 3]) -> (f64, f64) {
    let mut ra = f64::atan2(xyz[1], xyz[0]);
    if ra < 0.0 {
        ra += TAU;
    }
    let dec = xyz[2].clamp(-1.0, 1.0).asin();
    (ra.to_degrees(), dec.to_degrees())
}

/// Great-circle separation between two sky positions, in degrees.
pub fn angular_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let va = radec_to_xyz(a.0, a.1);
    let vb = radec_to_xyz(b.0, b.1);
    let dot = va[0] * vb[0] + va[1] * vb[1] + va[2] * vb[2];
    dot.clamp(-1.0, 1.0).acos().to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-10;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!(
            (a - b).abs() < tol,
            "expected {a} ~= {b} (diff = {})",
            (a - b).abs()
        );
    }

    #[test]
    fn roundtrip_radec_xyz() {
        let cases = [
            (0.0, 0.0),
            (180.0, 0.0),
            (45.0, 30.0),
            (270.0, -45.0),
            (0.0, 90.0),
            (0.0, -90.0),
            (70.7, 32.5),
        ];
        for (ra, dec) in cases {
            let (ra2, dec2) = xyz_to_radec(radec_to_xyz(ra, dec));
            assert_close(dec, dec2, EPS);
            let dra = ((ra - ra2 + 180.0).rem_euclid(360.0)) - 180.0;
            assert_close(dra, 0.0, EPS);
        }
    }

    #[test]
    fn known_positions() {
        let v = radec_to_xyz(0.0, 0.0);
        assert_close(v[0], 1.0, EPS);
        assert_close(v[1], 0.0, EPS);
        assert_close(v[2], 0.0, EPS);

        let v = radec_to_xyz(90.0, 0.0);
        assert_close(v[0], 0.0, EPS);
        assert_close(v[1], 1.0, EPS);

        let v = radec_to_xyz(0.0, 90.0);
        assert_close(v[2], 1.0, EPS);
    }

    #[test]
    fn ra_wraps_into_range() {
        let (ra, dec) = xyz_to_radec(radec_to_xyz(-10.0, 20.0));
        assert_close(ra, 350.0, EPS);
        assert_close(dec, 20.0, EPS);
    }

    #[test]
    fn angular_distance_known() {
        assert_close(angular_distance((0.0, 0.0), (90.0, 0.0)), 90.0, EPS);
        assert_close(angular_distance((0.0, 0.0), (0.0, 0.0)), 0.0, EPS);
        assert_close(angular_distance((0.0, 90.0), (0.0, -90.0)), 180.0, EPS);
        assert_close(angular_distance((123.4, 5.6), (123.4, 6.6)), 1.0, 1e-9);
    }
}
