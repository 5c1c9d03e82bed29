use std::f64::consts::TAU;

/// Convert (lon, lat) in radians to a unit vector `[x, y, z]`.
pub fn lon_lat_to_xyz(lon: f64, lat: f64) -> [f64; 3] {
    let cos_lat = lat.cos();
    [cos_lat * lon.cos(), cos_lat * lon.sin(), lat.sin()]
}

/// Convert a unit vector to (lon, lat) in radians.
/// Lon is in `[0, 2*pi)`, lat is in `[-pi/2, pi/2]`.
pub fn xyz_to_lon_lat(xyz: [f64; 3]) -> (f64, f64) {
    let mut lon = f64::atan2(xyz[1], xyz[0]);
    if lon < 0.0 {
        lon += TAU;
    }
    let lat = xyz[2].asin();
    (lon, lat)
}

/// Great-circle angular distance between two unit vectors, in radians.
///
/// The dot product is clamped to `[-1, 1]` before the inverse cosine so that
/// floating-point overshoot near 0 and pi cannot produce NaN.
pub fn angular_distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dot = a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
    dot.clamp(-1.0, 1.0).acos()
}
