//! HEALPix (Hierarchical Equal Area isoLatitude Pixelisation) tessellation.
//!
//! Nested indexing scheme over the 12 base healpixes:
//! - 0–3: north polar cap
//! - 4–7: equatorial belt
//! - 8–11: south polar cap
//!
//! Within each base healpix, `x` increases northeast and `y` increases
//! northwest. A [`Tessellation`] fixes a depth (`nside = 2^depth`) and maps
//! sky directions to cells, enumerates cell neighbourhoods, and answers
//! disc queries. Higher depth means smaller, more numerous cells.

use std::collections::{HashSet, VecDeque};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI, TAU};

use crate::sphere::{angular_distance, lon_lat_to_xyz};

/// Nested HEALPix cell index at some depth.
pub type CellId = u64;

/// A HEALPix tessellation of the sphere at a fixed depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tessellation {
    depth: u8,
}

impl Tessellation {
    pub fn new(depth: u8) -> Self {
        assert!(depth <= 29, "depth {depth} exceeds the 64-bit nested range");
        Tessellation { depth }
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Nside: 2^depth.
    pub fn nside(&self) -> u64 {
        1u64 << self.depth
    }

    /// Total number of cells: 12 * nside^2.
    pub fn n_cells(&self) -> u64 {
        12 * self.nside() * self.nside()
    }

    /// Solid angle (steradians) of a single cell.
    pub fn cell_area(&self) -> f64 {
        4.0 * PI / self.n_cells() as f64
    }

    /// Approximate angular side length of a cell, in radians.
    pub fn cell_scale(&self) -> f64 {
        self.cell_area().sqrt()
    }

    /// Cell containing the direction (lon, lat), both in radians.
    ///
    /// `lon` is right ascension in [0, 2π); `lat` is declination in
    /// [-π/2, π/2].
    pub fn cell_of(&self, lon: f64, lat: f64) -> CellId {
        let (base, x, y) = lon_lat_to_base_xy(lon, lat, self.nside() as f64);
        self.compose(base, x, y)
    }

    /// Center direction of a cell, as (lon, lat) in radians.
    pub fn cell_center(&self, cell: CellId) -> (f64, f64) {
        let (base, x, y) = self.decompose(cell);
        base_xy_to_lon_lat(base, x as f64 + 0.5, y as f64 + 0.5, self.nside() as f64)
    }

    /// The (up to 8) neighbouring cells.
    pub fn neighbours(&self, cell: CellId) -> Vec<CellId> {
        let ns = self.nside() as i64;
        let (base, x, y) = self.decompose(cell);
        let x = x as i64;
        let y = y as i64;

        // 8 directions: E, NE, N, NW, W, SW, S, SE
        let dirs: [(i64, i64); 8] = [
            (1, 0),
            (1, 1),
            (0, 1),
            (-1, 1),
            (-1, 0),
            (-1, -1),
            (0, -1),
            (1, -1),
        ];

        let mut result = Vec::with_capacity(8);

        for (dx, dy) in dirs {
            let nx = x + dx;
            let ny = y + dy;

            if nx >= 0 && nx < ns && ny >= 0 && ny < ns {
                // Still within the same base healpix
                result.push(self.compose(base, nx as u64, ny as u64));
                continue;
            }

            // Crossed a boundary — find the neighbour base healpix
            let cross_x = nx < 0 || nx >= ns;
            let cross_y = ny < 0 || ny >= ns;

            let neighbour_base = if cross_x && cross_y {
                base_neighbour(base, dx.signum(), dy.signum())
            } else if cross_x {
                base_neighbour(base, dx.signum(), 0)
            } else {
                base_neighbour(base, 0, dy.signum())
            };

            let Some(nb) = neighbour_base else {
                continue;
            };

            // Coordinates may need swapping/reflection when the crossing
            // changes base-healpix row.
            let (fnx, fny) = transform_across_boundary(base, nb, nx, ny, ns);

            if fnx >= 0 && fnx < ns && fny >= 0 && fny < ns {
                result.push(self.compose(nb, fnx as u64, fny as u64));
            }
        }

        result
    }

    /// Cells intersecting the disc of the given angular radius (radians)
    /// around (lon, lat).
    ///
    /// Flood fill over cell adjacency, keeping cells whose center lies within
    /// `radius` plus a two-cell margin. The margin makes the set a superset
    /// of the true intersection for any pixel shape at this depth; callers
    /// filter candidates by exact separation. The seed cell (the one
    /// containing the center) is always included, so the result is never
    /// empty, even for radius <= 0.
    pub fn cells_in_disc(&self, lon: f64, lat: f64, radius: f64) -> Vec<CellId> {
        let center = lon_lat_to_xyz(lon, lat);
        let margin = 2.0 * self.cell_scale();
        let seed = self.cell_of(lon, lat);

        let mut seen: HashSet<CellId> = HashSet::new();
        let mut frontier: VecDeque<CellId> = VecDeque::new();
        let mut result: Vec<CellId> = Vec::new();

        seen.insert(seed);
        frontier.push_back(seed);

        while let Some(cell) = frontier.pop_front() {
            let (clon, clat) = self.cell_center(cell);
            let dist = angular_distance(center, lon_lat_to_xyz(clon, clat));
            if cell != seed && dist > radius + margin {
                continue;
            }
            result.push(cell);
            for nb in self.neighbours(cell) {
                if seen.insert(nb) {
                    frontier.push_back(nb);
                }
            }
        }

        result.sort_unstable();
        result
    }

    /// Compose a nested index from (base, x, y).
    fn compose(&self, base: u64, x: u64, y: u64) -> CellId {
        let ns2 = self.nside() * self.nside();
        base * ns2 + interleave_xy(x, y)
    }

    /// Decompose a nested index into (base, x, y).
    fn decompose(&self, cell: CellId) -> (u64, u64, u64) {
        let ns2 = self.nside() * self.nside();
        let base = cell / ns2;
        let (x, y) = deinterleave_xy(cell % ns2);
        (base, x, y)
    }
}

// ---------------------------------------------------------------------------
// Internal: base healpix classification
// ---------------------------------------------------------------------------

fn is_north(base: u64) -> bool {
    base <= 3
}

fn is_south(base: u64) -> bool {
    base >= 8
}

/// Row of a base healpix: 0=north, 1=equatorial, 2=south.
fn base_row(base: u64) -> u8 {
    if base <= 3 {
        0
    } else if base <= 7 {
        1
    } else {
        2
    }
}

// ---------------------------------------------------------------------------
// Internal: coordinate ↔ (base, x, y)
// ---------------------------------------------------------------------------

/// Convert (lon, lat) to (base healpix, x, y) in the XY scheme.
fn lon_lat_to_base_xy(lon: f64, lat: f64, ns: f64) -> (u64, u64, u64) {
    let z = lat.sin();
    let mut phi = lon;
    if phi < 0.0 {
        phi += TAU;
    }
    if phi >= TAU {
        phi -= TAU;
    }

    let phi_t = phi % FRAC_PI_2;
    let column = ((phi / FRAC_PI_2).floor() as i64).rem_euclid(4) as u64;

    if z.abs() >= 2.0 / 3.0 {
        // Polar cap
        let north = z >= 0.0;
        let zfactor = if north { 1.0 } else { -1.0 };

        // Eqns 19/20 from the HEALPix paper, solved for kx = Ns - xx, ky = Ns - yy
        let root_x = (1.0 - z * zfactor) * 3.0 * (ns * (2.0 * phi_t - PI) / PI).powi(2);
        let kx = if root_x <= 0.0 { 0.0 } else { root_x.sqrt() };

        let root_y = (1.0 - z * zfactor) * 3.0 * (ns * 2.0 * phi_t / PI).powi(2);
        let ky = if root_y <= 0.0 { 0.0 } else { root_y.sqrt() };

        let (xx, yy) = if north { (ns - kx, ns - ky) } else { (ky, kx) };

        let x = (xx.floor() as u64).min(ns as u64 - 1);
        let y = (yy.floor() as u64).min(ns as u64 - 1);

        let base = if north { column } else { 8 + column };
        (base, x, y)
    } else {
        // Equatorial region
        let zunits = (z + 2.0 / 3.0) / (4.0 / 3.0);
        let phiunits = phi_t / FRAC_PI_2;

        let u1 = zunits + phiunits;
        let u2 = zunits - phiunits + 1.0;

        let mut xx = u1 * ns;
        let mut yy = u2 * ns;

        let base = if xx >= ns {
            xx -= ns;
            if yy >= ns {
                yy -= ns;
                column // north polar
            } else {
                ((column + 1) % 4) + 4 // right equatorial
            }
        } else if yy >= ns {
            yy -= ns;
            column + 4 // left equatorial
        } else {
            8 + column // south polar
        };

        let x = (xx.floor() as u64).min(ns as u64 - 1);
        let y = (yy.floor() as u64).min(ns as u64 - 1);

        (base, x, y)
    }
}

/// Convert (base healpix, x, y) continuous coords back to (lon, lat).
fn base_xy_to_lon_lat(base: u64, x: f64, y: f64, ns: f64) -> (f64, f64) {
    let x_norm = x / ns;
    let y_norm = y / ns;

    let is_polar_region = if is_north(base) {
        (x_norm + y_norm) > 1.0
    } else if is_south(base) {
        (x_norm + y_norm) < 1.0
    } else {
        false
    };

    if !is_polar_region {
        // Equatorial computation
        let (phi_off, z_off, chp) = if base <= 3 {
            (1.0, 0.0, base)
        } else if base <= 7 {
            (0.0, -1.0, base - 4)
        } else {
            (1.0, -2.0, base - 8)
        };

        let z = (2.0 / 3.0) * (x_norm + y_norm + z_off);
        let phi = FRAC_PI_4 * (x_norm - y_norm + phi_off + 2.0 * chp as f64);

        let lat = z.clamp(-1.0, 1.0).asin();
        let mut lon = phi;
        if lon < 0.0 {
            lon += TAU;
        }
        if lon >= TAU {
            lon -= TAU;
        }
        (lon, lat)
    } else {
        // Polar computation — inverse of eqns 19/20 from the HEALPix paper
        let north = is_north(base);
        let zfactor = if north { 1.0 } else { -1.0 };

        // For south polar, swap and flip to work in north-polar convention
        let (px, py) = if north { (x, y) } else { (ns - y, ns - x) };

        let kx = ns - px;
        let ky = ns - py;

        let phi_t = if kx + ky == 0.0 {
            0.0
        } else {
            PI * ky / (2.0 * (kx + ky))
        };

        // Recover z, using two branches to avoid division-by-zero
        let z = if phi_t < FRAC_PI_4 {
            let denom = (2.0 * phi_t - PI) * ns;
            if denom.abs() < 1e-15 {
                zfactor
            } else {
                let val = PI * kx / denom;
                (1.0 - val * val / 3.0) * zfactor
            }
        } else {
            let denom = 2.0 * phi_t * ns;
            if denom.abs() < 1e-15 {
                zfactor
            } else {
                let val = PI * ky / denom;
                (1.0 - val * val / 3.0) * zfactor
            }
        };

        let base_col = if is_south(base) { base - 8 } else { base };
        let phi = FRAC_PI_2 * base_col as f64 + phi_t;

        let lat = z.clamp(-1.0, 1.0).asin();
        let mut lon = phi;
        if lon < 0.0 {
            lon += TAU;
        }
        if lon >= TAU {
            lon -= TAU;
        }
        (lon, lat)
    }
}

// ---------------------------------------------------------------------------
// Internal: XY ↔ nested bit-interleaving
// ---------------------------------------------------------------------------

/// Bit-interleave (x, y) → sub-index. x provides even bits, y odd bits.
fn interleave_xy(x: u64, y: u64) -> u64 {
    let mut result = 0u64;
    let mut xx = x;
    let mut yy = y;
    let mut bit = 0;
    while xx > 0 || yy > 0 {
        result |= (xx & 1) << bit;
        bit += 1;
        result |= (yy & 1) << bit;
        bit += 1;
        xx >>= 1;
        yy >>= 1;
    }
    result
}

/// De-interleave sub-index → (x, y).
fn deinterleave_xy(sub: u64) -> (u64, u64) {
    let mut x = 0u64;
    let mut y = 0u64;
    let mut s = sub;
    let mut bit = 0;
    while s > 0 {
        x |= (s & 1) << bit;
        s >>= 1;
        y |= (s & 1) << bit;
        s >>= 1;
        bit += 1;
    }
    (x, y)
}

// ---------------------------------------------------------------------------
// Internal: base healpix adjacency
// ---------------------------------------------------------------------------

/// The neighbouring base healpix in direction (dx, dy), each -1, 0, or +1.
/// Returns None when no such neighbour exists.
fn base_neighbour(base: u64, dx: i64, dy: i64) -> Option<u64> {
    let hp = base as i64;

    if dx == 0 && dy == 0 {
        return Some(base);
    }

    if is_north(base) {
        // North polar: base 0..3
        let col = hp;
        match (dx, dy) {
            (1, 0) => Some(((col + 1) % 4) as u64),
            (0, 1) => Some(((col + 3) % 4) as u64),
            (1, 1) => Some(((col + 2) % 4) as u64),
            (-1, 0) => Some((col + 4) as u64),
            (0, -1) => Some((4 + (col + 1) % 4) as u64),
            (-1, -1) => Some((col + 8) as u64),
            _ => None,
        }
    } else if is_south(base) {
        // South polar: base 8..11
        let col = hp - 8;
        match (dx, dy) {
            (1, 0) => Some((4 + (col + 1) % 4) as u64),
            (0, 1) => Some((col + 4) as u64),
            (1, 1) => Some(col as u64), // to north polar
            (-1, 0) => Some((8 + (col + 3) % 4) as u64),
            (0, -1) => Some((8 + (col + 1) % 4) as u64),
            (-1, -1) => Some((8 + (col + 2) % 4) as u64),
            _ => None,
        }
    } else {
        // Equatorial: base 4..7
        let col = hp - 4;
        match (dx, dy) {
            (1, 0) => Some(col as u64),                                   // to north
            (0, 1) => Some(((col + 3) % 4) as u64),                       // to north
            (-1, 0) => Some((8 + (col + 3) % 4) as u64),                  // to south
            (0, -1) => Some((col + 8) as u64),                            // to south
            (1, -1) => Some((4 + (col + 1) % 4) as u64),                  // to equatorial right
            (-1, 1) => Some(((4 + (col + 3) % 4).rem_euclid(12)) as u64), // to equatorial left
            _ => None,
        }
    }
}

/// Transform coordinates when crossing from one base healpix to another.
///
/// Given the original (nx, ny) that fell outside [0, ns) in `from_base`,
/// compute the valid coordinates in `to_base`.
fn transform_across_boundary(
    from_base: u64,
    to_base: u64,
    nx: i64,
    ny: i64,
    ns: i64,
) -> (i64, i64) {
    let from_row = base_row(from_base);
    let to_row = base_row(to_base);

    // Wrap coordinates into [0, ns) as a starting point
    let mut fnx = nx.rem_euclid(ns);
    let mut fny = ny.rem_euclid(ns);

    let crossed_x = nx < 0 || nx >= ns;
    let crossed_y = ny < 0 || ny >= ns;

    match (from_row, to_row) {
        // North polar to north polar: swap coords
        (0, 0) => {
            if crossed_x && !crossed_y {
                fnx = ny;
                fny = ns - 1;
            } else if crossed_y && !crossed_x {
                fny = nx;
                fnx = ns - 1;
            } else {
                // Corner: diagonal neighbour
                fnx = ns - 1;
                fny = ns - 1;
            }
        }
        // South polar to south polar: mirror of north-north
        (2, 2) => {
            if crossed_x && !crossed_y {
                fnx = ny.rem_euclid(ns);
                fny = 0;
            } else if crossed_y && !crossed_x {
                fny = nx.rem_euclid(ns);
                fnx = 0;
            } else {
                fnx = 0;
                fny = 0;
            }
        }
        // Same row or polar/equatorial transition: wrapping is sufficient
        _ => {}
    }

    (fnx, fny)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn nside_and_cell_counts() {
        assert_eq!(Tessellation::new(0).nside(), 1);
        assert_eq!(Tessellation::new(1).nside(), 2);
        assert_eq!(Tessellation::new(3).nside(), 8);

        assert_eq!(Tessellation::new(0).n_cells(), 12);
        assert_eq!(Tessellation::new(1).n_cells(), 48);
        assert_eq!(Tessellation::new(2).n_cells(), 192);
    }

    #[test]
    fn cell_area_sums_to_sphere() {
        for depth in 0..5 {
            let t = Tessellation::new(depth);
            let total = t.cell_area() * t.n_cells() as f64;
            assert!(
                (total - 4.0 * PI).abs() < 1e-8,
                "depth {depth}: total={total}"
            );
        }
    }

    #[test]
    fn roundtrip_known_positions() {
        let positions = [
            (0.0, 0.0),             // on equator
            (PI, 0.0),              // equator, opposite side
            (FRAC_PI_2, FRAC_PI_4), // mid-latitude
            (0.0, 1.3),             // near north pole
            (PI, -1.3),             // near south pole
            (1.0, 0.5),             // generic
            (5.0, -0.3),            // another generic
        ];

        for depth in 1..8 {
            let t = Tessellation::new(depth);
            for &(lon, lat) in &positions {
                let cell = t.cell_of(lon, lat);
                assert!(
                    cell < t.n_cells(),
                    "cell {cell} >= n_cells {} at depth {depth}",
                    t.n_cells()
                );

                let (clon, clat) = t.cell_center(cell);
                let scale = t.cell_scale();
                let dlon = (clon - lon).abs().min(TAU - (clon - lon).abs());
                let dlat = (clat - lat).abs();
                assert!(
                    dlon < scale * 3.0 && dlat < scale * 3.0,
                    "depth {depth}, ({lon}, {lat}) -> cell {cell} -> ({clon}, {clat})"
                );
            }
        }
    }

    #[test]
    fn all_cells_covered() {
        for depth in 0..4 {
            let t = Tessellation::new(depth);
            let mut seen = vec![false; t.n_cells() as usize];

            let n = 500;
            for i in 0..n {
                let lon = TAU * i as f64 / n as f64;
                for j in 0..n {
                    let lat = -FRAC_PI_2 + PI * j as f64 / (n - 1) as f64;
                    seen[t.cell_of(lon, lat) as usize] = true;
                }
            }

            let covered = seen.iter().filter(|&&v| v).count();
            assert_eq!(
                covered,
                t.n_cells() as usize,
                "depth {depth}: only {covered}/{} cells covered",
                t.n_cells()
            );
        }
    }

    #[test]
    fn bit_interleave_roundtrip() {
        for x in 0..32 {
            for y in 0..32 {
                let sub = interleave_xy(x, y);
                assert_eq!((x, y), deinterleave_xy(sub), "roundtrip ({x}, {y})");
            }
        }
    }

    #[test]
    fn neighbours_symmetric() {
        // If A is a neighbour of B, then B should be a neighbour of A.
        for depth in 1..5 {
            let t = Tessellation::new(depth);
            for cell in 0..t.n_cells() {
                let nbrs = t.neighbours(cell);
                for &n in &nbrs {
                    assert!(
                        t.neighbours(n).contains(&cell),
                        "depth {depth}: {cell} lists {n}, but not vice versa"
                    );
                }
            }
        }
    }

    #[test]
    fn neighbours_valid_range() {
        for depth in 0..5 {
            let t = Tessellation::new(depth);
            for cell in 0..t.n_cells() {
                let nbrs = t.neighbours(cell);
                for &n in &nbrs {
                    assert!(n < t.n_cells(), "depth {depth}, cell {cell}: {n} out of range");
                }
                assert!(!nbrs.contains(&cell), "depth {depth}, cell {cell}: self-loop");
            }
        }
    }

    #[test]
    fn interior_cell_has_eight_neighbours() {
        for depth in 2..6 {
            let t = Tessellation::new(depth);
            let ns = t.nside();
            let cell = t.compose(4, ns / 2, ns / 2);
            assert_eq!(t.neighbours(cell).len(), 8, "depth {depth}");
        }
    }

    #[test]
    fn disc_contains_seed_cell() {
        let t = Tessellation::new(5);
        let (lon, lat) = (1.3, -0.4);
        let seed = t.cell_of(lon, lat);

        for radius in [0.0, 1e-6, 0.01, 0.1] {
            let cells = t.cells_in_disc(lon, lat, radius);
            assert!(!cells.is_empty());
            assert!(cells.contains(&seed), "radius {radius} lost the seed cell");
        }
    }

    #[test]
    fn disc_covers_nearby_cells() {
        // Every cell whose center is within the radius must be in the disc.
        let t = Tessellation::new(4);
        let (lon, lat) = (2.0, 0.3);
        let radius = 0.25;
        let cells = t.cells_in_disc(lon, lat, radius);

        let center = lon_lat_to_xyz(lon, lat);
        for cell in 0..t.n_cells() {
            let (clon, clat) = t.cell_center(cell);
            if angular_distance(center, lon_lat_to_xyz(clon, clat)) <= radius {
                assert!(cells.contains(&cell), "cell {cell} inside disc but missing");
            }
        }
    }

    #[test]
    fn disc_grows_with_radius() {
        let t = Tessellation::new(5);
        let small = t.cells_in_disc(0.7, 0.1, 0.02).len();
        let large = t.cells_in_disc(0.7, 0.1, 0.3).len();
        assert!(large > small, "expected {large} > {small}");
    }

    #[test]
    fn poles_map_to_valid_cells() {
        for depth in 1..8 {
            let t = Tessellation::new(depth);
            for lat in [FRAC_PI_2, -FRAC_PI_2] {
                let cell = t.cell_of(0.0, lat);
                assert!(cell < t.n_cells());
                let (_, clat) = t.cell_center(cell);
                assert!(clat.abs() > 1.0, "pole cell center lat = {clat}");
            }
        }
    }
}
