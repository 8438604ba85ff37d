//! Planar and spherical geometry for portal layouts.
//!
//! Portals live on the sphere, but every validity predicate (crossing links,
//! portals inside a field) is evaluated on a gnomonic projection. Great
//! circles map to straight lines under that projection, so planar segment
//! tests agree with what players see on the map.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Cross products smaller than this (in square metres) count as collinear.
const COLLINEAR_EPS: f64 = 1e-9;

/// Geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLng {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether the coordinates are finite and inside the usual ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Projected position in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Great-circle distance in metres (Vincenty formula on a sphere).
pub fn spherical_distance(a: LatLng, b: LatLng) -> f64 {
    let (lat1, lon1) = (a.latitude.to_radians(), a.longitude.to_radians());
    let (lat2, lon2) = (b.latitude.to_radians(), b.longitude.to_radians());
    let dlon = (lon2 - lon1).abs();

    let (sin_lat1, cos_lat1) = lat1.sin_cos();
    let (sin_lat2, cos_lat2) = lat2.sin_cos();
    let (sin_dlon, cos_dlon) = dlon.sin_cos();

    let numer = ((cos_lat2 * sin_dlon).powi(2)
        + (cos_lat1 * sin_lat2 - sin_lat1 * cos_lat2 * cos_dlon).powi(2))
    .sqrt();
    let denom = sin_lat1 * sin_lat2 + cos_lat1 * cos_lat2 * cos_dlon;

    EARTH_RADIUS_M * numer.atan2(denom)
}

/// Gnomonic projection centred on the middle of the bounding box.
pub fn gnomonic_projection(coords: &[LatLng]) -> Vec<Point> {
    if coords.is_empty() {
        return Vec::new();
    }

    let (mut min_lat, mut max_lat) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut min_lon, mut max_lon) = (f64::INFINITY, f64::NEG_INFINITY);
    for c in coords {
        min_lat = min_lat.min(c.latitude);
        max_lat = max_lat.max(c.latitude);
        min_lon = min_lon.min(c.longitude);
        max_lon = max_lon.max(c.longitude);
    }
    let lat0 = (min_lat + (max_lat - min_lat) / 2.0).to_radians();
    let lon0 = (min_lon + (max_lon - min_lon) / 2.0).to_radians();
    let (sin_lat0, cos_lat0) = lat0.sin_cos();

    coords
        .iter()
        .map(|c| {
            let (sin_lat, cos_lat) = c.latitude.to_radians().sin_cos();
            let dlon = c.longitude.to_radians() - lon0;
            let (sin_dlon, cos_dlon) = dlon.sin_cos();
            let cos_c = sin_lat0 * sin_lat + cos_lat0 * cos_lat * cos_dlon;
            Point {
                x: EARTH_RADIUS_M * cos_lat * sin_dlon / cos_c,
                y: EARTH_RADIUS_M * (cos_lat0 * sin_lat - sin_lat0 * cos_lat * cos_dlon) / cos_c,
            }
        })
        .collect()
}

/// Twice the signed area of triangle `abc`; positive when counter-clockwise.
pub fn orientation(a: Point, b: Point, c: Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Signed area of triangle `abc`.
pub fn triangle_area(a: Point, b: Point, c: Point) -> f64 {
    0.5 * orientation(a, b, c)
}

fn turn(a: Point, b: Point, c: Point) -> i8 {
    let o = orientation(a, b, c);
    if o > COLLINEAR_EPS {
        1
    } else if o < -COLLINEAR_EPS {
        -1
    } else {
        0
    }
}

/// Whether segments `p1p2` and `q1q2` cross at a point interior to both.
///
/// Touching at an endpoint or overlapping collinearly is not a crossing.
pub fn segments_cross(p1: Point, p2: Point, q1: Point, q2: Point) -> bool {
    let d1 = turn(q1, q2, p1);
    let d2 = turn(q1, q2, p2);
    let d3 = turn(p1, p2, q1);
    let d4 = turn(p1, p2, q2);
    d1 * d2 < 0 && d3 * d4 < 0
}

/// Whether `p` lies strictly inside triangle `tri`, in either winding.
pub fn strictly_inside(p: Point, tri: [Point; 3]) -> bool {
    let [a, b, c] = tri;
    let d1 = turn(a, b, p);
    let d2 = turn(b, c, p);
    let d3 = turn(c, a, p);
    (d1 > 0 && d2 > 0 && d3 > 0) || (d1 < 0 && d2 < 0 && d3 < 0)
}

/// Indices of the convex hull vertices in counter-clockwise order.
///
/// Collinear boundary points are not hull vertices. Fewer than three
/// non-collinear points yield a degenerate hull with fewer than three entries.
pub fn convex_hull(points: &[Point]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_by(|&i, &j| {
        points[i]
            .x
            .total_cmp(&points[j].x)
            .then(points[i].y.total_cmp(&points[j].y))
    });
    order.dedup_by(|a, b| points[*a] == points[*b]);
    if order.len() < 3 {
        return order;
    }

    let mut lower: Vec<usize> = Vec::with_capacity(order.len());
    for &i in &order {
        while lower.len() >= 2
            && turn(
                points[lower[lower.len() - 2]],
                points[lower[lower.len() - 1]],
                points[i],
            ) <= 0
        {
            lower.pop();
        }
        lower.push(i);
    }

    let mut upper: Vec<usize> = Vec::with_capacity(order.len());
    for &i in order.iter().rev() {
        while upper.len() >= 2
            && turn(
                points[upper[upper.len() - 2]],
                points[upper[upper.len() - 1]],
                points[i],
            ) <= 0
        {
            upper.pop();
        }
        upper.push(i);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    if lower.len() < 3 {
        // All points collinear: both chains collapse onto the same segment.
        lower.truncate(2);
    }
    lower
}
