//! Great-circle distance and bounding-box helpers shared by all collectors.

use crate::aircraft::Aircraft;

/// Earth radius in miles for haversine.
const EARTH_RADIUS_MILES: f64 = 3956.0;

/// Approximate miles per degree of latitude/longitude, used for the
/// bounding-box query shape.
const MILES_PER_DEGREE: f64 = 69.0;

/// Great-circle distance in miles between two points.
pub fn haversine_miles(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1) = (lat1.to_radians(), lon1.to_radians());
    let (lat2, lon2) = (lat2.to_radians(), lon2.to_radians());

    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * a.sqrt().asin() * EARTH_RADIUS_MILES
}

/// Distance from an optional position to a center, infinite when the
/// position is incomplete.
pub fn distance_or_inf(lat: Option<f64>, lon: Option<f64>, center_lat: f64, center_lon: f64) -> f64 {
    match (lat, lon) {
        (Some(lat), Some(lon)) => haversine_miles(lat, lon, center_lat, center_lon),
        _ => f64::INFINITY,
    }
}

/// Rectangular lat/lon query region for box-only upstream APIs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    /// Symmetric box around a center, sized by the degree approximation of
    /// the radius.
    pub fn around(center_lat: f64, center_lon: f64, radius_miles: f64) -> Self {
        let offset = radius_miles / MILES_PER_DEGREE;
        Self {
            lat_min: center_lat - offset,
            lat_max: center_lat + offset,
            lon_min: center_lon - offset,
            lon_max: center_lon + offset,
        }
    }
}

/// Round to one decimal place, the precision `distance_miles` carries.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Drop aircraft without a full position or beyond the radius, attaching
/// `distance_miles` to the survivors.
pub fn filter_by_radius(
    aircraft: Vec<Aircraft>,
    center_lat: f64,
    center_lon: f64,
    radius_miles: f64,
) -> Vec<Aircraft> {
    aircraft
        .into_iter()
        .filter_map(|mut a| {
            let (lat, lon) = (a.lat?, a.lon?);
            let distance = haversine_miles(lat, lon, center_lat, center_lon);
            if distance <= radius_miles {
                a.distance_miles = Some(round1(distance));
                Some(a)
            } else {
                None
            }
        })
        .collect()
}

/// Attach `distance_miles` without filtering, for sources already constrained
/// by a bounding-box query.
pub fn attach_distances(aircraft: &mut [Aircraft], center_lat: f64, center_lon: f64) {
    for a in aircraft {
        if let (Some(lat), Some(lon)) = (a.lat, a.lon) {
            a.distance_miles = Some(round1(haversine_miles(lat, lon, center_lat, center_lon)));
        }
    }
}

/// Stable ascending sort by distance; aircraft without a distance sort last.
pub fn sort_by_distance(aircraft: &mut [Aircraft]) {
    aircraft.sort_by(|a, b| {
        let da = a.distance_miles.unwrap_or(f64::INFINITY);
        let db = b.distance_miles.unwrap_or(f64::INFINITY);
        da.total_cmp(&db)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Degrees of latitude corresponding to a distance along a meridian, so
    /// boundary tests land exactly where intended.
    fn lat_degrees_for_miles(miles: f64) -> f64 {
        miles * 180.0 / (std::f64::consts::PI * EARTH_RADIUS_MILES)
    }

    #[test]
    fn haversine_zero_for_identical_points() {
        assert_eq!(haversine_miles(34.05, -118.24, 34.05, -118.24), 0.0);
    }

    #[test]
    fn haversine_is_symmetric() {
        let d1 = haversine_miles(34.05, -118.24, 37.77, -122.42);
        let d2 = haversine_miles(37.77, -122.42, 34.05, -118.24);
        assert!((d1 - d2).abs() < 1e-9);
    }

    #[test]
    fn missing_position_is_infinitely_far() {
        assert_eq!(distance_or_inf(None, Some(-118.0), 34.0, -118.0), f64::INFINITY);
        assert_eq!(distance_or_inf(Some(34.0), None, 34.0, -118.0), f64::INFINITY);
    }

    #[test]
    fn bounding_box_uses_degree_approximation() {
        let bbox = BoundingBox::around(34.0, -118.0, 69.0);
        assert!((bbox.lat_min - 33.0).abs() < 1e-9);
        assert!((bbox.lat_max - 35.0).abs() < 1e-9);
        assert!((bbox.lon_min - (-119.0)).abs() < 1e-9);
        assert!((bbox.lon_max - (-117.0)).abs() < 1e-9);
    }

    #[test]
    fn filter_keeps_inside_and_drops_outside_radius() {
        let mut inside = Aircraft::new("AAA111", "dump1090");
        inside.lat = Some(lat_degrees_for_miles(49.5));
        inside.lon = Some(0.0);
        let mut outside = Aircraft::new("BBB222", "dump1090");
        outside.lat = Some(lat_degrees_for_miles(50.5));
        outside.lon = Some(0.0);
        let mut no_position = Aircraft::new("CCC333", "dump1090");
        no_position.lat = Some(0.1);

        let filtered = filter_by_radius(vec![inside, outside, no_position], 0.0, 0.0, 50.0);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].hex, "AAA111");
        assert!((filtered[0].distance_miles.unwrap() - 49.5).abs() <= 0.1);
    }

    #[test]
    fn sort_places_missing_distance_last() {
        let mut far = Aircraft::new("AAA111", "opensky");
        far.distance_miles = Some(80.0);
        let mut near = Aircraft::new("BBB222", "opensky");
        near.distance_miles = Some(5.0);
        let unknown = Aircraft::new("CCC333", "opensky");

        let mut list = vec![unknown, far, near];
        sort_by_distance(&mut list);
        let order: Vec<&str> = list.iter().map(|a| a.hex.as_str()).collect();
        assert_eq!(order, vec!["BBB222", "AAA111", "CCC333"]);
    }
}
