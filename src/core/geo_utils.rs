//! Small spherical helpers shared by the coding strategies

use crate::types::GeoPos;

/// Mean earth radius in meters
pub const EARTH_RADIUS: f64 = 6_371_008.8;

/// Kilometers per degree of latitude on the mean sphere
pub const KM_PER_DEGREE: f64 = 111.195;

/// Wrap a longitude into [-180, 180)
pub fn normalize_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Shift a longitude into [0, 360) when the raster crosses the anti-meridian
#[inline]
pub fn unwrap_lon(lon: f64, crosses_antimeridian: bool) -> f64 {
    if crosses_antimeridian && lon < 0.0 {
        lon + 360.0
    } else {
        lon
    }
}

/// Bring `lon` onto the same branch as `reference` (|lon - reference| <= 180)
#[inline]
pub fn align_lon(lon: f64, reference: f64) -> f64 {
    let delta = lon - reference;
    if delta > 180.0 {
        lon - 360.0
    } else if delta < -180.0 {
        lon + 360.0
    } else {
        lon
    }
}

/// Signed longitude difference a - b in (-180, 180]
#[inline]
pub fn lon_delta(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

/// Squared angular distance in degrees², longitude scaled by cos(lat)
#[inline]
pub fn distance_sq(lat: f64, lon: f64, sample_lat: f64, sample_lon: f64) -> f64 {
    let f = lat.to_radians().cos();
    let dlat = lat - sample_lat;
    let dlon = f * lon_delta(lon, sample_lon);
    dlat * dlat + dlon * dlon
}

pub fn km_to_degrees(km: f64) -> f64 {
    km / KM_PER_DEGREE
}

/// Move a geographic position by `distance` meters towards `azimuth` degrees (clockwise from north)
///
/// Small-displacement approximation on the mean sphere.
pub fn displace(geo_pos: GeoPos, distance: f64, azimuth: f64) -> GeoPos {
    let az = azimuth.to_radians();
    let delta = distance / EARTH_RADIUS;
    let cos_lat = geo_pos.lat.to_radians().cos().max(1e-12);

    let lat = geo_pos.lat + (delta * az.cos()).to_degrees();
    let lon = geo_pos.lon + (delta * az.sin() / cos_lat).to_degrees();

    GeoPos::new(lat.clamp(-90.0, 90.0), normalize_lon(lon))
}
