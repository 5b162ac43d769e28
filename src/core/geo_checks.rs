//! Anti-meridian and pole detection run before codings are initialized

use crate::core::geo_raster::GeoRaster;
use crate::core::geo_utils::lon_delta;
use crate::types::{GeoChecks, PixelPos};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Latitude from which a sample is considered to sit on a pole
const POLE_LAT: f64 = 90.0 - 1e-9;

/// Outcome of the boundary checks for one raster
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoCheckResult {
    pub crosses_antimeridian: bool,
    /// Pixel positions of the samples closest to each enclosed pole
    pub pole_locations: Vec<PixelPos>,
}

/// Run the checks selected by `geo_checks` against the raster
pub fn run_geo_checks(geo_raster: &GeoRaster, geo_checks: GeoChecks) -> GeoCheckResult {
    let result = match geo_checks {
        GeoChecks::None => GeoCheckResult::default(),
        GeoChecks::Antimeridian => GeoCheckResult {
            crosses_antimeridian: contains_antimeridian(geo_raster),
            pole_locations: Vec::new(),
        },
        GeoChecks::Poles => GeoCheckResult {
            crosses_antimeridian: contains_antimeridian(geo_raster),
            pole_locations: find_pole_locations(geo_raster),
        },
    };
    log::info!(
        "Geo checks {}: antimeridian={}, poles={}",
        geo_checks,
        result.crosses_antimeridian,
        result.pole_locations.len()
    );
    result
}

#[inline]
fn jumps(a: f64, b: f64) -> bool {
    (a - b).abs() > 180.0
}

/// True when two neighbouring samples are more than 180° of longitude apart
pub fn contains_antimeridian(geo_raster: &GeoRaster) -> bool {
    let w = geo_raster.raster_width();
    let h = geo_raster.raster_height();
    let lons = geo_raster.longitudes();

    // the boundary catches most swaths cheaply
    let ring = boundary_ring(w, h);
    if ring.windows(2).any(|pair| jumps(lons[pair[0]], lons[pair[1]])) {
        return true;
    }

    let row_crosses = |y: usize| {
        let row = &lons[y * w..(y + 1) * w];
        if row.windows(2).any(|pair| jumps(pair[0], pair[1])) {
            return true;
        }
        y + 1 < h && (0..w).any(|x| jumps(row[x], lons[(y + 1) * w + x]))
    };

    #[cfg(feature = "parallel")]
    let crosses = (0..h).into_par_iter().any(row_crosses);

    #[cfg(not(feature = "parallel"))]
    let crosses = (0..h).any(row_crosses);

    crosses
}

/// Find the poles enclosed by the raster
///
/// A pole is enclosed when the longitude winds a full turn along the
/// raster boundary. Its location is the sample with the extreme latitude
/// on the winning hemisphere. Samples sitting exactly on a pole are added
/// as well.
pub fn find_pole_locations(geo_raster: &GeoRaster) -> Vec<PixelPos> {
    let w = geo_raster.raster_width();
    let h = geo_raster.raster_height();
    let lons = geo_raster.longitudes();
    let lats = geo_raster.latitudes();
    let mut locations: Vec<PixelPos> = Vec::new();

    let mut push = |index: usize| {
        let pos = geo_raster.sample_pixel_pos((index % w) as f64, (index / w) as f64);
        if !locations.contains(&pos) {
            locations.push(pos);
        }
    };

    if w >= 2 && h >= 2 {
        let ring = boundary_ring(w, h);
        let winding: f64 = ring
            .windows(2)
            .filter(|pair| !lons[pair[0]].is_nan() && !lons[pair[1]].is_nan())
            .map(|pair| lon_delta(lons[pair[1]], lons[pair[0]]))
            .sum();

        if winding.abs() > 180.0 {
            let extreme = lats
                .iter()
                .enumerate()
                .filter(|(_, lat)| !lat.is_nan())
                .fold(None::<(usize, f64)>, |best, (i, &lat)| match best {
                    Some((_, b)) if b.abs() >= lat.abs() => best,
                    _ => Some((i, lat)),
                });
            if let Some((index, lat)) = extreme {
                log::debug!(
                    "Longitude winds {:.1}° around the boundary, {} pole enclosed",
                    winding,
                    if lat >= 0.0 { "north" } else { "south" }
                );
                push(index);
            }
        }
    }

    for (index, lat) in lats.iter().enumerate() {
        if lat.abs() >= POLE_LAT {
            push(index);
        }
    }

    locations
}

/// Sample indices along the raster boundary, clockwise from the top-left
/// corner and closed (the first index is repeated at the end)
fn boundary_ring(w: usize, h: usize) -> Vec<usize> {
    if w == 0 || h == 0 {
        return Vec::new();
    }
    if h == 1 {
        return (0..w).collect();
    }
    if w == 1 {
        return (0..h).collect();
    }
    let mut ring = Vec::with_capacity(2 * (w + h));
    ring.extend(0..w);
    ring.extend((1..h).map(|y| y * w + w - 1));
    ring.extend((0..w - 1).rev().map(|x| (h - 1) * w + x));
    ring.extend((0..h - 1).rev().map(|y| y * w));
    ring
}
