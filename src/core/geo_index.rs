//! Binned geographic index over all raster samples

use crate::core::factory::{INV_PIXEL_GEO_INDEX, INV_PIXEL_GEO_INDEX_INTERPOLATING};
use crate::core::geo_raster::GeoRaster;
use crate::core::geo_utils::{distance_sq, km_to_degrees, normalize_lon, unwrap_lon};
use crate::core::inverse::{ensure_uninitialized, sample_hit_to_pixel, InverseCoding};
use crate::core::sample_grid::{closer, SampleGrid};
use crate::types::{GeoPos, GeoResult, PixelPos};
use std::collections::HashMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

type BinKey = (i64, i64);

#[derive(Debug)]
struct GeoIndex {
    grid: SampleGrid,
    bins: HashMap<BinKey, Vec<u32>>,
    bin_size: f64,
    search_radius: f64,
    polar_lat: Option<f64>,
}

impl GeoIndex {
    fn build(grid: SampleGrid, resolution_deg: f64, has_poles: bool) -> Self {
        let bin_size = resolution_deg;
        let key_of = |index: usize| -> Option<(BinKey, u32)> {
            let lat = grid.lat_at(index);
            let lon = grid.unwrapped_lon_at(index);
            if lat.is_nan() || lon.is_nan() {
                return None;
            }
            Some((bin_key(lat, lon, bin_size), index as u32))
        };

        #[cfg(feature = "parallel")]
        let keyed: Vec<(BinKey, u32)> = (0..grid.len()).into_par_iter().filter_map(key_of).collect();

        #[cfg(not(feature = "parallel"))]
        let keyed: Vec<(BinKey, u32)> = (0..grid.len()).filter_map(key_of).collect();

        // insertion in ascending sample order keeps every bin sorted
        let mut bins: HashMap<BinKey, Vec<u32>> = HashMap::new();
        for (key, index) in keyed {
            bins.entry(key).or_default().push(index);
        }

        Self {
            grid,
            bins,
            bin_size,
            search_radius: 2.0 * resolution_deg,
            polar_lat: has_poles.then(|| 90.0 - 2.0 * resolution_deg),
        }
    }

    fn max_distance_sq(&self) -> f64 {
        self.search_radius * self.search_radius
    }

    fn search(&self, lat: f64, lon: f64) -> Option<(usize, f64)> {
        let lon_u = unwrap_lon(lon, self.grid.crosses_antimeridian);
        let r = self.search_radius;
        let r_lon = r / lat.to_radians().cos().abs().max(0.01);
        if r_lon >= 180.0 {
            return self.grid.nearest_sample_exhaustive(lat, lon);
        }

        let (lat_lo, lon_lo) = bin_key(lat - r, lon_u - r_lon, self.bin_size);
        let (lat_hi, lon_hi) = bin_key(lat + r, lon_u + r_lon, self.bin_size);

        let mut best: Option<(usize, f64)> = None;
        for bin_lat in lat_lo..=lat_hi {
            for bin_lon in lon_lo..=lon_hi {
                let Some(members) = self.bins.get(&(bin_lat, bin_lon)) else {
                    continue;
                };
                for &index in members {
                    let index = index as usize;
                    let d = distance_sq(lat, lon, self.grid.lat_at(index), self.grid.lon_at(index));
                    best = Some(match best {
                        Some(current) => closer(current, (index, d)),
                        None => (index, d),
                    });
                }
            }
        }
        best
    }

    fn find(&self, lat: f64, lon: f64) -> Option<usize> {
        let polar = self.polar_lat.map_or(false, |limit| lat.abs() >= limit);
        let hit = if polar {
            self.grid.nearest_sample_exhaustive(lat, lon)
        } else {
            self.search(lat, lon)
        };
        let hit = match hit {
            None if self.polar_lat.is_some() => self.grid.nearest_sample_exhaustive(lat, lon),
            other => other,
        };
        hit.filter(|(_, d)| *d <= self.max_distance_sq())
            .map(|(index, _)| index)
    }
}

#[inline]
fn bin_key(lat: f64, lon: f64, bin_size: f64) -> BinKey {
    ((lat / bin_size).floor() as i64, (lon / bin_size).floor() as i64)
}

/// Inverse coding backed by a lat/lon binned index of every sample
///
/// The raster resolution sets both the bin size and the search radius
/// (twice the resolution); the nearest sample within that radius wins.
#[derive(Debug)]
pub struct PixelGeoIndexInverse {
    interpolating: bool,
    index: Option<GeoIndex>,
}

impl PixelGeoIndexInverse {
    pub fn new(interpolating: bool) -> Self {
        Self {
            interpolating,
            index: None,
        }
    }

    pub fn is_interpolating(&self) -> bool {
        self.interpolating
    }
}

impl InverseCoding for PixelGeoIndexInverse {
    fn initialize(
        &mut self,
        geo_raster: &GeoRaster,
        crosses_antimeridian: bool,
        pole_locations: &[PixelPos],
    ) -> GeoResult<()> {
        ensure_uninitialized(self.index.is_some(), self.factory_key())?;
        let resolution_deg = km_to_degrees(geo_raster.require_resolution_km()?);
        let grid = SampleGrid::new(geo_raster, crosses_antimeridian);
        let index = GeoIndex::build(grid, resolution_deg, !pole_locations.is_empty());
        log::debug!(
            "Built geo-index with {} bins for {} samples (bin={:.5}°)",
            index.bins.len(),
            index.grid.len(),
            resolution_deg
        );
        self.index = Some(index);
        Ok(())
    }

    fn get_pixel_pos(&self, geo_pos: &GeoPos) -> PixelPos {
        let index = match &self.index {
            Some(index) if geo_pos.is_valid() => index,
            _ => return PixelPos::invalid(),
        };
        let lon = normalize_lon(geo_pos.lon);
        match index.find(geo_pos.lat, lon) {
            Some(hit) => sample_hit_to_pixel(&index.grid, hit, geo_pos.lat, lon, self.interpolating),
            None => PixelPos::invalid(),
        }
    }

    fn dispose(&mut self) {
        self.index = None;
    }

    fn factory_key(&self) -> &str {
        if self.interpolating {
            INV_PIXEL_GEO_INDEX_INTERPOLATING
        } else {
            INV_PIXEL_GEO_INDEX
        }
    }

    fn is_initialized(&self) -> bool {
        self.index.is_some()
    }
}
