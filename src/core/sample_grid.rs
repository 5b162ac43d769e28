//! Read-only view on the coordinate arrays of a [`GeoRaster`], with the
//! interpolation kernels shared by the forward and inverse codings.

use crate::core::geo_raster::GeoRaster;
use crate::core::geo_utils::{align_lon, distance_sq, normalize_lon, unwrap_lon};
use crate::types::{GeoPos, PixelPos};
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Value and partial derivatives of a bilinear cell evaluation
#[derive(Debug, Clone, Copy)]
pub(crate) struct CellSample {
    pub lat: f64,
    /// Longitude on the branch of the cell's first corner, not normalized
    pub lon: f64,
    pub dlat_dx: f64,
    pub dlat_dy: f64,
    pub dlon_dx: f64,
    pub dlon_dy: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct SampleGrid {
    lons: Arc<[f64]>,
    lats: Arc<[f64]>,
    pub width: usize,
    pub height: usize,
    pub scene_width: usize,
    pub scene_height: usize,
    offset_x: f64,
    offset_y: f64,
    subsampling_x: f64,
    subsampling_y: f64,
    pub crosses_antimeridian: bool,
}

impl SampleGrid {
    pub fn new(geo_raster: &GeoRaster, crosses_antimeridian: bool) -> Self {
        Self {
            lons: geo_raster.shared_longitudes(),
            lats: geo_raster.shared_latitudes(),
            width: geo_raster.raster_width(),
            height: geo_raster.raster_height(),
            scene_width: geo_raster.scene_width(),
            scene_height: geo_raster.scene_height(),
            offset_x: geo_raster.offset_x(),
            offset_y: geo_raster.offset_y(),
            subsampling_x: geo_raster.subsampling_x(),
            subsampling_y: geo_raster.subsampling_y(),
            crosses_antimeridian,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.lons.len()
    }

    #[inline]
    pub fn lat(&self, x: usize, y: usize) -> f64 {
        self.lats[y * self.width + x]
    }

    #[inline]
    pub fn lon(&self, x: usize, y: usize) -> f64 {
        self.lons[y * self.width + x]
    }

    #[inline]
    pub fn lat_at(&self, index: usize) -> f64 {
        self.lats[index]
    }

    #[inline]
    pub fn lon_at(&self, index: usize) -> f64 {
        self.lons[index]
    }

    /// Longitude in the continuous branch used for bounding-box tests
    #[inline]
    pub fn unwrapped_lon_at(&self, index: usize) -> f64 {
        unwrap_lon(self.lons[index], self.crosses_antimeridian)
    }

    pub fn grid_coords(&self, pixel_pos: &PixelPos) -> (f64, f64) {
        (
            (pixel_pos.x - self.offset_x) / self.subsampling_x,
            (pixel_pos.y - self.offset_y) / self.subsampling_y,
        )
    }

    pub fn pixel_pos(&self, fx: f64, fy: f64) -> PixelPos {
        PixelPos::new(
            self.offset_x + fx * self.subsampling_x,
            self.offset_y + fy * self.subsampling_y,
        )
    }

    pub fn contains_pixel(&self, pixel_pos: &PixelPos) -> bool {
        pixel_pos.is_valid()
            && pixel_pos.x >= 0.0
            && pixel_pos.y >= 0.0
            && pixel_pos.x <= self.scene_width as f64
            && pixel_pos.y <= self.scene_height as f64
    }

    fn finish(&self, lat: f64, lon: f64) -> GeoPos {
        let lon = if self.crosses_antimeridian {
            normalize_lon(lon)
        } else {
            lon
        };
        GeoPos::new(lat.clamp(-90.0, 90.0), lon)
    }

    /// Sample closest to the fractional grid position, clamped to the raster
    pub fn nearest(&self, fx: f64, fy: f64) -> GeoPos {
        let x = (fx.round() as isize).clamp(0, self.width as isize - 1) as usize;
        let y = (fy.round() as isize).clamp(0, self.height as isize - 1) as usize;
        GeoPos::new(self.lat(x, y), self.lon(x, y))
    }

    /// Evaluate the bilinear patch of cell (cx, cy) at local coordinates (u, v);
    /// u and v may leave [0, 1] for extrapolation
    pub fn eval_cell(&self, cx: usize, cy: usize, u: f64, v: f64) -> CellSample {
        let cx1 = (cx + 1).min(self.width - 1);
        let cy1 = (cy + 1).min(self.height - 1);

        let lat00 = self.lat(cx, cy);
        let lat10 = self.lat(cx1, cy);
        let lat01 = self.lat(cx, cy1);
        let lat11 = self.lat(cx1, cy1);

        let lon00 = self.lon(cx, cy);
        let (lon10, lon01, lon11) = if self.crosses_antimeridian {
            (
                align_lon(self.lon(cx1, cy), lon00),
                align_lon(self.lon(cx, cy1), lon00),
                align_lon(self.lon(cx1, cy1), lon00),
            )
        } else {
            (self.lon(cx1, cy), self.lon(cx, cy1), self.lon(cx1, cy1))
        };

        CellSample {
            lat: bilinear(lat00, lat10, lat01, lat11, u, v),
            lon: bilinear(lon00, lon10, lon01, lon11, u, v),
            dlat_dx: (1.0 - v) * (lat10 - lat00) + v * (lat11 - lat01),
            dlat_dy: (1.0 - u) * (lat01 - lat00) + u * (lat11 - lat10),
            dlon_dx: (1.0 - v) * (lon10 - lon00) + v * (lon11 - lon01),
            dlon_dy: (1.0 - u) * (lon01 - lon00) + u * (lon11 - lon10),
        }
    }

    /// Bilinear interpolation at fractional grid coordinates; edge cells extrapolate
    pub fn interpolate_bilinear(&self, fx: f64, fy: f64) -> GeoPos {
        let (cx, u) = cell_of(fx, self.width);
        let (cy, v) = cell_of(fy, self.height);
        let s = self.eval_cell(cx, cy, u, v);
        self.finish(s.lat, s.lon)
    }

    /// Same as [`interpolate_bilinear`](Self::interpolate_bilinear) but also
    /// returns the derivatives with respect to the grid coordinates
    pub fn sample_bilinear(&self, fx: f64, fy: f64) -> CellSample {
        let (cx, u) = cell_of(fx, self.width);
        let (cy, v) = cell_of(fy, self.height);
        self.eval_cell(cx, cy, u, v)
    }

    /// Catmull-Rom interpolation over the 4x4 neighbourhood; falls back to
    /// bilinear where the neighbourhood leaves the grid
    pub fn interpolate_spline(&self, fx: f64, fy: f64) -> GeoPos {
        let x = fx.floor() as isize;
        let y = fy.floor() as isize;
        if x < 1 || y < 1 || x + 2 > self.width as isize - 1 || y + 2 > self.height as isize - 1 {
            return self.interpolate_bilinear(fx, fy);
        }
        let (x, y) = (x as usize, y as usize);
        let tx = fx - x as f64;
        let ty = fy - y as f64;
        let reference = self.lon(x, y);

        let mut lat_rows = [0.0; 4];
        let mut lon_rows = [0.0; 4];
        for (r, row) in (y - 1..=y + 2).enumerate() {
            let mut lat_col = [0.0; 4];
            let mut lon_col = [0.0; 4];
            for (c, col) in (x - 1..=x + 2).enumerate() {
                lat_col[c] = self.lat(col, row);
                lon_col[c] = if self.crosses_antimeridian {
                    align_lon(self.lon(col, row), reference)
                } else {
                    self.lon(col, row)
                };
            }
            lat_rows[r] = catmull_rom(&lat_col, tx);
            lon_rows[r] = catmull_rom(&lon_col, tx);
        }

        self.finish(catmull_rom(&lat_rows, ty), catmull_rom(&lon_rows, ty))
    }

    /// Brute-force nearest sample; ties go to the lower sample index
    pub fn nearest_sample_exhaustive(&self, lat: f64, lon: f64) -> Option<(usize, f64)> {
        let candidate = |index: usize| (index, distance_sq(lat, lon, self.lats[index], self.lons[index]));

        #[cfg(feature = "parallel")]
        let best = (0..self.len())
            .into_par_iter()
            .map(candidate)
            .filter(|(_, d)| !d.is_nan())
            .reduce_with(closer);

        #[cfg(not(feature = "parallel"))]
        let best = (0..self.len())
            .map(candidate)
            .filter(|(_, d)| !d.is_nan())
            .reduce(closer);

        best
    }
}

/// Pick the closer of two (index, distance²) candidates, lower index on ties
#[inline]
pub(crate) fn closer(a: (usize, f64), b: (usize, f64)) -> (usize, f64) {
    if b.1 < a.1 || (b.1 == a.1 && b.0 < a.0) {
        b
    } else {
        a
    }
}

/// Cell index and local coordinate for a fractional grid coordinate
#[inline]
pub(crate) fn cell_of(f: f64, size: usize) -> (usize, f64) {
    if size < 2 {
        return (0, 0.0);
    }
    let i = (f.floor() as isize).clamp(0, size as isize - 2) as usize;
    (i, f - i as f64)
}

#[inline]
fn bilinear(v00: f64, v10: f64, v01: f64, v11: f64, u: f64, v: f64) -> f64 {
    (1.0 - v) * ((1.0 - u) * v00 + u * v10) + v * ((1.0 - u) * v01 + u * v11)
}

#[inline]
fn catmull_rom(p: &[f64; 4], t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * (2.0 * p[1]
        + (p[2] - p[0]) * t
        + (2.0 * p[0] - 5.0 * p[1] + 4.0 * p[2] - p[3]) * t2
        + (3.0 * p[1] - p[0] - 3.0 * p[2] + p[3]) * t3)
}
