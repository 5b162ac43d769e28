//! Geographic -> pixel coordinate strategies

use crate::core::factory::INV_TIE_POINT;
use crate::core::forward::Interpolation;
use crate::core::geo_raster::GeoRaster;
use crate::core::geo_utils::{distance_sq, lon_delta, normalize_lon};
use crate::core::sample_grid::{closer, SampleGrid};
use crate::types::{GeoError, GeoPos, GeoResult, PixelPos};

/// Converts geographic positions into scene pixel positions
///
/// "Not found" is never an error: `get_pixel_pos` answers with
/// [`PixelPos::invalid`] when the position is outside the raster, when the
/// coding is not initialized, or after `dispose`.
pub trait InverseCoding: Send + Sync + std::fmt::Debug {
    fn initialize(
        &mut self,
        geo_raster: &GeoRaster,
        crosses_antimeridian: bool,
        pole_locations: &[PixelPos],
    ) -> GeoResult<()>;

    fn get_pixel_pos(&self, geo_pos: &GeoPos) -> PixelPos;

    /// Called before `initialize` with the kernel of the paired forward coding
    fn use_forward_interpolation(&mut self, _interpolation: Interpolation) {}

    fn dispose(&mut self);

    /// Key under which the coding is registered in the component factory
    fn factory_key(&self) -> &str;

    fn is_initialized(&self) -> bool;
}

const MAX_NEWTON_ITERATIONS: usize = 20;
const NEWTON_STEP_EPS_SQ: f64 = 1e-24;
/// Accepted geographic residual of a Newton solution, degrees
const RESIDUAL_EPS: f64 = 1e-6;
/// Largest distance (in cell units) a refined position may lie outside its cell
const MAX_CELL_OVERSHOOT: f64 = 0.5;
/// Central difference step for spline derivatives, grid units
const SPLINE_DERIVATIVE_STEP: f64 = 1e-4;

pub(crate) fn ensure_uninitialized(initialized: bool, key: &str) -> GeoResult<()> {
    if initialized {
        return Err(GeoError::InvalidState(format!(
            "Inverse coding '{}' is already initialized",
            key
        )));
    }
    Ok(())
}

/// Solve the bilinear patch of cell (cx, cy) for the local (u, v) hitting (lat, lon)
fn solve_in_cell(grid: &SampleGrid, cx: usize, cy: usize, lat: f64, lon: f64) -> Option<(f64, f64)> {
    let (mut u, mut v) = (0.5, 0.5);
    for _ in 0..MAX_NEWTON_ITERATIONS {
        let s = grid.eval_cell(cx, cy, u, v);
        let r_lat = lat - s.lat;
        let r_lon = lon_delta(lon, s.lon);
        let det = s.dlon_dx * s.dlat_dy - s.dlon_dy * s.dlat_dx;
        if det.abs() < 1e-300 || !det.is_finite() {
            return None;
        }
        let du = (r_lon * s.dlat_dy - s.dlon_dy * r_lat) / det;
        let dv = (s.dlon_dx * r_lat - r_lon * s.dlat_dx) / det;
        u += du;
        v += dv;
        if du * du + dv * dv < NEWTON_STEP_EPS_SQ {
            break;
        }
    }
    let s = grid.eval_cell(cx, cy, u, v);
    if (lat - s.lat).abs() > RESIDUAL_EPS || lon_delta(lon, s.lon).abs() > RESIDUAL_EPS {
        return None;
    }
    Some((u, v))
}

#[inline]
fn overshoot(t: f64) -> f64 {
    if t < 0.0 {
        -t
    } else if t > 1.0 {
        t - 1.0
    } else {
        0.0
    }
}

/// Refine a nearest-sample hit to a fractional grid position using the
/// (up to four) cells sharing the sample. Cells are tried in row-major
/// order; the first cell containing the position wins.
pub(crate) fn refine_around_sample(
    grid: &SampleGrid,
    x: usize,
    y: usize,
    lat: f64,
    lon: f64,
) -> Option<(f64, f64)> {
    if grid.width < 2 || grid.height < 2 {
        return None;
    }
    let max_cx = grid.width - 2;
    let max_cy = grid.height - 2;
    let mut best: Option<(f64, f64, f64)> = None;

    for cy in y.saturating_sub(1)..=y.min(max_cy) {
        for cx in x.saturating_sub(1)..=x.min(max_cx) {
            if let Some((u, v)) = solve_in_cell(grid, cx, cy, lat, lon) {
                let outside = overshoot(u).max(overshoot(v));
                let fx = cx as f64 + u;
                let fy = cy as f64 + v;
                if best.map_or(true, |(_, _, o)| outside < o) {
                    best = Some((fx, fy, outside));
                }
                if outside == 0.0 {
                    return Some((fx, fy));
                }
            }
        }
    }

    best.filter(|(_, _, o)| *o <= MAX_CELL_OVERSHOOT)
        .map(|(fx, fy, _)| (fx, fy))
}

/// Turn a nearest-sample hit into a pixel position, optionally refined
pub(crate) fn sample_hit_to_pixel(
    grid: &SampleGrid,
    index: usize,
    lat: f64,
    lon: f64,
    interpolating: bool,
) -> PixelPos {
    let x = index % grid.width;
    let y = index / grid.width;
    if interpolating {
        if let Some((fx, fy)) = refine_around_sample(grid, x, y, lat, lon) {
            let refined = grid.pixel_pos(fx, fy);
            if grid.contains_pixel(&refined) {
                return refined;
            }
        }
    }
    grid.pixel_pos(x as f64, y as f64)
}

/// Newton iteration on the spline surface from a nearby grid position,
/// derivatives by central differences
fn polish_on_spline(grid: &SampleGrid, lat: f64, lon: f64, start: (f64, f64)) -> Option<(f64, f64)> {
    let (mut fx, mut fy) = start;
    let (max_fx, max_fy) = (grid.width as f64, grid.height as f64);
    let h = SPLINE_DERIVATIVE_STEP;

    for _ in 0..MAX_NEWTON_ITERATIONS {
        let g = grid.interpolate_spline(fx, fy);
        let r_lat = lat - g.lat;
        let r_lon = lon_delta(lon, g.lon);

        let east = grid.interpolate_spline(fx + h, fy);
        let west = grid.interpolate_spline(fx - h, fy);
        let south = grid.interpolate_spline(fx, fy + h);
        let north = grid.interpolate_spline(fx, fy - h);
        let dlat_dx = (east.lat - west.lat) / (2.0 * h);
        let dlon_dx = lon_delta(east.lon, west.lon) / (2.0 * h);
        let dlat_dy = (south.lat - north.lat) / (2.0 * h);
        let dlon_dy = lon_delta(south.lon, north.lon) / (2.0 * h);

        let det = dlon_dx * dlat_dy - dlon_dy * dlat_dx;
        if det.abs() < 1e-300 || !det.is_finite() {
            return None;
        }
        let dx = (r_lon * dlat_dy - dlon_dy * r_lat) / det;
        let dy = (dlon_dx * r_lat - r_lon * dlat_dx) / det;
        fx = (fx + dx).clamp(-1.0, max_fx);
        fy = (fy + dy).clamp(-1.0, max_fy);
        if dx * dx + dy * dy < NEWTON_STEP_EPS_SQ {
            break;
        }
    }

    let g = grid.interpolate_spline(fx, fy);
    if (lat - g.lat).abs() > RESIDUAL_EPS || lon_delta(lon, g.lon).abs() > RESIDUAL_EPS {
        return None;
    }
    Some((fx, fy))
}

/// Inverse of the tie-point interpolation, found by Newton iteration on the
/// piecewise-bilinear tie-point surface, seeded at the nearest tie point
///
/// Paired with a spline forward coding the bilinear solution is refined on
/// the spline surface.
#[derive(Debug, Default)]
pub struct TiePointInverse {
    grid: Option<SampleGrid>,
    spline: bool,
}

impl TiePointInverse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refines_on_spline(&self) -> bool {
        self.spline
    }

    fn nearest_tie_point(grid: &SampleGrid, lat: f64, lon: f64) -> Option<usize> {
        (0..grid.len())
            .map(|i| (i, distance_sq(lat, lon, grid.lat_at(i), grid.lon_at(i))))
            .filter(|(_, d)| !d.is_nan())
            .reduce(closer)
            .map(|(i, _)| i)
    }
}

impl InverseCoding for TiePointInverse {
    fn initialize(
        &mut self,
        geo_raster: &GeoRaster,
        crosses_antimeridian: bool,
        _pole_locations: &[PixelPos],
    ) -> GeoResult<()> {
        ensure_uninitialized(self.grid.is_some(), INV_TIE_POINT)?;
        if geo_raster.raster_width() < 2 || geo_raster.raster_height() < 2 {
            return Err(GeoError::InvalidRaster(format!(
                "Tie-point inverse needs at least 2x2 tie points, got {}x{}",
                geo_raster.raster_width(),
                geo_raster.raster_height()
            )));
        }
        log::debug!(
            "Initializing tie-point inverse on {}x{} grid (antimeridian={})",
            geo_raster.raster_width(),
            geo_raster.raster_height(),
            crosses_antimeridian
        );
        self.grid = Some(SampleGrid::new(geo_raster, crosses_antimeridian));
        Ok(())
    }

    fn get_pixel_pos(&self, geo_pos: &GeoPos) -> PixelPos {
        let grid = match &self.grid {
            Some(grid) if geo_pos.is_valid() => grid,
            _ => return PixelPos::invalid(),
        };
        let lat = geo_pos.lat;
        let lon = normalize_lon(geo_pos.lon);

        let seed = match Self::nearest_tie_point(grid, lat, lon) {
            Some(index) => index,
            None => return PixelPos::invalid(),
        };
        let mut fx = (seed % grid.width) as f64;
        let mut fy = (seed / grid.width) as f64;
        let (max_fx, max_fy) = (grid.width as f64, grid.height as f64);

        for _ in 0..MAX_NEWTON_ITERATIONS {
            let s = grid.sample_bilinear(fx, fy);
            let r_lat = lat - s.lat;
            let r_lon = lon_delta(lon, s.lon);
            let det = s.dlon_dx * s.dlat_dy - s.dlon_dy * s.dlat_dx;
            if det.abs() < 1e-300 || !det.is_finite() {
                return PixelPos::invalid();
            }
            let dx = (r_lon * s.dlat_dy - s.dlon_dy * r_lat) / det;
            let dy = (s.dlon_dx * r_lat - r_lon * s.dlat_dx) / det;
            fx = (fx + dx).clamp(-1.0, max_fx);
            fy = (fy + dy).clamp(-1.0, max_fy);
            if dx * dx + dy * dy < NEWTON_STEP_EPS_SQ {
                break;
            }
        }

        let s = grid.sample_bilinear(fx, fy);
        if (lat - s.lat).abs() > RESIDUAL_EPS || lon_delta(lon, s.lon).abs() > RESIDUAL_EPS {
            return PixelPos::invalid();
        }
        if self.spline {
            match polish_on_spline(grid, lat, lon, (fx, fy)) {
                Some((x, y)) => {
                    fx = x;
                    fy = y;
                }
                None => return PixelPos::invalid(),
            }
        }
        let pixel_pos = grid.pixel_pos(fx, fy);
        if grid.contains_pixel(&pixel_pos) {
            pixel_pos
        } else {
            PixelPos::invalid()
        }
    }

    fn use_forward_interpolation(&mut self, interpolation: Interpolation) {
        self.spline = interpolation == Interpolation::Spline;
    }

    fn dispose(&mut self) {
        self.grid = None;
    }

    fn factory_key(&self) -> &str {
        INV_TIE_POINT
    }

    fn is_initialized(&self) -> bool {
        self.grid.is_some()
    }
}
