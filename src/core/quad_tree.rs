//! Quad-tree inverse search over a per-pixel geolocation raster

use crate::core::factory::{INV_PIXEL_QUAD_TREE, INV_PIXEL_QUAD_TREE_INTERPOLATING};
use crate::core::geo_raster::GeoRaster;
use crate::core::geo_utils::{distance_sq, km_to_degrees, normalize_lon, unwrap_lon};
use crate::core::inverse::{ensure_uninitialized, sample_hit_to_pixel, InverseCoding};
use crate::core::sample_grid::{closer, SampleGrid};
use crate::types::{GeoPos, GeoResult, PixelPos};

/// Geographic extent of a node, longitudes in the unwrapped branch
#[derive(Debug, Clone, Copy)]
struct Extent {
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
}

impl Extent {
    fn empty() -> Self {
        Self {
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
        }
    }

    fn add(&mut self, lat: f64, lon: f64) {
        if lat.is_nan() || lon.is_nan() {
            return;
        }
        self.min_lat = self.min_lat.min(lat);
        self.max_lat = self.max_lat.max(lat);
        self.min_lon = self.min_lon.min(lon);
        self.max_lon = self.max_lon.max(lon);
    }

    fn merge(&mut self, other: &Extent) {
        self.min_lat = self.min_lat.min(other.min_lat);
        self.max_lat = self.max_lat.max(other.max_lat);
        self.min_lon = self.min_lon.min(other.min_lon);
        self.max_lon = self.max_lon.max(other.max_lon);
    }

    fn is_empty(&self) -> bool {
        self.min_lat > self.max_lat
    }

    /// Grow by `eps` degrees of arc, longitude scaled by the extent's highest latitude
    fn expand(&mut self, eps: f64) {
        if self.is_empty() {
            return;
        }
        let max_abs_lat = self.min_lat.abs().max(self.max_lat.abs()).min(90.0);
        let eps_lon = (eps / max_abs_lat.to_radians().cos().max(0.01)).min(360.0);
        self.min_lat -= eps;
        self.max_lat += eps;
        self.min_lon -= eps_lon;
        self.max_lon += eps_lon;
    }

    fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

/// Quad-tree node covering the inclusive sample ranges [x0, x1] x [y0, y1].
/// Siblings share their boundary row/column so every cell belongs to one leaf.
#[derive(Debug, Clone)]
struct Node {
    x0: usize,
    x1: usize,
    y0: usize,
    y1: usize,
    extent: Extent,
    /// Children in TL, TR, BL, BR order; empty for leaves
    children: Vec<usize>,
}

#[derive(Debug)]
struct QuadTree {
    grid: SampleGrid,
    nodes: Vec<Node>,
    /// Squared acceptance distance for the nearest sample, degrees²
    max_distance_sq: f64,
    /// Latitude beyond which queries fall back to an exhaustive search
    polar_lat: Option<f64>,
}

impl QuadTree {
    fn build(grid: SampleGrid, eps: f64, has_poles: bool) -> Self {
        let mut tree = Self {
            max_distance_sq: (2.0 * eps) * (2.0 * eps),
            polar_lat: has_poles.then(|| 90.0 - 2.0 * eps),
            nodes: Vec::new(),
            grid,
        };
        let (x1, y1) = (tree.grid.width - 1, tree.grid.height - 1);
        tree.build_node(0, x1, 0, y1, eps);
        tree
    }

    fn build_node(&mut self, x0: usize, x1: usize, y0: usize, y1: usize, eps: f64) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            x0,
            x1,
            y0,
            y1,
            extent: Extent::empty(),
            children: Vec::new(),
        });

        let mut extent = Extent::empty();
        if x1 - x0 <= 1 && y1 - y0 <= 1 {
            for y in y0..=y1 {
                for x in x0..=x1 {
                    let index = y * self.grid.width + x;
                    extent.add(self.grid.lat_at(index), self.grid.unwrapped_lon_at(index));
                }
            }
            extent.expand(eps);
        } else {
            let x_splits = split(x0, x1);
            let y_splits = split(y0, y1);
            let mut children = Vec::with_capacity(4);
            for &(cy0, cy1) in &y_splits {
                for &(cx0, cx1) in &x_splits {
                    let child = self.build_node(cx0, cx1, cy0, cy1, eps);
                    extent.merge(&self.nodes[child].extent);
                    children.push(child);
                }
            }
            self.nodes[id].children = children;
        }
        self.nodes[id].extent = extent;
        id
    }

    /// Nearest sample among the leaves whose extent contains the query
    fn search(&self, lat: f64, lon: f64) -> Option<(usize, f64)> {
        let lon_u = unwrap_lon(lon, self.grid.crosses_antimeridian);
        let mut best: Option<(usize, f64)> = None;
        let mut stack = vec![0usize];

        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            if !node.extent.contains(lat, lon_u) {
                continue;
            }
            if node.children.is_empty() {
                for y in node.y0..=node.y1 {
                    for x in node.x0..=node.x1 {
                        let index = y * self.grid.width + x;
                        let d = distance_sq(lat, lon, self.grid.lat_at(index), self.grid.lon_at(index));
                        if d.is_nan() {
                            continue;
                        }
                        best = Some(match best {
                            Some(current) => closer(current, (index, d)),
                            None => (index, d),
                        });
                    }
                }
            } else {
                // reversed so TL is visited first
                stack.extend(node.children.iter().rev());
            }
        }

        best.filter(|(_, d)| *d <= self.max_distance_sq)
    }

    fn find(&self, lat: f64, lon: f64) -> Option<usize> {
        let polar = self.polar_lat.map_or(false, |limit| lat.abs() >= limit);
        let hit = if polar { None } else { self.search(lat, lon) };
        match hit {
            Some((index, _)) => Some(index),
            None if self.polar_lat.is_some() => self
                .grid
                .nearest_sample_exhaustive(lat, lon)
                .filter(|(_, d)| *d <= self.max_distance_sq)
                .map(|(index, _)| index),
            None => None,
        }
    }
}

/// Split an inclusive range into one or two halves sharing the middle index
fn split(lo: usize, hi: usize) -> Vec<(usize, usize)> {
    if hi - lo <= 1 {
        vec![(lo, hi)]
    } else {
        let mid = lo + (hi - lo) / 2;
        vec![(lo, mid), (mid, hi)]
    }
}

/// Inverse coding backed by a quad-tree of sample extents
///
/// The non-interpolating variant answers with the center of the nearest
/// sample; the interpolating variant refines the hit inside the
/// surrounding cells.
#[derive(Debug)]
pub struct PixelQuadTreeInverse {
    interpolating: bool,
    tree: Option<QuadTree>,
}

impl PixelQuadTreeInverse {
    pub fn new(interpolating: bool) -> Self {
        Self {
            interpolating,
            tree: None,
        }
    }

    pub fn is_interpolating(&self) -> bool {
        self.interpolating
    }
}

impl InverseCoding for PixelQuadTreeInverse {
    fn initialize(
        &mut self,
        geo_raster: &GeoRaster,
        crosses_antimeridian: bool,
        pole_locations: &[PixelPos],
    ) -> GeoResult<()> {
        ensure_uninitialized(self.tree.is_some(), self.factory_key())?;
        let eps = km_to_degrees(geo_raster.require_resolution_km()?);
        let grid = SampleGrid::new(geo_raster, crosses_antimeridian);
        let tree = QuadTree::build(grid, eps, !pole_locations.is_empty());
        log::debug!(
            "Built quad-tree with {} nodes for {}x{} raster (eps={:.5}°, poles={})",
            tree.nodes.len(),
            geo_raster.raster_width(),
            geo_raster.raster_height(),
            eps,
            pole_locations.len()
        );
        self.tree = Some(tree);
        Ok(())
    }

    fn get_pixel_pos(&self, geo_pos: &GeoPos) -> PixelPos {
        let tree = match &self.tree {
            Some(tree) if geo_pos.is_valid() => tree,
            _ => return PixelPos::invalid(),
        };
        let lon = normalize_lon(geo_pos.lon);
        match tree.find(geo_pos.lat, lon) {
            Some(index) => sample_hit_to_pixel(&tree.grid, index, geo_pos.lat, lon, self.interpolating),
            None => PixelPos::invalid(),
        }
    }

    fn dispose(&mut self) {
        self.tree = None;
    }

    fn factory_key(&self) -> &str {
        if self.interpolating {
            INV_PIXEL_QUAD_TREE_INTERPOLATING
        } else {
            INV_PIXEL_QUAD_TREE
        }
    }

    fn is_initialized(&self) -> bool {
        self.tree.is_some()
    }
}
