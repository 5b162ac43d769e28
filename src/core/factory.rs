//! Registry mapping string keys to coding constructors

use crate::core::forward::{
    ForwardCoding, PixelForward, PixelInterpolatingForward, TiePointBilinearForward,
    TiePointSplineForward,
};
use crate::core::geo_index::PixelGeoIndexInverse;
use crate::core::inverse::{InverseCoding, TiePointInverse};
use crate::core::quad_tree::PixelQuadTreeInverse;
use crate::types::{GeoError, GeoResult};
use std::collections::HashMap;

pub const FWD_PIXEL: &str = "pixel";
pub const FWD_PIXEL_INTERPOLATING: &str = "pixel-interpolating";
pub const FWD_TIE_POINT_BILINEAR: &str = "tie-point-bilinear";
pub const FWD_TIE_POINT_SPLINE: &str = "tie-point-spline";

pub const INV_PIXEL_QUAD_TREE: &str = "quad-tree";
pub const INV_PIXEL_QUAD_TREE_INTERPOLATING: &str = "quad-tree-interpolating";
pub const INV_PIXEL_GEO_INDEX: &str = "geo-index";
pub const INV_PIXEL_GEO_INDEX_INTERPOLATING: &str = "geo-index-interpolating";
pub const INV_TIE_POINT: &str = "tie-point";

type ForwardCtor = Box<dyn Fn() -> Box<dyn ForwardCoding> + Send + Sync>;
type InverseCtor = Box<dyn Fn() -> Box<dyn InverseCoding> + Send + Sync>;

/// Explicit registry of forward and inverse coding constructors
///
/// Every lookup builds a fresh, uninitialized instance. Unknown keys fail
/// with [`GeoError::UnknownComponent`]; there is no fallback.
pub struct ComponentFactory {
    forward: HashMap<String, ForwardCtor>,
    inverse: HashMap<String, InverseCtor>,
}

impl std::fmt::Debug for ComponentFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentFactory")
            .field("forward", &self.forward_keys())
            .field("inverse", &self.inverse_keys())
            .finish()
    }
}

impl Default for ComponentFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ComponentFactory {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            forward: HashMap::new(),
            inverse: HashMap::new(),
        }
    }

    /// Registry holding all built-in codings
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register_forward(FWD_PIXEL, || Box::new(PixelForward::new()));
        factory.register_forward(FWD_PIXEL_INTERPOLATING, || {
            Box::new(PixelInterpolatingForward::new())
        });
        factory.register_forward(FWD_TIE_POINT_BILINEAR, || {
            Box::new(TiePointBilinearForward::new())
        });
        factory.register_forward(FWD_TIE_POINT_SPLINE, || Box::new(TiePointSplineForward::new()));

        factory.register_inverse(INV_PIXEL_QUAD_TREE, || Box::new(PixelQuadTreeInverse::new(false)));
        factory.register_inverse(INV_PIXEL_QUAD_TREE_INTERPOLATING, || {
            Box::new(PixelQuadTreeInverse::new(true))
        });
        factory.register_inverse(INV_PIXEL_GEO_INDEX, || Box::new(PixelGeoIndexInverse::new(false)));
        factory.register_inverse(INV_PIXEL_GEO_INDEX_INTERPOLATING, || {
            Box::new(PixelGeoIndexInverse::new(true))
        });
        factory.register_inverse(INV_TIE_POINT, || Box::new(TiePointInverse::new()));
        factory
    }

    /// Register (or replace) a forward coding constructor
    pub fn register_forward<F>(&mut self, key: &str, ctor: F)
    where
        F: Fn() -> Box<dyn ForwardCoding> + Send + Sync + 'static,
    {
        if self.forward.insert(key.to_string(), Box::new(ctor)).is_some() {
            log::warn!("Replacing forward coding registered under '{}'", key);
        }
    }

    /// Register (or replace) an inverse coding constructor
    pub fn register_inverse<F>(&mut self, key: &str, ctor: F)
    where
        F: Fn() -> Box<dyn InverseCoding> + Send + Sync + 'static,
    {
        if self.inverse.insert(key.to_string(), Box::new(ctor)).is_some() {
            log::warn!("Replacing inverse coding registered under '{}'", key);
        }
    }

    pub fn get_forward(&self, key: &str) -> GeoResult<Box<dyn ForwardCoding>> {
        match self.forward.get(key) {
            Some(ctor) => Ok(ctor()),
            None => Err(GeoError::UnknownComponent(format!(
                "No forward coding registered for key '{}' (known: {})",
                key,
                self.forward_keys().join(", ")
            ))),
        }
    }

    pub fn get_inverse(&self, key: &str) -> GeoResult<Box<dyn InverseCoding>> {
        match self.inverse.get(key) {
            Some(ctor) => Ok(ctor()),
            None => Err(GeoError::UnknownComponent(format!(
                "No inverse coding registered for key '{}' (known: {})",
                key,
                self.inverse_keys().join(", ")
            ))),
        }
    }

    /// Registered forward keys, sorted
    pub fn forward_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.forward.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Registered inverse keys, sorted
    pub fn inverse_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.inverse.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}
