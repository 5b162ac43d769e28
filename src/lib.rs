//! geocore: pixel <-> geographic coordinate transforms for satellite rasters
//!
//! Interchangeable forward and inverse coding strategies (per-pixel and
//! tie-point interpolation, quad-tree and geo-index search), anti-meridian
//! and pole detection, and terrain orthorectification on top of any
//! geocoding.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, GeoChecks, GeoError, GeoPos, GeoResult, GeoTransform, GeographicCrs, ImageCrs,
    PixelPos,
};

pub use crate::core::{
    ComponentFactory, ComponentGeoCoding, GeoCoding, GeoCodingConfig, GeoRaster, Orthorectifier,
    PolarOrthorectifier, SubsetDef,
};
pub use io::{ConfigReader, ElevationModel, GridElevationModel};

#[cfg(feature = "python")]
mod python {
    use super::*;
    use numpy::PyReadonlyArray2;
    use pyo3::prelude::*;

    fn to_py_err(e: GeoError) -> PyErr {
        match e {
            GeoError::UnknownComponent(_) | GeoError::Configuration(_) | GeoError::InvalidRaster(_) => {
                PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
            }
            _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e)),
        }
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_class::<PyGeoCoding>()?;
        Ok(())
    }

    /// Python wrapper for an initialized ComponentGeoCoding
    #[pyclass(name = "GeoCoding")]
    struct PyGeoCoding {
        inner: ComponentGeoCoding,
    }

    #[pymethods]
    impl PyGeoCoding {
        #[new]
        #[pyo3(signature = (longitudes, latitudes, resolution_km, forward_key="pixel-interpolating", inverse_key="quad-tree-interpolating", geo_checks="ANTIMERIDIAN"))]
        fn new(
            longitudes: PyReadonlyArray2<f64>,
            latitudes: PyReadonlyArray2<f64>,
            resolution_km: f64,
            forward_key: &str,
            inverse_key: &str,
            geo_checks: &str,
        ) -> PyResult<Self> {
            let raster = GeoRaster::from_arrays(
                &longitudes.as_array().to_owned(),
                &latitudes.as_array().to_owned(),
                resolution_km,
            )
            .map_err(to_py_err)?;
            let checks = geo_checks.parse::<GeoChecks>().map_err(to_py_err)?;
            let factory = ComponentFactory::with_defaults();
            let mut inner =
                ComponentGeoCoding::from_keys(raster, Some(forward_key), Some(inverse_key), checks, &factory)
                    .map_err(to_py_err)?;
            inner.initialize().map_err(to_py_err)?;
            Ok(PyGeoCoding { inner })
        }

        /// Returns (lat, lon); NaN when the pixel is outside the scene
        fn get_geo_pos(&self, x: f64, y: f64) -> PyResult<(f64, f64)> {
            let g = self
                .inner
                .get_geo_pos(&PixelPos::new(x, y))
                .map_err(to_py_err)?;
            Ok((g.lat, g.lon))
        }

        /// Returns (x, y); NaN when no pixel matches
        fn get_pixel_pos(&self, lat: f64, lon: f64) -> PyResult<(f64, f64)> {
            let p = self
                .inner
                .get_pixel_pos(&GeoPos::new(lat, lon))
                .map_err(to_py_err)?;
            Ok((p.x, p.y))
        }

        fn is_crossing_meridian_at_180(&self) -> PyResult<bool> {
            self.inner.is_crossing_meridian_at_180().map_err(to_py_err)
        }

        fn __repr__(&self) -> String {
            format!(
                "GeoCoding(forward='{}', inverse='{}', scene={}x{})",
                self.inner.forward_key().unwrap_or("none"),
                self.inner.inverse_key().unwrap_or("none"),
                self.inner.geo_raster().scene_width(),
                self.inner.geo_raster().scene_height()
            )
        }
    }
}
