use crate::core::geocoding::GeoCodingConfig;
use crate::core::orthorectifier::OrthorectifierConfig;
use crate::types::{GeoChecks, GeoError, GeoResult};
use quick_xml::de::from_str;
use serde::Deserialize;
use std::path::Path;

/// <geoCoding> document; absent elements keep their defaults
#[derive(Debug, Deserialize)]
struct GeoCodingDocument {
    #[serde(rename = "forwardKey")]
    forward_key: Option<String>,
    #[serde(rename = "inverseKey")]
    inverse_key: Option<String>,
    #[serde(rename = "geoChecks")]
    geo_checks: Option<String>,
    #[serde(rename = "rasterResolutionKm")]
    raster_resolution_km: Option<f64>,
}

/// <orthorectifier> document
#[derive(Debug, Deserialize)]
struct OrthorectifierDocument {
    #[serde(rename = "maxIterationCount")]
    max_iteration_count: Option<usize>,
    #[serde(rename = "pixelEpsilon")]
    pixel_epsilon: Option<f64>,
    #[serde(rename = "correctionThresholdMeters")]
    correction_threshold_meters: Option<f64>,
}

/// Reader for XML configuration documents
pub struct ConfigReader;

impl ConfigReader {
    pub fn read_geocoding_config<P: AsRef<Path>>(path: P) -> GeoResult<GeoCodingConfig> {
        log::info!("Reading geocoding configuration from: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse_geocoding_config(&content)
    }

    /// Parse a `<geoCoding>` document
    ///
    /// An empty key element (`<inverseKey/>`) leaves that coding out.
    pub fn parse_geocoding_config(xml_content: &str) -> GeoResult<GeoCodingConfig> {
        let doc = from_str::<GeoCodingDocument>(xml_content)
            .map_err(|e| GeoError::XmlParsing(format!("Failed to parse geocoding XML: {}", e)))?;

        let defaults = GeoCodingConfig::default();
        let key = |value: Option<String>, default: Option<String>| match value {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(v.trim().to_string()),
            None => default,
        };
        let geo_checks = match doc.geo_checks {
            Some(text) => text.parse::<GeoChecks>()?,
            None => defaults.geo_checks,
        };
        let raster_resolution_km = doc.raster_resolution_km.unwrap_or(defaults.raster_resolution_km);
        if !(raster_resolution_km > 0.0) {
            return Err(GeoError::Configuration(format!(
                "Raster resolution must be positive, got {} km",
                raster_resolution_km
            )));
        }

        let config = GeoCodingConfig {
            forward_key: key(doc.forward_key, defaults.forward_key),
            inverse_key: key(doc.inverse_key, defaults.inverse_key),
            geo_checks,
            raster_resolution_km,
        };
        log::debug!("Parsed geocoding configuration: {:?}", config);
        Ok(config)
    }

    pub fn read_orthorectifier_config<P: AsRef<Path>>(path: P) -> GeoResult<OrthorectifierConfig> {
        log::info!("Reading orthorectifier configuration from: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse_orthorectifier_config(&content)
    }

    pub fn parse_orthorectifier_config(xml_content: &str) -> GeoResult<OrthorectifierConfig> {
        let doc = from_str::<OrthorectifierDocument>(xml_content).map_err(|e| {
            GeoError::XmlParsing(format!("Failed to parse orthorectifier XML: {}", e))
        })?;

        let defaults = OrthorectifierConfig::default();
        let config = OrthorectifierConfig {
            max_iteration_count: doc.max_iteration_count.unwrap_or(defaults.max_iteration_count),
            pixel_epsilon: doc.pixel_epsilon.unwrap_or(defaults.pixel_epsilon),
            correction_threshold_meters: doc.correction_threshold_meters,
        };
        config.validate()?;
        Ok(config)
    }
}
