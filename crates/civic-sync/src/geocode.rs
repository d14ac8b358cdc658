//! City/area -> coordinates, memoized and paced.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use civic_core::{Coordinates, TargetCity};
use civic_storage::{FetchError, HttpFetcher};
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid geocoder response: {0}")]
    InvalidResponse(String),
}

/// Free-text place description -> best match. `Ok(None)` means the
/// service answered but found nothing.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn lookup(&self, query: &str) -> Result<Option<Coordinates>, GeocodeError>;
}

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

pub struct NominatimGeocoder {
    http: HttpFetcher,
    base_url: String,
}

impl NominatimGeocoder {
    pub fn new(http: HttpFetcher) -> Self {
        Self {
            http,
            base_url: NOMINATIM_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct NominatimResult {
    lat: String,
    lon: String,
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn lookup(&self, query: &str) -> Result<Option<Coordinates>, GeocodeError> {
        let url = Url::parse_with_params(
            &format!("{}/search", self.base_url),
            &[("q", query), ("format", "json"), ("limit", "1")],
        )
        .map_err(|e| GeocodeError::InvalidResponse(e.to_string()))?;
        let resp = self.http.fetch_bytes("nominatim", url.as_str()).await?;
        let results: Vec<NominatimResult> = serde_json::from_slice(&resp.body)
            .map_err(|e| GeocodeError::InvalidResponse(e.to_string()))?;
        let Some(first) = results.into_iter().next() else {
            return Ok(None);
        };
        let latitude = first
            .lat
            .parse::<f64>()
            .map_err(|e| GeocodeError::InvalidResponse(format!("lat {}: {e}", first.lat)))?;
        let longitude = first
            .lon
            .parse::<f64>()
            .map_err(|e| GeocodeError::InvalidResponse(format!("lon {}: {e}", first.lon)))?;
        Ok(Some(Coordinates::new(latitude, longitude)))
    }
}

/// Outcome of resolving a `(city, area)` pair.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoResolution {
    Cached(Coordinates),
    Found(Coordinates),
    /// Lookup succeeded with no match; the item is placed at the city centre.
    CityCenter(Coordinates),
    /// City is not the configured target; never sent to the geocoder.
    OutsideTarget,
    /// Lookup itself failed; the item must be dropped.
    Failed(String),
}

impl GeoResolution {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match self {
            GeoResolution::Cached(c) | GeoResolution::Found(c) | GeoResolution::CityCenter(c) => {
                Some(*c)
            }
            GeoResolution::OutsideTarget | GeoResolution::Failed(_) => None,
        }
    }
}

pub struct GeocodeCache {
    geocoder: Arc<dyn Geocoder>,
    city: TargetCity,
    pacing: Duration,
    entries: Mutex<HashMap<(String, String), Coordinates>>,
}

impl GeocodeCache {
    pub fn new(geocoder: Arc<dyn Geocoder>, city: TargetCity, pacing: Duration) -> Self {
        Self {
            geocoder,
            city,
            pacing,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn cache_key(&self, city: &str, area: Option<&str>) -> (String, String) {
        (
            city.trim().to_lowercase(),
            area.unwrap_or(&self.city.name).trim().to_lowercase(),
        )
    }

    pub async fn resolve(&self, city: &str, area: Option<&str>) -> GeoResolution {
        if !self.city.matches(city) {
            warn!(city, target = %self.city.name, "refusing to geocode outside target city");
            return GeoResolution::OutsideTarget;
        }

        let area = area.map(str::trim).filter(|a| !a.is_empty());
        let key = self.cache_key(city, area);
        if let Some(coords) = self.entries.lock().await.get(&key).copied() {
            return GeoResolution::Cached(coords);
        }

        let query = match area {
            Some(area) => format!("{area}, {}, {}", self.city.name, self.city.country),
            None => format!("{}, {}", self.city.name, self.city.country),
        };
        let result = self.geocoder.lookup(&query).await;
        tokio::time::sleep(self.pacing).await;

        match result {
            Ok(Some(coords)) => {
                self.entries.lock().await.insert(key, coords);
                info!(query = %query, lat = coords.latitude, lon = coords.longitude, "geocoded");
                GeoResolution::Found(coords)
            }
            Ok(None) => {
                warn!(query = %query, "no geocoding match, using city centre");
                GeoResolution::CityCenter(self.city.center)
            }
            Err(err) => {
                error!(query = %query, error = %err, "geocoding failed");
                GeoResolution::Failed(err.to_string())
            }
        }
    }
}
