//! The map surface that function calls act on.

use crate::models::RagResult;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

impl From<&RagResult> for LngLat {
    fn from(result: &RagResult) -> Self {
        Self::new(result.lon, result.lat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub south_west: LngLat,
    pub north_east: LngLat,
}

impl Bounds {
    pub fn from_point(point: LngLat) -> Self {
        Self {
            south_west: point,
            north_east: point,
        }
    }

    pub fn extend(&mut self, point: LngLat) {
        self.south_west.lng = self.south_west.lng.min(point.lng);
        self.south_west.lat = self.south_west.lat.min(point.lat);
        self.north_east.lng = self.north_east.lng.max(point.lng);
        self.north_east.lat = self.north_east.lat.max(point.lat);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub umkm_id: Option<String>,
    pub name: String,
    pub position: LngLat,
}

/// Operations the dispatcher needs from a map view.
pub trait MapController {
    fn select_umkm(&mut self, umkm: &RagResult);
    fn open_details(&mut self, umkm: &RagResult);
    fn fly_to(&mut self, center: LngLat, zoom: f64, duration: Duration);
    fn start_navigation(&mut self, destination: &Destination);
    /// Position of the rendered marker for `umkm_id`, if there is one.
    fn marker_position(&self, umkm_id: &str) -> Option<LngLat>;
    fn pulse_marker(&mut self, umkm_id: &str, duration: Duration);
    fn fit_bounds(&mut self, bounds: Bounds, padding: u32, duration: Duration);
}

/// Headless map for the terminal client: markers come from the retrieved
/// results and every action is logged.
#[derive(Debug, Default)]
pub struct LoggingMap {
    markers: HashMap<String, LngLat>,
    selected: Option<String>,
}

impl LoggingMap {
    pub fn new(results: &[RagResult]) -> Self {
        Self {
            markers: results
                .iter()
                .map(|r| (r.umkm_id.clone(), LngLat::from(r)))
                .collect(),
            selected: None,
        }
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }
}

impl MapController for LoggingMap {
    fn select_umkm(&mut self, umkm: &RagResult) {
        self.selected = Some(umkm.umkm_id.clone());
        info!(umkm_id = %umkm.umkm_id, name = %umkm.name, "Selected business");
    }

    fn open_details(&mut self, umkm: &RagResult) {
        info!(
            umkm_id = %umkm.umkm_id,
            name = %umkm.name,
            category = umkm.category.as_deref().unwrap_or("-"),
            address = umkm.address.as_deref().unwrap_or("-"),
            "Opened detail view"
        );
    }

    fn fly_to(&mut self, center: LngLat, zoom: f64, duration: Duration) {
        info!(
            lng = center.lng,
            lat = center.lat,
            zoom,
            duration_ms = duration.as_millis() as u64,
            "Camera fly-to"
        );
    }

    fn start_navigation(&mut self, destination: &Destination) {
        info!(
            name = %destination.name,
            lng = destination.position.lng,
            lat = destination.position.lat,
            "Navigation started"
        );
    }

    fn marker_position(&self, umkm_id: &str) -> Option<LngLat> {
        self.markers.get(umkm_id).copied()
    }

    fn pulse_marker(&mut self, umkm_id: &str, duration: Duration) {
        info!(umkm_id, duration_ms = duration.as_millis() as u64, "Marker pulse");
    }

    fn fit_bounds(&mut self, bounds: Bounds, padding: u32, duration: Duration) {
        info!(
            sw = ?bounds.south_west,
            ne = ?bounds.north_east,
            padding,
            duration_ms = duration.as_millis() as u64,
            "Camera fit to bounds"
        );
    }
}
