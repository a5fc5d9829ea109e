//! # Function Dispatcher
//!
//! Turns a `functionCalls` batch into map actions.
//!
//! ## Handlers:
//! - **show_umkm_details**: select the business from the current results, open
//!   its details and, unless `focus_map` is false, fly to it
//! - **navigate_to_umkm**: start navigation to a business by id, or to a
//!   name plus coordinates
//! - **highlight_umkm**: pulse every rendered marker in the list and, unless
//!   `zoom_to_bounds` is false, fit the camera around them
//!
//! Every call is handled on its own. A failing call is logged and the rest of
//! the batch still runs. Other advertised functions are ignored.

pub mod map;

use crate::live::messages::FunctionCall;
use crate::models::RagResult;
use map::{Bounds, Destination, LngLat, MapController};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DETAIL_ZOOM: f64 = 16.0;
pub const FLY_DURATION: Duration = Duration::from_millis(1500);
pub const PULSE_DURATION: Duration = Duration::from_millis(3000);
pub const BOUNDS_PADDING: u32 = 80;

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    InvalidArguments { function: String, reason: String },
    /// The id is not part of the current result set
    UnknownUmkm(String),
    MissingDestination,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::InvalidArguments { function, reason } => {
                write!(f, "invalid arguments for {}: {}", function, reason)
            }
            DispatchError::UnknownUmkm(id) => write!(f, "business {} is not in the current results", id),
            DispatchError::MissingDestination => {
                write!(f, "navigation needs a known umkm_id or a name with coordinates")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// The function is advertised but has no map handler
    Ignored,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub handled: usize,
    pub ignored: usize,
    pub failed: usize,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ShowDetailsArgs {
    umkm_id: String,
    #[serde(default = "default_true")]
    focus_map: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Coordinates {
    lat: f64,
    #[serde(alias = "lng")]
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct NavigateArgs {
    #[serde(default)]
    umkm_id: Option<String>,
    #[serde(default)]
    umkm_name: Option<String>,
    #[serde(default)]
    coordinates: Option<Coordinates>,
}

#[derive(Debug, Deserialize)]
struct HighlightArgs {
    #[serde(default)]
    umkm_ids: Vec<String>,
    #[serde(default = "default_true")]
    zoom_to_bounds: bool,
}

fn parse_args<T: DeserializeOwned>(call: &FunctionCall) -> Result<T, DispatchError> {
    let args = match &call.args {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(args).map_err(|e| DispatchError::InvalidArguments {
        function: call.name.clone(),
        reason: e.to_string(),
    })
}

pub struct FunctionDispatcher<M> {
    map: M,
    results: Vec<RagResult>,
}

impl<M: MapController> FunctionDispatcher<M> {
    /// `results` is the result set the session was opened with; ids resolve against it.
    pub fn new(map: M, results: Vec<RagResult>) -> Self {
        Self { map, results }
    }

    pub fn map(&self) -> &M {
        &self.map
    }

    pub fn dispatch_batch(&mut self, calls: &[FunctionCall]) -> BatchReport {
        let mut report = BatchReport::default();
        for call in calls {
            match self.dispatch(call) {
                Ok(DispatchOutcome::Handled) => report.handled += 1,
                Ok(DispatchOutcome::Ignored) => report.ignored += 1,
                Err(err) => {
                    warn!(function = %call.name, id = %call.id, error = %err, "Function call failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub fn dispatch(&mut self, call: &FunctionCall) -> Result<DispatchOutcome, DispatchError> {
        match call.name.as_str() {
            "show_umkm_details" => self.show_umkm_details(parse_args(call)?)?,
            "navigate_to_umkm" => self.navigate_to_umkm(parse_args(call)?)?,
            "highlight_umkm" => self.highlight_umkm(parse_args(call)?),
            other => {
                debug!(function = other, "No map handler for function");
                return Ok(DispatchOutcome::Ignored);
            }
        }
        Ok(DispatchOutcome::Handled)
    }

    fn find(&self, umkm_id: &str) -> Option<&RagResult> {
        self.results.iter().find(|r| r.umkm_id == umkm_id)
    }

    fn show_umkm_details(&mut self, args: ShowDetailsArgs) -> Result<(), DispatchError> {
        let umkm = self
            .find(&args.umkm_id)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownUmkm(args.umkm_id.clone()))?;

        self.map.select_umkm(&umkm);
        self.map.open_details(&umkm);
        if args.focus_map {
            self.map.fly_to(LngLat::from(&umkm), DETAIL_ZOOM, FLY_DURATION);
        }
        Ok(())
    }

    fn navigate_to_umkm(&mut self, args: NavigateArgs) -> Result<(), DispatchError> {
        let by_id = args.umkm_id.as_deref().and_then(|id| self.find(id)).map(|umkm| Destination {
            umkm_id: Some(umkm.umkm_id.clone()),
            name: umkm.name.clone(),
            position: LngLat::from(umkm),
        });

        let destination = match (by_id, args.coordinates) {
            (Some(destination), _) => destination,
            (None, Some(coordinates)) => Destination {
                umkm_id: args.umkm_id.clone(),
                name: args
                    .umkm_name
                    .clone()
                    .unwrap_or_else(|| "Destination".to_string()),
                position: LngLat::new(coordinates.lon, coordinates.lat),
            },
            (None, None) => return Err(DispatchError::MissingDestination),
        };

        info!(name = %destination.name, "Navigating");
        self.map.start_navigation(&destination);
        Ok(())
    }

    fn highlight_umkm(&mut self, args: HighlightArgs) {
        let mut bounds: Option<Bounds> = None;

        for id in &args.umkm_ids {
            let Some(position) = self.map.marker_position(id) else {
                debug!(umkm_id = %id, "No rendered marker to highlight");
                continue;
            };
            self.map.pulse_marker(id, PULSE_DURATION);
            match bounds.as_mut() {
                Some(b) => b.extend(position),
                None => bounds = Some(Bounds::from_point(position)),
            }
        }

        if let (true, Some(bounds)) = (args.zoom_to_bounds, bounds) {
            self.map.fit_bounds(bounds, BOUNDS_PADDING, FLY_DURATION);
        }
    }
}
