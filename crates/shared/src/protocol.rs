//! HTTP surface of the shared store, used by both the service and its clients.

use crate::domain::ControlsId;

pub const HEALTHZ_ROUTE: &str = "/healthz";
pub const CONTROLS_ROUTE_PATTERN: &str = "/controls/:controls_id";
pub const SENSOR_READINGS_ROUTE: &str = "/sensor_readings";
pub const LATEST_SENSOR_READING_ROUTE: &str = "/sensor_readings/latest";

pub fn controls_route(controls_id: ControlsId) -> String {
    format!("/controls/{}", controls_id.0)
}
