use shared::domain::ControlsRecord;
use sync_core::{CompositeOutcome, DisplayState, SessionEvent};

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

pub fn controls_line(controls: &ControlsRecord) -> String {
    format!(
        "leds {}/{}/{}  color {}  strip {}  timer {}  buzzer {}",
        controls.led1,
        controls.led2,
        controls.led3,
        controls.rgb(),
        on_off(controls.strip),
        controls.timer(),
        on_off(controls.buzzer),
    )
}

/// Plain-text view of the session, one concern per line.
pub fn display(state: &DisplayState) -> String {
    let mut lines = Vec::new();
    lines.push(match &state.sensors {
        Some(reading) => format!(
            "temperature {:.1}°C  humidity {:.0}%  light {}  (at {})",
            reading.temperature,
            reading.humidity,
            reading.light,
            reading.created_at.format("%H:%M:%S"),
        ),
        None => "no sensor readings yet".to_string(),
    });
    lines.push(controls_line(&state.controls));
    if !state.pending.is_empty() {
        let pending: Vec<&str> = state.pending.iter().map(|field| field.as_str()).collect();
        lines.push(format!("pending: {}", pending.join(", ")));
    }
    if state.stale {
        let reason = match (&state.last_error, state.consecutive_failures) {
            (Some(error), failures) if failures > 0 => {
                format!("stale after {failures} failed fetches: {error}")
            }
            _ => "stale: not synced yet".to_string(),
        };
        lines.push(reason);
    }
    lines.join("\n")
}

pub fn outcome(outcome: &CompositeOutcome) -> String {
    outcome
        .results
        .iter()
        .map(|result| match result {
            Ok(receipt) if receipt.was_clamped() => format!(
                "{} = {} (clamped from {})",
                receipt.field, receipt.applied, receipt.requested
            ),
            Ok(receipt) => format!("{} = {}", receipt.field, receipt.applied),
            Err(error) => format!("failed: {error}"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One line for events worth showing in watch mode.
pub fn event(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::SensorsUpdated(reading) => Some(format!(
            "sensors: {:.1}°C {:.0}% light {}",
            reading.temperature, reading.humidity, reading.light
        )),
        SessionEvent::ControlsReconciled(report) if !report.updated.is_empty() => {
            let fields: Vec<&str> = report.updated.iter().map(|field| field.as_str()).collect();
            Some(format!("controls changed remotely: {}", fields.join(", ")))
        }
        SessionEvent::FetchFailed {
            consecutive_failures,
            error,
        } => Some(format!("fetch failed ({consecutive_failures}): {error}")),
        SessionEvent::WriteFailed { field, error, .. } => {
            Some(format!("write of {field} failed: {error}"))
        }
        _ => None,
    }
}
