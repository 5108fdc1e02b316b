use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(ControlsId);
id_newtype!(ReadingId);

/// Identity of the one and only controls row.
pub const CONTROLS_ID: ControlsId = ControlsId(1);

pub const LEVEL_MAX: i64 = 255;
pub const TIMER_HOURS_MAX: i64 = 23;
pub const TIMER_MINUTES_MAX: i64 = 59;
pub const DEFAULT_TIMER_MINUTES: u8 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlField {
    Led1,
    Led2,
    Led3,
    RgbR,
    RgbG,
    RgbB,
    Strip,
    TimerHours,
    TimerMinutes,
    Buzzer,
}

impl ControlField {
    pub const ALL: [ControlField; 10] = [
        ControlField::Led1,
        ControlField::Led2,
        ControlField::Led3,
        ControlField::RgbR,
        ControlField::RgbG,
        ControlField::RgbB,
        ControlField::Strip,
        ControlField::TimerHours,
        ControlField::TimerMinutes,
        ControlField::Buzzer,
    ];

    /// Column / wire name of the field.
    pub fn as_str(self) -> &'static str {
        match self {
            ControlField::Led1 => "led1",
            ControlField::Led2 => "led2",
            ControlField::Led3 => "led3",
            ControlField::RgbR => "rgb_r",
            ControlField::RgbG => "rgb_g",
            ControlField::RgbB => "rgb_b",
            ControlField::Strip => "strip",
            ControlField::TimerHours => "timer_hours",
            ControlField::TimerMinutes => "timer_minutes",
            ControlField::Buzzer => "buzzer",
        }
    }

    pub fn domain(self) -> FieldDomain {
        match self {
            ControlField::Led1
            | ControlField::Led2
            | ControlField::Led3
            | ControlField::RgbR
            | ControlField::RgbG
            | ControlField::RgbB => FieldDomain::Range {
                min: 0,
                max: LEVEL_MAX,
            },
            ControlField::TimerHours => FieldDomain::Range {
                min: 0,
                max: TIMER_HOURS_MAX,
            },
            ControlField::TimerMinutes => FieldDomain::Range {
                min: 0,
                max: TIMER_MINUTES_MAX,
            },
            ControlField::Strip | ControlField::Buzzer => FieldDomain::Flag,
        }
    }

    /// Checks `value` against the field's domain under `policy`.
    ///
    /// Booleans are never coerced: a flag field only accepts a flag value and a
    /// numeric field only accepts an integer, whatever the policy. Under
    /// [`ValuePolicy::Clamp`] out-of-range integers are pulled to the nearest
    /// bound and the returned [`Admitted`] reports both values.
    pub fn admit(self, value: ControlValue, policy: ValuePolicy) -> Result<Admitted, ValidationError> {
        let applied = match (self.domain(), value) {
            (FieldDomain::Flag, ControlValue::Flag(_)) => value,
            (FieldDomain::Flag, ControlValue::Int(_)) => {
                return Err(ValidationError::TypeMismatch {
                    field: self,
                    expected: "boolean",
                })
            }
            (FieldDomain::Range { .. }, ControlValue::Flag(_)) => {
                return Err(ValidationError::TypeMismatch {
                    field: self,
                    expected: "integer",
                })
            }
            (FieldDomain::Range { min, max }, ControlValue::Int(raw)) => {
                if (min..=max).contains(&raw) {
                    value
                } else {
                    match policy {
                        ValuePolicy::Reject => {
                            return Err(ValidationError::OutOfRange {
                                field: self,
                                value: raw,
                                min,
                                max,
                            })
                        }
                        ValuePolicy::Clamp => ControlValue::Int(raw.clamp(min, max)),
                    }
                }
            }
        };
        Ok(Admitted {
            field: self,
            requested: value,
            applied,
        })
    }
}

impl fmt::Display for ControlField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlField {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ControlField::ALL
            .into_iter()
            .find(|field| field.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ValidationError::UnknownField(wanted.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDomain {
    Range { min: i64, max: i64 },
    Flag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    Flag(bool),
    Int(i64),
}

impl ControlValue {
    pub fn as_int(self) -> Option<i64> {
        match self {
            ControlValue::Int(v) => Some(v),
            ControlValue::Flag(_) => None,
        }
    }

    pub fn as_flag(self) -> Option<bool> {
        match self {
            ControlValue::Flag(v) => Some(v),
            ControlValue::Int(_) => None,
        }
    }
}

impl From<bool> for ControlValue {
    fn from(value: bool) -> Self {
        ControlValue::Flag(value)
    }
}

impl From<u8> for ControlValue {
    fn from(value: u8) -> Self {
        ControlValue::Int(i64::from(value))
    }
}

impl From<i64> for ControlValue {
    fn from(value: i64) -> Self {
        ControlValue::Int(value)
    }
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlValue::Flag(v) => write!(f, "{v}"),
            ControlValue::Int(v) => write!(f, "{v}"),
        }
    }
}

impl FromStr for ControlValue {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        match raw.to_ascii_lowercase().as_str() {
            "true" | "on" => return Ok(ControlValue::Flag(true)),
            "false" | "off" => return Ok(ControlValue::Flag(false)),
            _ => {}
        }
        raw.parse::<i64>()
            .map(ControlValue::Int)
            .map_err(|_| ValidationError::UnparsableValue(raw.to_string()))
    }
}

/// How out-of-range numeric input is treated before it reaches the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuePolicy {
    #[default]
    Reject,
    Clamp,
}

impl FromStr for ValuePolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(ValuePolicy::Reject),
            "clamp" => Ok(ValuePolicy::Clamp),
            other => Err(ValidationError::UnknownPolicy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admitted {
    pub field: ControlField,
    pub requested: ControlValue,
    pub applied: ControlValue,
}

impl Admitted {
    pub fn was_clamped(&self) -> bool {
        self.requested != self.applied
    }
}

/// Desired actuator state. Every value held here is inside its field domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlsRecord {
    pub id: ControlsId,
    pub led1: u8,
    pub led2: u8,
    pub led3: u8,
    pub rgb_r: u8,
    pub rgb_g: u8,
    pub rgb_b: u8,
    pub strip: bool,
    pub timer_hours: u8,
    pub timer_minutes: u8,
    pub buzzer: bool,
}

impl Default for ControlsRecord {
    fn default() -> Self {
        Self {
            id: CONTROLS_ID,
            led1: 0,
            led2: 0,
            led3: 0,
            rgb_r: 0,
            rgb_g: 0,
            rgb_b: 0,
            strip: false,
            timer_hours: 0,
            timer_minutes: DEFAULT_TIMER_MINUTES,
            buzzer: false,
        }
    }
}

impl ControlsRecord {
    pub fn get(&self, field: ControlField) -> ControlValue {
        match field {
            ControlField::Led1 => self.led1.into(),
            ControlField::Led2 => self.led2.into(),
            ControlField::Led3 => self.led3.into(),
            ControlField::RgbR => self.rgb_r.into(),
            ControlField::RgbG => self.rgb_g.into(),
            ControlField::RgbB => self.rgb_b.into(),
            ControlField::Strip => self.strip.into(),
            ControlField::TimerHours => self.timer_hours.into(),
            ControlField::TimerMinutes => self.timer_minutes.into(),
            ControlField::Buzzer => self.buzzer.into(),
        }
    }

    /// Checks every field against its domain, for records that did not come
    /// through [`ControlsRecord::set`], such as ones decoded from the store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for field in ControlField::ALL {
            field.admit(self.get(field), ValuePolicy::Reject)?;
        }
        Ok(())
    }

    /// Writes one field. The value must already be inside the field domain.
    pub fn set(&mut self, field: ControlField, value: ControlValue) -> Result<(), ValidationError> {
        let admitted = field.admit(value, ValuePolicy::Reject)?.applied;
        match (field, admitted) {
            (ControlField::Strip, ControlValue::Flag(v)) => self.strip = v,
            (ControlField::Buzzer, ControlValue::Flag(v)) => self.buzzer = v,
            (_, ControlValue::Int(v)) => {
                // admit() bounded v to at most 255
                let v = u8::try_from(v).map_err(|_| ValidationError::OutOfRange {
                    field,
                    value: v,
                    min: 0,
                    max: LEVEL_MAX,
                })?;
                match field {
                    ControlField::Led1 => self.led1 = v,
                    ControlField::Led2 => self.led2 = v,
                    ControlField::Led3 => self.led3 = v,
                    ControlField::RgbR => self.rgb_r = v,
                    ControlField::RgbG => self.rgb_g = v,
                    ControlField::RgbB => self.rgb_b = v,
                    ControlField::TimerHours => self.timer_hours = v,
                    ControlField::TimerMinutes => self.timer_minutes = v,
                    ControlField::Strip | ControlField::Buzzer => {}
                }
            }
            (_, ControlValue::Flag(_)) => {}
        }
        Ok(())
    }

    /// Copies one field from another record. Both sides are already in domain.
    pub fn copy_field_from(&mut self, other: &ControlsRecord, field: ControlField) {
        match field {
            ControlField::Led1 => self.led1 = other.led1,
            ControlField::Led2 => self.led2 = other.led2,
            ControlField::Led3 => self.led3 = other.led3,
            ControlField::RgbR => self.rgb_r = other.rgb_r,
            ControlField::RgbG => self.rgb_g = other.rgb_g,
            ControlField::RgbB => self.rgb_b = other.rgb_b,
            ControlField::Strip => self.strip = other.strip,
            ControlField::TimerHours => self.timer_hours = other.timer_hours,
            ControlField::TimerMinutes => self.timer_minutes = other.timer_minutes,
            ControlField::Buzzer => self.buzzer = other.buzzer,
        }
    }

    pub fn apply(&mut self, patch: &ControlsPatch) -> Result<(), ValidationError> {
        for (field, value) in patch.entries() {
            self.set(field, value)?;
        }
        Ok(())
    }

    pub fn rgb(&self) -> Rgb {
        Rgb {
            r: self.rgb_r,
            g: self.rgb_g,
            b: self.rgb_b,
        }
    }

    pub fn timer(&self) -> TimerSetting {
        TimerSetting {
            hours: self.timer_hours,
            minutes: self.timer_minutes,
        }
    }
}

/// Partial controls update. Absent fields are left untouched by an upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led1: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led2: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led3: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb_r: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb_g: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb_b: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_hours: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_minutes: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buzzer: Option<bool>,
}

impl ControlsPatch {
    pub fn single(field: ControlField, value: ControlValue) -> Result<Self, ValidationError> {
        Self::default().with(field, value)
    }

    pub fn with(mut self, field: ControlField, value: ControlValue) -> Result<Self, ValidationError> {
        let applied = field.admit(value, ValuePolicy::Reject)?.applied;
        let level = |v: ControlValue| v.as_int().and_then(|v| u8::try_from(v).ok());
        match field {
            ControlField::Led1 => self.led1 = level(applied),
            ControlField::Led2 => self.led2 = level(applied),
            ControlField::Led3 => self.led3 = level(applied),
            ControlField::RgbR => self.rgb_r = level(applied),
            ControlField::RgbG => self.rgb_g = level(applied),
            ControlField::RgbB => self.rgb_b = level(applied),
            ControlField::Strip => self.strip = applied.as_flag(),
            ControlField::TimerHours => self.timer_hours = level(applied),
            ControlField::TimerMinutes => self.timer_minutes = level(applied),
            ControlField::Buzzer => self.buzzer = applied.as_flag(),
        }
        Ok(self)
    }

    /// Present fields in declaration order.
    pub fn entries(&self) -> Vec<(ControlField, ControlValue)> {
        let levels = [
            (ControlField::Led1, self.led1),
            (ControlField::Led2, self.led2),
            (ControlField::Led3, self.led3),
            (ControlField::RgbR, self.rgb_r),
            (ControlField::RgbG, self.rgb_g),
            (ControlField::RgbB, self.rgb_b),
            (ControlField::TimerHours, self.timer_hours),
            (ControlField::TimerMinutes, self.timer_minutes),
        ];
        let flags = [
            (ControlField::Strip, self.strip),
            (ControlField::Buzzer, self.buzzer),
        ];
        let mut entries: Vec<(ControlField, ControlValue)> = levels
            .into_iter()
            .filter_map(|(field, value)| value.map(|v| (field, ControlValue::from(v))))
            .chain(
                flags
                    .into_iter()
                    .filter_map(|(field, value)| value.map(|v| (field, ControlValue::from(v)))),
            )
            .collect();
        entries.sort_by_key(|(field, _)| *field);
        entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Channel writes in the order they are issued to the store.
    pub fn channels(self) -> [(ControlField, ControlValue); 3] {
        [
            (ControlField::RgbR, self.r.into()),
            (ControlField::RgbG, self.g.into()),
            (ControlField::RgbB, self.b.into()),
        ]
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Parses `#rrggbb` / `rrggbb` as produced by color pickers.
impl FromStr for Rgb {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(ValidationError::InvalidColor(s.to_string()));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16)
                .map_err(|_| ValidationError::InvalidColor(s.to_string()))
        };
        Ok(Rgb {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }
}

/// Strip auto-off duration. Interpreted by the device only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSetting {
    pub hours: u8,
    pub minutes: u8,
}

impl fmt::Display for TimerSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}", self.hours, self.minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub id: ReadingId,
    pub temperature: f64,
    pub humidity: f64,
    pub light: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSensorReading {
    pub temperature: f64,
    pub humidity: f64,
    pub light: i64,
}

impl NewSensorReading {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.temperature.is_finite() {
            return Err(ValidationError::InvalidReading(
                "temperature must be a finite number".into(),
            ));
        }
        if !self.humidity.is_finite() || !(0.0..=100.0).contains(&self.humidity) {
            return Err(ValidationError::InvalidReading(
                "humidity must be between 0 and 100".into(),
            ));
        }
        if self.light < 0 {
            return Err(ValidationError::InvalidReading(
                "light must not be negative".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_level_by_default() {
        let err = ControlField::Led1
            .admit(ControlValue::Int(300), ValuePolicy::Reject)
            .expect_err("300 is out of range");
        assert!(matches!(
            err,
            ValidationError::OutOfRange {
                field: ControlField::Led1,
                value: 300,
                min: 0,
                max: 255
            }
        ));
        assert!(ControlField::Led1
            .admit(ControlValue::Int(-5), ValuePolicy::Reject)
            .is_err());
    }

    #[test]
    fn clamp_policy_reports_the_adjustment() {
        let admitted = ControlField::TimerMinutes
            .admit(ControlValue::Int(75), ValuePolicy::Clamp)
            .expect("clamped");
        assert_eq!(admitted.applied, ControlValue::Int(59));
        assert_eq!(admitted.requested, ControlValue::Int(75));
        assert!(admitted.was_clamped());

        let untouched = ControlField::TimerMinutes
            .admit(ControlValue::Int(10), ValuePolicy::Clamp)
            .expect("in range");
        assert!(!untouched.was_clamped());
    }

    #[test]
    fn flags_never_coerce_between_types() {
        for policy in [ValuePolicy::Reject, ValuePolicy::Clamp] {
            assert!(ControlField::Buzzer
                .admit(ControlValue::Int(1), policy)
                .is_err());
            assert!(ControlField::Led2
                .admit(ControlValue::Flag(true), policy)
                .is_err());
        }
    }

    #[test]
    fn parses_field_names_case_insensitively() {
        assert_eq!("RGB_G".parse::<ControlField>().expect("field"), ControlField::RgbG);
        assert!(matches!(
            "led4".parse::<ControlField>(),
            Err(ValidationError::UnknownField(name)) if name == "led4"
        ));
    }

    #[test]
    fn default_record_matches_device_defaults() {
        let record = ControlsRecord::default();
        assert_eq!(record.id, CONTROLS_ID);
        assert_eq!(record.timer().to_string(), "0:30");
        assert!(!record.strip);
        assert!(!record.buzzer);
    }

    #[test]
    fn decoded_record_is_checked_against_field_domains() {
        assert!(ControlsRecord::default().validate().is_ok());
        let decoded: ControlsRecord = serde_json::from_value(serde_json::json!({
            "id": 1, "led1": 0, "led2": 0, "led3": 0,
            "rgb_r": 0, "rgb_g": 0, "rgb_b": 0, "strip": false,
            "timer_hours": 99, "timer_minutes": 30, "buzzer": false
        }))
        .expect("decodes as u8");
        assert!(matches!(
            decoded.validate(),
            Err(ValidationError::OutOfRange {
                field: ControlField::TimerHours,
                value: 99,
                ..
            })
        ));
    }

    #[test]
    fn patch_serializes_only_present_fields() {
        let patch = ControlsPatch::single(ControlField::TimerHours, ControlValue::Int(2))
            .expect("patch")
            .with(ControlField::Strip, ControlValue::Flag(true))
            .expect("patch");
        let json = serde_json::to_value(&patch).expect("json");
        assert_eq!(json, serde_json::json!({ "timer_hours": 2, "strip": true }));
        assert_eq!(
            patch.entries(),
            vec![
                (ControlField::Strip, ControlValue::Flag(true)),
                (ControlField::TimerHours, ControlValue::Int(2)),
            ]
        );
    }

    #[test]
    fn patch_rejects_out_of_domain_values() {
        assert!(ControlsPatch::single(ControlField::TimerHours, ControlValue::Int(24)).is_err());
    }

    #[test]
    fn record_apply_touches_only_patched_fields() {
        let mut record = ControlsRecord {
            led2: 40,
            ..ControlsRecord::default()
        };
        let patch = ControlsPatch {
            led1: Some(200),
            buzzer: Some(true),
            ..ControlsPatch::default()
        };
        record.apply(&patch).expect("apply");
        assert_eq!(record.led1, 200);
        assert_eq!(record.led2, 40);
        assert!(record.buzzer);
    }

    #[test]
    fn parses_hex_colors() {
        assert_eq!("#ff8000".parse::<Rgb>().expect("rgb"), Rgb::new(255, 128, 0));
        assert_eq!(Rgb::new(1, 2, 3).to_string(), "#010203");
        assert!("#ff80".parse::<Rgb>().is_err());
        assert!("zz0000".parse::<Rgb>().is_err());
    }

    #[test]
    fn sensor_reading_validation() {
        let ok = NewSensorReading {
            temperature: 21.5,
            humidity: 40.0,
            light: 512,
        };
        ok.validate().expect("valid");
        let bad = NewSensorReading {
            humidity: 140.0,
            ..ok.clone()
        };
        assert!(bad.validate().is_err());
        let nan = NewSensorReading {
            temperature: f64::NAN,
            ..ok
        };
        assert!(nan.validate().is_err());
    }
}
