//! Canonical table of supported camera controls.
//!
//! The registry is built once at startup and never changes. It is the
//! single place where incoming client values are coerced and
//! domain-checked; out-of-range numbers are rejected, never clamped.

use super::parameter::{CameraParameter, ControlValue, ParamKind, SelectOption};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Auto-exposure switch.
pub const AE_ENABLE: &str = "AeEnable";
/// Auto-white-balance switch.
pub const AWB_ENABLE: &str = "AwbEnable";
/// Exposure time in microseconds.
pub const EXPOSURE_TIME: &str = "ExposureTime";
/// Sensor analogue gain.
pub const ANALOGUE_GAIN: &str = "AnalogueGain";
/// Manual red/blue white-balance gains.
pub const COLOUR_GAINS: &str = "ColourGains";
pub const BRIGHTNESS: &str = "Brightness";
pub const CONTRAST: &str = "Contrast";
pub const SATURATION: &str = "Saturation";
pub const SHARPNESS: &str = "Sharpness";
pub const NOISE_REDUCTION_MODE: &str = "NoiseReductionMode";
pub const AF_MODE: &str = "AfMode";
pub const LENS_POSITION: &str = "LensPosition";

/// Current value of every registered control, keyed by id.
pub type ControlValues = BTreeMap<String, ControlValue>;

/// Errors produced while validating control values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error("unknown parameter: {0}")]
    InvalidParameter(String),
    #[error("{id} out of range: {reason}")]
    OutOfRange { id: String, reason: String },
}

impl ControlError {
    fn out_of_range(id: &str, reason: impl Into<String>) -> Self {
        ControlError::OutOfRange {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Registry of camera parameters for the IMX477 sensor pipeline.
#[derive(Debug, Clone)]
pub struct ControlRegistry {
    params: Vec<CameraParameter>,
}

impl ControlRegistry {
    /// Builds the registry from an explicit parameter list.
    pub fn new(params: Vec<CameraParameter>) -> Self {
        Self { params }
    }

    /// Builds the standard HQ Camera control table.
    pub fn hq_camera() -> Self {
        use ControlValue as V;
        use ParamKind as K;

        Self::new(vec![
            CameraParameter::new(AE_ENABLE, "Auto Exposure", K::Bool, V::Bool(false)),
            CameraParameter::new(AWB_ENABLE, "Auto White Balance", K::Bool, V::Bool(false)),
            CameraParameter::new(
                EXPOSURE_TIME,
                "Exposure Time (µs)",
                K::Int {
                    min: 100,
                    max: 200_000_000,
                    step: 100,
                },
                V::Int(10_000),
            )
            .with_hint("100 µs – 200 s"),
            CameraParameter::new(
                ANALOGUE_GAIN,
                "Analogue Gain",
                K::Float {
                    min: 1.0,
                    max: 22.26,
                    step: 0.1,
                },
                V::Float(1.0),
            ),
            CameraParameter::new(
                COLOUR_GAINS,
                "Colour Gains (R, B)",
                K::Pair {
                    min: 0.0,
                    max: 32.0,
                    step: 0.1,
                },
                V::Pair([1.5, 1.5]),
            ),
            CameraParameter::new(
                BRIGHTNESS,
                "Brightness",
                K::Float {
                    min: -1.0,
                    max: 1.0,
                    step: 0.05,
                },
                V::Float(0.0),
            ),
            CameraParameter::new(
                CONTRAST,
                "Contrast",
                K::Float {
                    min: 0.0,
                    max: 32.0,
                    step: 0.1,
                },
                V::Float(1.0),
            ),
            CameraParameter::new(
                SATURATION,
                "Saturation",
                K::Float {
                    min: 0.0,
                    max: 32.0,
                    step: 0.1,
                },
                V::Float(1.0),
            ),
            CameraParameter::new(
                SHARPNESS,
                "Sharpness",
                K::Float {
                    min: 0.0,
                    max: 16.0,
                    step: 0.1,
                },
                V::Float(1.0),
            ),
            CameraParameter::new(
                NOISE_REDUCTION_MODE,
                "Noise Reduction",
                K::Select {
                    options: vec![
                        SelectOption::new(0, "Off"),
                        SelectOption::new(1, "Fast"),
                        SelectOption::new(2, "High Quality"),
                        SelectOption::new(3, "Minimal"),
                        SelectOption::new(4, "ZSL"),
                    ],
                },
                V::Int(2),
            ),
            CameraParameter::new(
                AF_MODE,
                "AF Mode",
                K::Select {
                    options: vec![
                        SelectOption::new(0, "Manual"),
                        SelectOption::new(1, "Auto"),
                        SelectOption::new(2, "Continuous"),
                    ],
                },
                V::Int(0),
            ),
            CameraParameter::new(
                LENS_POSITION,
                "Lens Position (focus)",
                K::Float {
                    min: 0.0,
                    max: 32.0,
                    step: 0.1,
                },
                V::Float(0.0),
            )
            .with_hint("0 = infinity, higher = closer"),
        ])
    }

    /// Returns every parameter keyed by id.
    pub fn describe(&self) -> BTreeMap<&'static str, &CameraParameter> {
        self.params.iter().map(|p| (p.id, p)).collect()
    }

    /// Returns the parameters in registration order.
    pub fn parameters(&self) -> &[CameraParameter] {
        &self.params
    }

    /// Looks up a parameter by id.
    pub fn get(&self, id: &str) -> Option<&CameraParameter> {
        self.params.iter().find(|p| p.id == id)
    }

    /// Default value of every registered parameter.
    pub fn defaults(&self) -> ControlValues {
        self.params
            .iter()
            .map(|p| (p.id.to_string(), p.default))
            .collect()
    }

    /// Coerces and domain-checks a single raw client value.
    pub fn validate(&self, id: &str, raw: &Value) -> Result<ControlValue, ControlError> {
        let param = self
            .get(id)
            .ok_or_else(|| ControlError::InvalidParameter(id.to_string()))?;

        match &param.kind {
            ParamKind::Bool => coerce_bool(raw)
                .map(ControlValue::Bool)
                .ok_or_else(|| ControlError::out_of_range(id, "expected a boolean")),
            ParamKind::Int { min, max, .. } => {
                let value = coerce_int(raw)
                    .ok_or_else(|| ControlError::out_of_range(id, "expected an integer"))?;
                if value < *min || value > *max {
                    return Err(ControlError::out_of_range(
                        id,
                        format!("{value} not in {min}..={max}"),
                    ));
                }
                Ok(ControlValue::Int(value))
            }
            ParamKind::Float { min, max, .. } => {
                let value = coerce_float(raw)
                    .ok_or_else(|| ControlError::out_of_range(id, "expected a number"))?;
                check_float(id, value, *min, *max)?;
                Ok(ControlValue::Float(value))
            }
            ParamKind::Pair { min, max, .. } => {
                let items = match raw {
                    Value::Array(items) if items.len() == 2 => items,
                    _ => {
                        return Err(ControlError::out_of_range(
                            id,
                            "expected a 2-element array",
                        ))
                    }
                };
                let mut pair = [0.0; 2];
                for (slot, item) in pair.iter_mut().zip(items) {
                    let value = coerce_float(item)
                        .ok_or_else(|| ControlError::out_of_range(id, "expected numbers"))?;
                    check_float(id, value, *min, *max)?;
                    *slot = value;
                }
                Ok(ControlValue::Pair(pair))
            }
            ParamKind::Select { options } => {
                let value = coerce_int(raw)
                    .ok_or_else(|| ControlError::out_of_range(id, "expected an option code"))?;
                if !options.iter().any(|o| o.value == value) {
                    return Err(ControlError::out_of_range(
                        id,
                        format!("{value} is not a valid option"),
                    ));
                }
                Ok(ControlValue::Int(value))
            }
        }
    }

    /// Validates a batch of raw values; fails on the first bad entry.
    ///
    /// Nothing is returned unless every entry is valid, so callers can
    /// apply the result atomically.
    pub fn validate_all<'a, I>(&self, raw: I) -> Result<ControlValues, ControlError>
    where
        I: IntoIterator<Item = (&'a String, &'a Value)>,
    {
        raw.into_iter()
            .map(|(id, value)| self.validate(id, value).map(|v| (id.clone(), v)))
            .collect()
    }
}

impl Default for ControlRegistry {
    fn default() -> Self {
        Self::hq_camera()
    }
}

fn check_float(id: &str, value: f64, min: f64, max: f64) -> Result<(), ControlError> {
    if !value.is_finite() || value < min || value > max {
        return Err(ControlError::out_of_range(
            id,
            format!("{value} not in {min}..={max}"),
        ));
    }
    Ok(())
}

fn coerce_bool(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_int(raw: &Value) -> Option<i64> {
    let as_whole = |v: f64| {
        (v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64).then_some(v as i64)
    };
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(as_whole)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(as_whole))
        }
        _ => None,
    }
}

fn coerce_float(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
