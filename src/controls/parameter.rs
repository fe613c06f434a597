//! Camera parameter descriptors and typed control values.

use serde::Serialize;
use std::fmt;

/// Semantic type and domain of a camera parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamKind {
    /// On/off switch.
    Bool,
    /// Integer within an inclusive range.
    Int { min: i64, max: i64, step: i64 },
    /// Float within an inclusive range.
    Float { min: f64, max: f64, step: f64 },
    /// Two floats sharing one inclusive range, e.g. red/blue gains.
    Pair { min: f64, max: f64, step: f64 },
    /// One of a fixed set of integer codes.
    Select { options: Vec<SelectOption> },
}

/// A single entry of a [`ParamKind::Select`] domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectOption {
    pub value: i64,
    pub label: &'static str,
}

impl SelectOption {
    pub const fn new(value: i64, label: &'static str) -> Self {
        Self { value, label }
    }
}

/// A normalized, domain-checked control value.
///
/// Select parameters are stored as [`ControlValue::Int`]; the owning
/// [`CameraParameter`] tells the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ControlValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Pair([f64; 2]),
}

impl ControlValue {
    /// Returns the value as a JSON document, the same shape clients send.
    pub fn to_json(&self) -> serde_json::Value {
        match *self {
            ControlValue::Bool(b) => serde_json::Value::from(b),
            ControlValue::Int(i) => serde_json::Value::from(i),
            ControlValue::Float(f) => serde_json::Value::from(f),
            ControlValue::Pair([a, b]) => serde_json::Value::from(vec![a, b]),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            ControlValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            ControlValue::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match *self {
            ControlValue::Float(f) => Some(f),
            ControlValue::Int(i) => Some(i as f64),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<[f64; 2]> {
        match *self {
            ControlValue::Pair(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlValue::Bool(b) => write!(f, "{b}"),
            ControlValue::Int(i) => write!(f, "{i}"),
            ControlValue::Float(v) => write!(f, "{v}"),
            ControlValue::Pair([a, b]) => write!(f, "({a}, {b})"),
        }
    }
}

/// Immutable description of one supported camera control.
#[derive(Debug, Clone, Serialize)]
pub struct CameraParameter {
    pub id: &'static str,
    pub label: &'static str,
    #[serde(flatten)]
    pub kind: ParamKind,
    pub default: ControlValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
}

impl CameraParameter {
    pub fn new(id: &'static str, label: &'static str, kind: ParamKind, default: ControlValue) -> Self {
        Self {
            id,
            label,
            kind,
            default,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: &'static str) -> Self {
        self.hint = Some(hint);
        self
    }
}
