//! Camera control registry and presets.
//!
//! Every value that reaches the camera passes through
//! [`ControlRegistry::validate`]. Presets are validated against the same
//! registry once at startup.

mod parameter;
mod preset;
mod registry;

pub use parameter::{CameraParameter, ControlValue, ParamKind, SelectOption};
pub use preset::{Preset, PresetDefinition, PresetTable};
pub use registry::{
    ControlError, ControlRegistry, ControlValues, AE_ENABLE, AF_MODE, ANALOGUE_GAIN, AWB_ENABLE,
    BRIGHTNESS, COLOUR_GAINS, CONTRAST, EXPOSURE_TIME, LENS_POSITION, NOISE_REDUCTION_MODE,
    SATURATION, SHARPNESS,
};
