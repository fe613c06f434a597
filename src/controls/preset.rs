//! Named bundles of control overrides for common shooting scenarios.

use super::parameter::ControlValue;
use super::registry::{
    ControlError, ControlRegistry, ControlValues, AE_ENABLE, ANALOGUE_GAIN, AWB_ENABLE,
    COLOUR_GAINS, CONTRAST, EXPOSURE_TIME, NOISE_REDUCTION_MODE, SATURATION,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Unvalidated preset as written in a configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetDefinition {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

impl PresetDefinition {
    fn new(id: &str, label: &str, settings: &[(&str, Value)]) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            settings: settings
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }
}

/// A validated, read-only preset.
#[derive(Debug, Clone, Serialize)]
pub struct Preset {
    pub id: String,
    pub label: String,
    /// Only the parameters this preset overrides.
    pub settings: ControlValues,
}

impl Preset {
    /// Overrides to apply, including the forced manual exposure and white balance.
    pub fn effective_values(&self) -> ControlValues {
        let mut values = self.settings.clone();
        values.insert(AE_ENABLE.to_string(), ControlValue::Bool(false));
        values.insert(AWB_ENABLE.to_string(), ControlValue::Bool(false));
        values
    }
}

/// The presets available for the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub struct PresetTable {
    presets: Vec<Preset>,
}

impl PresetTable {
    /// Validates the built-in presets followed by `extra` definitions.
    ///
    /// An extra preset with the id of a built-in one replaces it.
    pub fn load(
        registry: &ControlRegistry,
        extra: &[PresetDefinition],
    ) -> Result<Self, ControlError> {
        let mut table = Self::default();
        for def in builtin_definitions().iter().chain(extra) {
            let preset = Preset {
                id: def.id.clone(),
                label: def.label.clone(),
                settings: registry.validate_all(&def.settings)?,
            };
            match table.presets.iter_mut().find(|p| p.id == preset.id) {
                Some(existing) => *existing = preset,
                None => table.presets.push(preset),
            }
        }
        Ok(table)
    }

    pub fn get(&self, id: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.iter()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

fn builtin_definitions() -> Vec<PresetDefinition> {
    vec![
        PresetDefinition::new(
            "deep_sky",
            "Deep Sky (Long Exposure)",
            &[
                (EXPOSURE_TIME, json!(30_000_000)),
                (ANALOGUE_GAIN, json!(8.0)),
            ],
        ),
        PresetDefinition::new(
            "planetary",
            "Planetary / Moon (Short Exposure)",
            &[
                (EXPOSURE_TIME, json!(10_000)),
                (ANALOGUE_GAIN, json!(2.0)),
                (NOISE_REDUCTION_MODE, json!(1)),
                (CONTRAST, json!(1.2)),
            ],
        ),
        PresetDefinition::new(
            "lucky_imaging",
            "Lucky Imaging (Video Burst)",
            &[
                (EXPOSURE_TIME, json!(100_000)),
                (ANALOGUE_GAIN, json!(4.0)),
                (NOISE_REDUCTION_MODE, json!(0)),
                (SATURATION, json!(0.8)),
            ],
        ),
        PresetDefinition::new(
            "milky_way",
            "Milky Way / Wide Field",
            &[
                (EXPOSURE_TIME, json!(15_000_000)),
                (ANALOGUE_GAIN, json!(16.0)),
                (COLOUR_GAINS, json!([1.8, 1.4])),
                (CONTRAST, json!(1.1)),
                (SATURATION, json!(1.3)),
            ],
        ),
    ]
}
