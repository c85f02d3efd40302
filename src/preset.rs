//! The preset/mapping data model, schema-stable against the on-disk JSON.
//!
//! A preset file is an ordered array of mapping records. Records carry the
//! input combination, the target virtual device, the output (symbolic or
//! numeric) and the shaping parameters with their documented defaults.
//! Validation and compilation to runnable form live in [`validate`].

pub mod validate;

use serde::{Deserialize, Serialize};

use crate::event::{EV_ABS, EV_KEY, EV_REL, OriginHash};

/// How an [`InputConfig`] participates in a combination.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigKind {
    /// A key or button; the event value carries the trigger.
    Key,
    /// An analog axis feeding an axis output (threshold absent or zero).
    Analog,
    /// An analog axis used as a switch (threshold present and non-zero).
    Threshold,
}

/// One condition of a combination: an event source, optionally bound to a
/// single sub-device of the group, optionally with an analog threshold.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(rename = "type")]
    pub ty: u16,
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_hash: Option<OriginHash>,
    /// For ABS: percentage in [-100, 100] of the normalized axis range.
    /// For REL: raw speed magnitude, sign meaning direction.
    /// Ignored for KEY. Absent or zero means "analog axis".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analog_threshold: Option<i32>,
}

impl InputConfig {
    pub fn key(code: u16) -> Self {
        InputConfig {
            ty: EV_KEY,
            code,
            origin_hash: None,
            analog_threshold: None,
        }
    }

    pub fn kind(&self) -> ConfigKind {
        if self.ty == EV_KEY {
            return ConfigKind::Key;
        }
        match self.analog_threshold {
            None | Some(0) => ConfigKind::Analog,
            Some(_) => ConfigKind::Threshold,
        }
    }

    /// Whether an incoming event can satisfy this config.
    pub fn matches(&self, ty: u16, code: u16, origin: OriginHash) -> bool {
        self.ty == ty && self.code == code && self.origin_hash.map_or(true, |h| h == origin)
    }
}

/// Ordered, non-empty list of configs. All must be satisfied at once for
/// the combination to be active.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputCombination(pub Vec<InputConfig>);

impl InputCombination {
    pub fn new(configs: Vec<InputConfig>) -> Self {
        InputCombination(configs)
    }

    pub fn configs(&self) -> &[InputConfig] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Identity of the combination as a multiset of its configs. Two
    /// mappings with the same identity collide regardless of config order.
    pub fn identity(&self) -> Vec<(u16, u16, Option<OriginHash>, Option<i32>)> {
        let mut id: Vec<_> = self
            .0
            .iter()
            .map(|c| (c.ty, c.code, c.origin_hash, c.analog_threshold))
            .collect();
        id.sort_unstable();
        id
    }

    /// A readable identity like `KEY_LEFTSHIFT + KEY_A`, for logs.
    pub fn describe(&self) -> String {
        self.0
            .iter()
            .map(|c| crate::keys::code_name(c.ty, c.code).to_string())
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

/// The fixed set of named virtual output devices.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetUinput {
    Keyboard,
    Mouse,
    Gamepad,
    Stylus,
    #[serde(rename = "keyboard+mouse")]
    KeyboardMouse,
}

impl Default for TargetUinput {
    fn default() -> Self {
        TargetUinput::Keyboard
    }
}

impl TargetUinput {
    pub const ALL: [TargetUinput; 5] = [
        TargetUinput::Keyboard,
        TargetUinput::Mouse,
        TargetUinput::Gamepad,
        TargetUinput::Stylus,
        TargetUinput::KeyboardMouse,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TargetUinput::Keyboard => "keyboard",
            TargetUinput::Mouse => "mouse",
            TargetUinput::Gamepad => "gamepad",
            TargetUinput::Stylus => "stylus",
            TargetUinput::KeyboardMouse => "keyboard+mouse",
        }
    }
}

fn default_gain() -> f64 {
    1.0
}
fn default_rel_rate() -> u32 {
    60
}
fn default_rel_to_abs_input_cutoff() -> f64 {
    100.0
}
fn default_release_timeout_ms() -> u64 {
    50
}
fn default_macro_key_sleep_ms() -> u64 {
    10
}
fn default_true() -> bool {
    true
}

/// One mapping record, exactly as stored on disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub input_combination: InputCombination,
    #[serde(default)]
    pub target_uinput: TargetUinput,

    /// Symbolic output: a key name, macro text, or the literal `disable`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_symbol: Option<String>,
    /// Numeric output, used when no symbol is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_code: Option<u16>,

    // Shaping parameters. Defaults are part of the schema.
    #[serde(default = "default_deadzone")]
    pub deadzone: f64,
    #[serde(default = "default_gain")]
    pub gain: f64,
    #[serde(default)]
    pub expo: f64,
    #[serde(default = "default_rel_rate")]
    pub rel_rate: u32,
    #[serde(default = "default_rel_to_abs_input_cutoff")]
    pub rel_to_abs_input_cutoff: f64,
    #[serde(default = "default_release_timeout_ms")]
    pub release_timeout_ms: u64,

    /// On trigger, emit synthetic releases for the combination's non-final
    /// keys on the forwarded device.
    #[serde(default = "default_true")]
    pub release_combination_keys: bool,

    /// Full press-to-release spacing used by the macro `key()` node.
    #[serde(default = "default_macro_key_sleep_ms")]
    pub macro_key_sleep_ms: u64,

    /// Optional display name for logs and validation reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn default_deadzone() -> f64 {
    0.1
}

impl Mapping {
    /// A minimal record; tests and the validator fill in the rest.
    pub fn new(combination: InputCombination, target: TargetUinput) -> Self {
        Mapping {
            input_combination: combination,
            target_uinput: target,
            output_symbol: None,
            output_type: None,
            output_code: None,
            deadzone: default_deadzone(),
            gain: default_gain(),
            expo: 0.0,
            rel_rate: default_rel_rate(),
            rel_to_abs_input_cutoff: default_rel_to_abs_input_cutoff(),
            release_timeout_ms: default_release_timeout_ms(),
            release_combination_keys: true,
            macro_key_sleep_ms: default_macro_key_sleep_ms(),
            name: None,
        }
    }

    /// Display name: the explicit name, or the combination description.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.input_combination.describe())
    }

    /// The combination's single analog config, if any.
    pub fn analog_config(&self) -> Option<&InputConfig> {
        self.input_combination
            .configs()
            .iter()
            .find(|c| c.kind() == ConfigKind::Analog)
    }
}

/// The shaping parameters a mapping hands to the axis transformers.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Shaping {
    pub deadzone: f64,
    pub gain: f64,
    pub expo: f64,
    pub rel_rate: u32,
    pub rel_to_abs_input_cutoff: f64,
    pub release_timeout_ms: u64,
}

impl From<&Mapping> for Shaping {
    fn from(m: &Mapping) -> Self {
        Shaping {
            deadzone: m.deadzone,
            gain: m.gain,
            expo: m.expo,
            rel_rate: m.rel_rate,
            rel_to_abs_input_cutoff: m.rel_to_abs_input_cutoff,
            release_timeout_ms: m.release_timeout_ms,
        }
    }
}

/// A named, ordered list of mappings bound to one device group.
#[derive(Clone, Debug, PartialEq)]
pub struct Preset {
    pub name: String,
    pub group_key: String,
    pub mappings: Vec<Mapping>,
}

impl Preset {
    pub fn new(name: impl Into<String>, group_key: impl Into<String>) -> Self {
        Preset {
            name: name.into(),
            group_key: group_key.into(),
            mappings: Vec::new(),
        }
    }

    pub fn with_mappings(
        name: impl Into<String>,
        group_key: impl Into<String>,
        mappings: Vec<Mapping>,
    ) -> Self {
        Preset {
            name: name.into(),
            group_key: group_key.into(),
            mappings,
        }
    }
}
