//! The global input-symbol table: name <-> code lookups for the kernel
//! event-code space, plus layout-specific aliases harvested from the host
//! (`xmodmap.json` overrides).
//!
//! The static tables are kernel data and never change at runtime; the
//! [`SymbolTable`] layers case-insensitive lookup, convenience aliases and
//! per-host overrides on top of them.

use std::collections::HashMap;

use crate::event::{EV_ABS, EV_KEY, EV_REL};

static KEY_NAMES: phf::Map<u16, &'static str> = phf::phf_map! {
    1u16 => "KEY_ESC",
    2u16 => "KEY_1",
    3u16 => "KEY_2",
    4u16 => "KEY_3",
    5u16 => "KEY_4",
    6u16 => "KEY_5",
    7u16 => "KEY_6",
    8u16 => "KEY_7",
    9u16 => "KEY_8",
    10u16 => "KEY_9",
    11u16 => "KEY_0",
    12u16 => "KEY_MINUS",
    13u16 => "KEY_EQUAL",
    14u16 => "KEY_BACKSPACE",
    15u16 => "KEY_TAB",
    16u16 => "KEY_Q",
    17u16 => "KEY_W",
    18u16 => "KEY_E",
    19u16 => "KEY_R",
    20u16 => "KEY_T",
    21u16 => "KEY_Y",
    22u16 => "KEY_U",
    23u16 => "KEY_I",
    24u16 => "KEY_O",
    25u16 => "KEY_P",
    26u16 => "KEY_LEFTBRACE",
    27u16 => "KEY_RIGHTBRACE",
    28u16 => "KEY_ENTER",
    29u16 => "KEY_LEFTCTRL",
    30u16 => "KEY_A",
    31u16 => "KEY_S",
    32u16 => "KEY_D",
    33u16 => "KEY_F",
    34u16 => "KEY_G",
    35u16 => "KEY_H",
    36u16 => "KEY_J",
    37u16 => "KEY_K",
    38u16 => "KEY_L",
    39u16 => "KEY_SEMICOLON",
    40u16 => "KEY_APOSTROPHE",
    41u16 => "KEY_GRAVE",
    42u16 => "KEY_LEFTSHIFT",
    43u16 => "KEY_BACKSLASH",
    44u16 => "KEY_Z",
    45u16 => "KEY_X",
    46u16 => "KEY_C",
    47u16 => "KEY_V",
    48u16 => "KEY_B",
    49u16 => "KEY_N",
    50u16 => "KEY_M",
    51u16 => "KEY_COMMA",
    52u16 => "KEY_DOT",
    53u16 => "KEY_SLASH",
    54u16 => "KEY_RIGHTSHIFT",
    55u16 => "KEY_KPASTERISK",
    56u16 => "KEY_LEFTALT",
    57u16 => "KEY_SPACE",
    58u16 => "KEY_CAPSLOCK",
    59u16 => "KEY_F1",
    60u16 => "KEY_F2",
    61u16 => "KEY_F3",
    62u16 => "KEY_F4",
    63u16 => "KEY_F5",
    64u16 => "KEY_F6",
    65u16 => "KEY_F7",
    66u16 => "KEY_F8",
    67u16 => "KEY_F9",
    68u16 => "KEY_F10",
    69u16 => "KEY_NUMLOCK",
    70u16 => "KEY_SCROLLLOCK",
    71u16 => "KEY_KP7",
    72u16 => "KEY_KP8",
    73u16 => "KEY_KP9",
    74u16 => "KEY_KPMINUS",
    75u16 => "KEY_KP4",
    76u16 => "KEY_KP5",
    77u16 => "KEY_KP6",
    78u16 => "KEY_KPPLUS",
    79u16 => "KEY_KP1",
    80u16 => "KEY_KP2",
    81u16 => "KEY_KP3",
    82u16 => "KEY_KP0",
    83u16 => "KEY_KPDOT",
    85u16 => "KEY_ZENKAKUHANKAKU",
    86u16 => "KEY_102ND",
    87u16 => "KEY_F11",
    88u16 => "KEY_F12",
    89u16 => "KEY_RO",
    96u16 => "KEY_KPENTER",
    97u16 => "KEY_RIGHTCTRL",
    98u16 => "KEY_KPSLASH",
    99u16 => "KEY_SYSRQ",
    100u16 => "KEY_RIGHTALT",
    102u16 => "KEY_HOME",
    103u16 => "KEY_UP",
    104u16 => "KEY_PAGEUP",
    105u16 => "KEY_LEFT",
    106u16 => "KEY_RIGHT",
    107u16 => "KEY_END",
    108u16 => "KEY_DOWN",
    109u16 => "KEY_PAGEDOWN",
    110u16 => "KEY_INSERT",
    111u16 => "KEY_DELETE",
    113u16 => "KEY_MUTE",
    114u16 => "KEY_VOLUMEDOWN",
    115u16 => "KEY_VOLUMEUP",
    116u16 => "KEY_POWER",
    117u16 => "KEY_KPEQUAL",
    119u16 => "KEY_PAUSE",
    121u16 => "KEY_KPCOMMA",
    125u16 => "KEY_LEFTMETA",
    126u16 => "KEY_RIGHTMETA",
    127u16 => "KEY_COMPOSE",
    128u16 => "KEY_STOP",
    129u16 => "KEY_AGAIN",
    130u16 => "KEY_PROPS",
    131u16 => "KEY_UNDO",
    132u16 => "KEY_FRONT",
    133u16 => "KEY_COPY",
    134u16 => "KEY_OPEN",
    135u16 => "KEY_PASTE",
    136u16 => "KEY_FIND",
    137u16 => "KEY_CUT",
    138u16 => "KEY_HELP",
    139u16 => "KEY_MENU",
    140u16 => "KEY_CALC",
    142u16 => "KEY_SLEEP",
    143u16 => "KEY_WAKEUP",
    155u16 => "KEY_MAIL",
    156u16 => "KEY_BOOKMARKS",
    157u16 => "KEY_COMPUTER",
    158u16 => "KEY_BACK",
    159u16 => "KEY_FORWARD",
    163u16 => "KEY_NEXTSONG",
    164u16 => "KEY_PLAYPAUSE",
    165u16 => "KEY_PREVIOUSSONG",
    166u16 => "KEY_STOPCD",
    172u16 => "KEY_HOMEPAGE",
    173u16 => "KEY_REFRESH",
    183u16 => "KEY_F13",
    184u16 => "KEY_F14",
    185u16 => "KEY_F15",
    186u16 => "KEY_F16",
    187u16 => "KEY_F17",
    188u16 => "KEY_F18",
    189u16 => "KEY_F19",
    190u16 => "KEY_F20",
    191u16 => "KEY_F21",
    192u16 => "KEY_F22",
    193u16 => "KEY_F23",
    194u16 => "KEY_F24",
    224u16 => "KEY_BRIGHTNESSDOWN",
    225u16 => "KEY_BRIGHTNESSUP",
    240u16 => "KEY_UNKNOWN",
};

static BTN_NAMES: phf::Map<u16, &'static str> = phf::phf_map! {
    0x100u16 => "BTN_0",
    0x101u16 => "BTN_1",
    0x102u16 => "BTN_2",
    0x103u16 => "BTN_3",
    0x104u16 => "BTN_4",
    0x105u16 => "BTN_5",
    0x106u16 => "BTN_6",
    0x107u16 => "BTN_7",
    0x108u16 => "BTN_8",
    0x109u16 => "BTN_9",
    0x110u16 => "BTN_LEFT",
    0x111u16 => "BTN_RIGHT",
    0x112u16 => "BTN_MIDDLE",
    0x113u16 => "BTN_SIDE",
    0x114u16 => "BTN_EXTRA",
    0x115u16 => "BTN_FORWARD",
    0x116u16 => "BTN_BACK",
    0x117u16 => "BTN_TASK",
    0x120u16 => "BTN_TRIGGER",
    0x121u16 => "BTN_THUMB",
    0x122u16 => "BTN_THUMB2",
    0x123u16 => "BTN_TOP",
    0x124u16 => "BTN_TOP2",
    0x125u16 => "BTN_PINKIE",
    0x126u16 => "BTN_BASE",
    0x127u16 => "BTN_BASE2",
    0x128u16 => "BTN_BASE3",
    0x129u16 => "BTN_BASE4",
    0x12au16 => "BTN_BASE5",
    0x12bu16 => "BTN_BASE6",
    0x12fu16 => "BTN_DEAD",
    0x130u16 => "BTN_SOUTH",
    0x131u16 => "BTN_EAST",
    0x132u16 => "BTN_C",
    0x133u16 => "BTN_NORTH",
    0x134u16 => "BTN_WEST",
    0x135u16 => "BTN_Z",
    0x136u16 => "BTN_TL",
    0x137u16 => "BTN_TR",
    0x138u16 => "BTN_TL2",
    0x139u16 => "BTN_TR2",
    0x13au16 => "BTN_SELECT",
    0x13bu16 => "BTN_START",
    0x13cu16 => "BTN_MODE",
    0x13du16 => "BTN_THUMBL",
    0x13eu16 => "BTN_THUMBR",
    0x140u16 => "BTN_TOOL_PEN",
    0x141u16 => "BTN_TOOL_RUBBER",
    0x142u16 => "BTN_TOOL_BRUSH",
    0x143u16 => "BTN_TOOL_PENCIL",
    0x144u16 => "BTN_TOOL_AIRBRUSH",
    0x145u16 => "BTN_TOOL_FINGER",
    0x146u16 => "BTN_TOOL_MOUSE",
    0x147u16 => "BTN_TOOL_LENS",
    0x14au16 => "BTN_TOUCH",
    0x14bu16 => "BTN_STYLUS",
    0x14cu16 => "BTN_STYLUS2",
    0x14du16 => "BTN_TOOL_DOUBLETAP",
    0x14eu16 => "BTN_TOOL_TRIPLETAP",
    0x14fu16 => "BTN_TOOL_QUADTAP",
    0x150u16 => "BTN_GEAR_DOWN",
    0x151u16 => "BTN_GEAR_UP",
    0x220u16 => "BTN_DPAD_UP",
    0x221u16 => "BTN_DPAD_DOWN",
    0x222u16 => "BTN_DPAD_LEFT",
    0x223u16 => "BTN_DPAD_RIGHT",
};

static REL_NAMES: phf::Map<u16, &'static str> = phf::phf_map! {
    0x00u16 => "REL_X",
    0x01u16 => "REL_Y",
    0x02u16 => "REL_Z",
    0x03u16 => "REL_RX",
    0x04u16 => "REL_RY",
    0x05u16 => "REL_RZ",
    0x06u16 => "REL_HWHEEL",
    0x07u16 => "REL_DIAL",
    0x08u16 => "REL_WHEEL",
    0x09u16 => "REL_MISC",
    0x0bu16 => "REL_WHEEL_HI_RES",
    0x0cu16 => "REL_HWHEEL_HI_RES",
};

static ABS_NAMES: phf::Map<u16, &'static str> = phf::phf_map! {
    0x00u16 => "ABS_X",
    0x01u16 => "ABS_Y",
    0x02u16 => "ABS_Z",
    0x03u16 => "ABS_RX",
    0x04u16 => "ABS_RY",
    0x05u16 => "ABS_RZ",
    0x06u16 => "ABS_THROTTLE",
    0x07u16 => "ABS_RUDDER",
    0x08u16 => "ABS_WHEEL",
    0x09u16 => "ABS_GAS",
    0x0au16 => "ABS_BRAKE",
    0x10u16 => "ABS_HAT0X",
    0x11u16 => "ABS_HAT0Y",
    0x12u16 => "ABS_HAT1X",
    0x13u16 => "ABS_HAT1Y",
    0x14u16 => "ABS_HAT2X",
    0x15u16 => "ABS_HAT2Y",
    0x16u16 => "ABS_HAT3X",
    0x17u16 => "ABS_HAT3Y",
    0x18u16 => "ABS_PRESSURE",
    0x19u16 => "ABS_DISTANCE",
    0x1au16 => "ABS_TILT_X",
    0x1bu16 => "ABS_TILT_Y",
    0x1cu16 => "ABS_TOOL_WIDTH",
    0x20u16 => "ABS_VOLUME",
    0x28u16 => "ABS_MISC",
};

// Spellings users actually type, mapped onto canonical kernel names.
// The left side is matched after uppercasing.
static ALIASES: &[(&str, &str)] = &[
    ("CONTROL_L", "KEY_LEFTCTRL"),
    ("CONTROL_R", "KEY_RIGHTCTRL"),
    ("CTRL", "KEY_LEFTCTRL"),
    ("SHIFT_L", "KEY_LEFTSHIFT"),
    ("SHIFT_R", "KEY_RIGHTSHIFT"),
    ("SHIFT", "KEY_LEFTSHIFT"),
    ("ALT_L", "KEY_LEFTALT"),
    ("ALT_R", "KEY_RIGHTALT"),
    ("ALT", "KEY_LEFTALT"),
    ("ALTGR", "KEY_RIGHTALT"),
    ("SUPER_L", "KEY_LEFTMETA"),
    ("SUPER_R", "KEY_RIGHTMETA"),
    ("SUPER", "KEY_LEFTMETA"),
    ("META", "KEY_LEFTMETA"),
    ("RETURN", "KEY_ENTER"),
    ("ESCAPE", "KEY_ESC"),
    ("PRIOR", "KEY_PAGEUP"),
    ("NEXT", "KEY_PAGEDOWN"),
    ("KP_0", "KEY_KP0"),
    ("KP_1", "KEY_KP1"),
    ("KP_2", "KEY_KP2"),
    ("KP_3", "KEY_KP3"),
    ("KP_4", "KEY_KP4"),
    ("KP_5", "KEY_KP5"),
    ("KP_6", "KEY_KP6"),
    ("KP_7", "KEY_KP7"),
    ("KP_8", "KEY_KP8"),
    ("KP_9", "KEY_KP9"),
    ("KP_ENTER", "KEY_KPENTER"),
];

/// Symbolic name for an event code, `"UNKNOWN"` when the table has no entry.
pub fn code_name(ty: u16, code: u16) -> &'static str {
    let table = match ty {
        EV_KEY => {
            if code >= 0x100 {
                &BTN_NAMES
            } else {
                &KEY_NAMES
            }
        }
        EV_REL => &REL_NAMES,
        EV_ABS => &ABS_NAMES,
        _ => return "UNKNOWN",
    };
    table.get(&code).copied().unwrap_or("UNKNOWN")
}

pub fn type_name(ty: u16) -> &'static str {
    match ty {
        crate::event::EV_SYN => "EV_SYN",
        EV_KEY => "EV_KEY",
        EV_REL => "EV_REL",
        EV_ABS => "EV_ABS",
        crate::event::EV_MSC => "EV_MSC",
        crate::event::EV_LED => "EV_LED",
        crate::event::EV_FF => "EV_FF",
        _ => "UNKNOWN",
    }
}

/// Event type number for an `EV_*` name, case-insensitive.
pub fn type_from_name(name: &str) -> Option<u16> {
    match name.trim().to_ascii_uppercase().as_str() {
        "EV_SYN" => Some(crate::event::EV_SYN),
        "EV_KEY" => Some(EV_KEY),
        "EV_REL" => Some(EV_REL),
        "EV_ABS" => Some(EV_ABS),
        "EV_MSC" => Some(crate::event::EV_MSC),
        "EV_LED" => Some(crate::event::EV_LED),
        "EV_FF" => Some(crate::event::EV_FF),
        _ => None,
    }
}

pub fn value_name(value: i32) -> &'static str {
    match value {
        0 => "release",
        1 => "press",
        2 => "repeat",
        _ => "other",
    }
}

/// Name -> `(type, code)` lookup built once per daemon from the static
/// tables, the alias list, and the host's `xmodmap.json` overrides.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    by_name: HashMap<String, (u16, u16)>,
}

impl SymbolTable {
    /// Builds the table from the built-in kernel names and aliases only.
    pub fn with_defaults() -> Self {
        let mut by_name = HashMap::new();
        for (&code, &name) in KEY_NAMES.entries() {
            by_name.insert(name.to_string(), (EV_KEY, code));
            // KEY_A is also reachable as plain "A".
            if let Some(short) = name.strip_prefix("KEY_") {
                by_name.entry(short.to_string()).or_insert((EV_KEY, code));
            }
        }
        for (&code, &name) in BTN_NAMES.entries() {
            by_name.insert(name.to_string(), (EV_KEY, code));
        }
        for (&code, &name) in REL_NAMES.entries() {
            by_name.insert(name.to_string(), (EV_REL, code));
        }
        for (&code, &name) in ABS_NAMES.entries() {
            by_name.insert(name.to_string(), (EV_ABS, code));
        }
        for &(alias, canonical) in ALIASES {
            if let Some(&target) = by_name.get(canonical) {
                by_name.insert(alias.to_string(), target);
            }
        }
        SymbolTable { by_name }
    }

    /// Layers `xmodmap.json` name overrides (alias -> canonical name) over
    /// the defaults. Overrides naming unknown canonical symbols are skipped.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut table = Self::with_defaults();
        for (alias, canonical) in overrides {
            let canonical = canonical.trim().to_ascii_uppercase();
            if let Some(&target) = table.by_name.get(&canonical) {
                table
                    .by_name
                    .insert(alias.trim().to_ascii_uppercase(), target);
            } else {
                tracing::debug!(%alias, %canonical, "xmodmap override names unknown symbol");
            }
        }
        table
    }

    /// Case-insensitive name lookup. Accepts canonical kernel names
    /// (`KEY_A`, `BTN_LEFT`, `REL_X`), prefix-less key names (`a`, `F5`)
    /// and aliases.
    pub fn lookup(&self, name: &str) -> Option<(u16, u16)> {
        let normalized = name.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return None;
        }
        self.by_name.get(&normalized).copied()
    }

    /// Resolves a key identifier that may be a symbolic name or a bare
    /// numeric code (numeric codes are taken to be EV_KEY).
    pub fn resolve(&self, identifier: &str) -> Option<(u16, u16)> {
        let trimmed = identifier.trim();
        // Single digits are key caps ("1" is KEY_1), so name lookup runs
        // first and numeric fallback only catches multi-digit raw codes.
        if let Some(hit) = self.lookup(trimmed) {
            return Some(hit);
        }
        trimmed.parse::<u16>().ok().map(|code| (EV_KEY, code))
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_resolve() {
        let t = SymbolTable::with_defaults();
        assert_eq!(t.lookup("KEY_A"), Some((EV_KEY, 30)));
        assert_eq!(t.lookup("key_a"), Some((EV_KEY, 30)));
        assert_eq!(t.lookup("BTN_LEFT"), Some((EV_KEY, 0x110)));
        assert_eq!(t.lookup("REL_X"), Some((EV_REL, 0)));
        assert_eq!(t.lookup("ABS_Y"), Some((EV_ABS, 1)));
    }

    #[test]
    fn short_names_and_aliases_resolve() {
        let t = SymbolTable::with_defaults();
        assert_eq!(t.lookup("a"), Some((EV_KEY, 30)));
        assert_eq!(t.lookup("F11"), Some((EV_KEY, 87)));
        assert_eq!(t.lookup("Control_L"), Some((EV_KEY, 29)));
        assert_eq!(t.lookup("KP_5"), Some((EV_KEY, 76)));
    }

    #[test]
    fn digit_caps_win_over_raw_codes() {
        let t = SymbolTable::with_defaults();
        // "1" means the key cap KEY_1 (code 2), not raw code 1.
        assert_eq!(t.resolve("1"), Some((EV_KEY, 2)));
        // Multi-digit strings that are no symbol fall back to raw codes.
        assert_eq!(t.resolve("275"), Some((EV_KEY, 275)));
    }

    #[test]
    fn overrides_layer_on_top() {
        let mut overrides = HashMap::new();
        overrides.insert("dead_acute".to_string(), "KEY_APOSTROPHE".to_string());
        overrides.insert("bogus".to_string(), "KEY_DOES_NOT_EXIST".to_string());
        let t = SymbolTable::with_overrides(&overrides);
        assert_eq!(t.lookup("DEAD_ACUTE"), Some((EV_KEY, 40)));
        assert_eq!(t.lookup("bogus"), None);
    }

    #[test]
    fn names_round_trip_through_code_name() {
        assert_eq!(code_name(EV_KEY, 30), "KEY_A");
        assert_eq!(code_name(EV_KEY, 0x130), "BTN_SOUTH");
        assert_eq!(code_name(EV_REL, 8), "REL_WHEEL");
        assert_eq!(code_name(EV_ABS, 0x18), "ABS_PRESSURE");
        assert_eq!(code_name(EV_KEY, 0x2ff), "UNKNOWN");
    }
}
