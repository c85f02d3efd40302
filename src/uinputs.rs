//! Virtual output devices.
//!
//! A fixed set of named uinput sinks (`keyboard`, `mouse`, `gamepad`,
//! `stylus`, `keyboard+mouse`) is opened once per daemon, each with a
//! hardcoded capability set sized to its role. Injections additionally own
//! a per-group "forwarded" device mirroring the grabbed hardware, so
//! unmapped activity still reaches the host.
//!
//! Everything behind [`OutputSink`] is the process's only writer of
//! `/dev/uinput`; producers never touch it. Writes are serialized per
//! device and the kernel sees a SYN_REPORT after every batch.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use evdev::uinput::VirtualDevice;
use evdev::{AbsInfo, AbsoluteAxisCode, AttributeSet, KeyCode, RelativeAxisCode, UinputAbsSetup};

use crate::error::Error;
use crate::event::{Event, EV_ABS, EV_KEY, EV_REL};
use crate::preset::TargetUinput;

/// Bounded retry for transient uinput write failures before the single
/// emission is dropped.
const WRITE_RETRIES: usize = 3;

/// An ABS axis a virtual device advertises, with its declared range.
#[derive(Copy, Clone, Debug)]
pub struct AbsAxisSpec {
    pub code: u16,
    pub min: i32,
    pub max: i32,
}

const GAMEPAD_ABS: &[AbsAxisSpec] = &[
    AbsAxisSpec { code: 0x00, min: -32768, max: 32767 }, // ABS_X
    AbsAxisSpec { code: 0x01, min: -32768, max: 32767 }, // ABS_Y
    AbsAxisSpec { code: 0x02, min: 0, max: 255 },        // ABS_Z
    AbsAxisSpec { code: 0x03, min: -32768, max: 32767 }, // ABS_RX
    AbsAxisSpec { code: 0x04, min: -32768, max: 32767 }, // ABS_RY
    AbsAxisSpec { code: 0x05, min: 0, max: 255 },        // ABS_RZ
    AbsAxisSpec { code: 0x10, min: -1, max: 1 },         // ABS_HAT0X
    AbsAxisSpec { code: 0x11, min: -1, max: 1 },         // ABS_HAT0Y
];

const STYLUS_ABS: &[AbsAxisSpec] = &[
    AbsAxisSpec { code: 0x00, min: 0, max: 32767 },  // ABS_X
    AbsAxisSpec { code: 0x01, min: 0, max: 32767 },  // ABS_Y
    AbsAxisSpec { code: 0x18, min: 0, max: 4095 },   // ABS_PRESSURE
    AbsAxisSpec { code: 0x1a, min: -64, max: 63 },   // ABS_TILT_X
    AbsAxisSpec { code: 0x1b, min: -64, max: 63 },   // ABS_TILT_Y
];

const MOUSE_REL: &[u16] = &[
    0x00, // REL_X
    0x01, // REL_Y
    0x06, // REL_HWHEEL
    0x08, // REL_WHEEL
    0x0b, // REL_WHEEL_HI_RES
    0x0c, // REL_HWHEEL_HI_RES
];

fn keyboard_key(code: u16) -> bool {
    // The full KEY space minus the BTN ranges (mouse, joystick, digitizer).
    matches!(code, 1..=0xff | 0x160..=0x2bf)
}

fn mouse_btn(code: u16) -> bool {
    // BTN_LEFT .. BTN_TASK
    (0x110..=0x117).contains(&code)
}

fn gamepad_btn(code: u16) -> bool {
    // BTN_SOUTH .. BTN_THUMBR and the dpad buttons.
    matches!(code, 0x130..=0x13e | 0x220..=0x223)
}

fn stylus_btn(code: u16) -> bool {
    // BTN_TOOL_PEN, BTN_TOUCH, BTN_STYLUS, BTN_STYLUS2
    matches!(code, 0x140 | 0x14a | 0x14b | 0x14c)
}

/// ABS axes the target declares.
pub fn abs_axes(target: TargetUinput) -> &'static [AbsAxisSpec] {
    match target {
        TargetUinput::Gamepad => GAMEPAD_ABS,
        TargetUinput::Stylus => STYLUS_ABS,
        _ => &[],
    }
}

/// Declared range of one of the target's ABS axes.
pub fn abs_range(target: TargetUinput, code: u16) -> Option<(i32, i32)> {
    abs_axes(target)
        .iter()
        .find(|spec| spec.code == code)
        .map(|spec| (spec.min, spec.max))
}

/// Whether the target's fixed capability set covers `(ty, code)`.
/// Validation rejects mapping outputs this returns false for.
pub fn advertises(target: TargetUinput, ty: u16, code: u16) -> bool {
    match (target, ty) {
        (TargetUinput::Keyboard, EV_KEY) => keyboard_key(code),
        (TargetUinput::Mouse, EV_KEY) => mouse_btn(code),
        (TargetUinput::Mouse, EV_REL) => MOUSE_REL.contains(&code),
        (TargetUinput::Gamepad, EV_KEY) => gamepad_btn(code),
        (TargetUinput::Gamepad, EV_ABS) => abs_range(target, code).is_some(),
        (TargetUinput::Stylus, EV_KEY) => stylus_btn(code),
        (TargetUinput::Stylus, EV_ABS) => abs_range(target, code).is_some(),
        (TargetUinput::KeyboardMouse, EV_KEY) => keyboard_key(code) || mouse_btn(code),
        (TargetUinput::KeyboardMouse, EV_REL) => MOUSE_REL.contains(&code),
        _ => false,
    }
}

fn key_codes(target: TargetUinput) -> Vec<u16> {
    let mut codes = Vec::new();
    for code in 0..=0x2bfu16 {
        if advertises(target, EV_KEY, code) {
            codes.push(code);
        }
    }
    codes
}

fn rel_codes(target: TargetUinput) -> Vec<u16> {
    MOUSE_REL
        .iter()
        .copied()
        .filter(|&code| advertises(target, EV_REL, code))
        .collect()
}

fn map_open_err(what: &str, err: std::io::Error) -> Error {
    if err.kind() == ErrorKind::PermissionDenied {
        Error::PermissionDenied(format!("{what}: {err}"))
    } else {
        Error::Io(err)
    }
}

fn build_device(target: TargetUinput) -> Result<VirtualDevice, Error> {
    let name = format!("remapd {}", target.name());
    let mut builder = VirtualDevice::builder()
        .map_err(|e| map_open_err("opening /dev/uinput", e))?
        .name(name.as_str());

    let keys: Vec<u16> = key_codes(target);
    if !keys.is_empty() {
        let mut set = AttributeSet::<KeyCode>::new();
        for code in keys {
            set.insert(KeyCode::new(code));
        }
        builder = builder
            .with_keys(&set)
            .map_err(|e| map_open_err("declaring key capabilities", e))?;
    }

    let rels: Vec<u16> = rel_codes(target);
    if !rels.is_empty() {
        let mut set = AttributeSet::<RelativeAxisCode>::new();
        for code in rels {
            set.insert(RelativeAxisCode(code));
        }
        builder = builder
            .with_relative_axes(&set)
            .map_err(|e| map_open_err("declaring relative axes", e))?;
    }

    for spec in abs_axes(target) {
        let info = AbsInfo::new(0, spec.min, spec.max, 0, 0, 0);
        let setup = UinputAbsSetup::new(AbsoluteAxisCode(spec.code), info);
        builder = builder
            .with_absolute_axis(&setup)
            .map_err(|e| map_open_err("declaring absolute axes", e))?;
    }

    builder
        .build()
        .map_err(|e| map_open_err("creating virtual device", e))
}

/// The daemon-lifetime set of named virtual outputs. Multiple injections
/// share these, so writes go through a per-device lock.
pub struct OutputRegistry {
    devices: Vec<(TargetUinput, Mutex<VirtualDevice>)>,
}

impl OutputRegistry {
    /// Opens every named output. Any failure is a pre-flight error.
    pub fn create() -> Result<Self, Error> {
        let mut devices = Vec::with_capacity(TargetUinput::ALL.len());
        for target in TargetUinput::ALL {
            let device = build_device(target)?;
            tracing::debug!(target = target.name(), "created virtual output");
            devices.push((target, Mutex::new(device)));
        }
        Ok(OutputRegistry { devices })
    }

    /// Writes one event (plus the trailing SYN_REPORT) to a named output,
    /// retrying transient failures a bounded number of times.
    pub fn emit(&self, target: TargetUinput, event: Event) -> Result<(), Error> {
        let device = self
            .devices
            .iter()
            .find(|(t, _)| *t == target)
            .map(|(_, d)| d)
            .ok_or_else(|| Error::Fatal(format!("unknown output `{}`", target.name())))?;
        let mut device = device.lock().unwrap_or_else(|p| p.into_inner());
        write_with_retry(&mut device, event)
    }
}

fn write_with_retry(device: &mut VirtualDevice, event: Event) -> Result<(), Error> {
    let raw: evdev::InputEvent = event.into();
    let mut last_err = None;
    for _ in 0..WRITE_RETRIES {
        match device.emit(&[raw]) {
            Ok(()) => return Ok(()),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                last_err = Some(e);
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Err(Error::TransientIo(format!(
        "uinput write failed after {WRITE_RETRIES} attempts: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// Where an emission goes: a named output, or the injection's forwarded
/// device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Route {
    Target(TargetUinput),
    Forward,
}

/// The handler graph's and macro runtime's write boundary. The production
/// implementation fronts real uinput devices; tests capture emissions.
pub trait OutputSink: Send + Sync {
    fn emit(&self, route: Route, event: Event) -> Result<(), Error>;
}

/// Production sink: the shared registry plus this injection's forwarded
/// device.
pub struct UinputSink {
    registry: Arc<OutputRegistry>,
    forward: Mutex<VirtualDevice>,
    dropped_writes: AtomicU64,
}

impl UinputSink {
    pub fn new(registry: Arc<OutputRegistry>, forward: VirtualDevice) -> Self {
        UinputSink {
            registry,
            forward: Mutex::new(forward),
            dropped_writes: AtomicU64::new(0),
        }
    }

    pub fn dropped_writes(&self) -> u64 {
        self.dropped_writes.load(Ordering::Relaxed)
    }
}

impl OutputSink for UinputSink {
    fn emit(&self, route: Route, event: Event) -> Result<(), Error> {
        let result = match route {
            Route::Target(target) => self.registry.emit(target, event),
            Route::Forward => {
                let mut device = self.forward.lock().unwrap_or_else(|p| p.into_inner());
                write_with_retry(&mut device, event)
            }
        };
        match result {
            Err(Error::TransientIo(msg)) => {
                // Drop the single emission, keep the injection alive.
                self.dropped_writes.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%msg, "dropped one output event");
                Ok(())
            }
            other => other,
        }
    }
}

/// Creates the per-injection forwarded device, mirroring the union of the
/// grabbed sub-devices' capabilities so pass-through stays transparent.
pub fn create_forward_device(
    group_name: &str,
    sources: &[&evdev::Device],
) -> Result<VirtualDevice, Error> {
    let name = format!("remapd forwarded {group_name}");
    let mut builder = VirtualDevice::builder()
        .map_err(|e| map_open_err("opening /dev/uinput", e))?
        .name(name.as_str());

    let mut keys = AttributeSet::<KeyCode>::new();
    let mut rels = AttributeSet::<RelativeAxisCode>::new();
    let mut abs_setups: Vec<UinputAbsSetup> = Vec::new();
    let mut abs_seen: Vec<u16> = Vec::new();
    for device in sources {
        if let Some(supported) = device.supported_keys() {
            for key in supported.iter() {
                keys.insert(key);
            }
        }
        if let Some(supported) = device.supported_relative_axes() {
            for axis in supported.iter() {
                rels.insert(axis);
            }
        }
        if let Ok(absinfo) = device.get_absinfo() {
            for (axis, info) in absinfo {
                if !abs_seen.contains(&axis.0) {
                    abs_seen.push(axis.0);
                    abs_setups.push(UinputAbsSetup::new(axis, info));
                }
            }
        }
    }

    if keys.iter().next().is_some() {
        builder = builder
            .with_keys(&keys)
            .map_err(|e| map_open_err("mirroring key capabilities", e))?;
    }
    if rels.iter().next().is_some() {
        builder = builder
            .with_relative_axes(&rels)
            .map_err(|e| map_open_err("mirroring relative axes", e))?;
    }
    for setup in &abs_setups {
        builder = builder
            .with_absolute_axis(setup)
            .map_err(|e| map_open_err("mirroring absolute axes", e))?;
    }

    builder
        .build()
        .map_err(|e| map_open_err("creating forwarded device", e))
}

/// Kernel LED state queried through a (non-grabbed) device handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Led {
    CapsLock,
    NumLock,
}

pub trait LedProbe: Send + Sync {
    fn led_on(&self, led: Led) -> bool;
}

/// Probe backed by a real device node.
pub struct DeviceLeds {
    device: Mutex<evdev::Device>,
}

impl DeviceLeds {
    pub fn new(device: evdev::Device) -> Self {
        DeviceLeds {
            device: Mutex::new(device),
        }
    }
}

impl LedProbe for DeviceLeds {
    fn led_on(&self, led: Led) -> bool {
        let device = self.device.lock().unwrap_or_else(|p| p.into_inner());
        let wanted = match led {
            Led::CapsLock => evdev::LedCode::LED_CAPSL,
            Led::NumLock => evdev::LedCode::LED_NUML,
        };
        device
            .get_led_state()
            .map(|state| state.contains(wanted))
            .unwrap_or(false)
    }
}

/// Probe for groups with no LED-capable sub-device.
pub struct NoLeds;

impl LedProbe for NoLeds {
    fn led_on(&self, _led: Led) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_covers_keys_not_buttons() {
        assert!(advertises(TargetUinput::Keyboard, EV_KEY, 30));
        assert!(advertises(TargetUinput::Keyboard, EV_KEY, 0x160));
        assert!(!advertises(TargetUinput::Keyboard, EV_KEY, 0x110));
        assert!(!advertises(TargetUinput::Keyboard, EV_REL, 0));
    }

    #[test]
    fn mouse_covers_buttons_and_motion() {
        assert!(advertises(TargetUinput::Mouse, EV_KEY, 0x110));
        assert!(advertises(TargetUinput::Mouse, EV_REL, 0));
        assert!(advertises(TargetUinput::Mouse, EV_REL, 8));
        assert!(!advertises(TargetUinput::Mouse, EV_KEY, 30));
        assert!(!advertises(TargetUinput::Mouse, EV_ABS, 0));
    }

    #[test]
    fn gamepad_covers_sticks() {
        assert!(advertises(TargetUinput::Gamepad, EV_ABS, 0));
        assert!(advertises(TargetUinput::Gamepad, EV_KEY, 0x130));
        assert_eq!(abs_range(TargetUinput::Gamepad, 0), Some((-32768, 32767)));
        assert_eq!(abs_range(TargetUinput::Gamepad, 2), Some((0, 255)));
        assert!(!advertises(TargetUinput::Gamepad, EV_REL, 0));
    }

    #[test]
    fn stylus_covers_pen_tools() {
        assert!(advertises(TargetUinput::Stylus, EV_ABS, 0x18));
        assert!(advertises(TargetUinput::Stylus, EV_KEY, 0x140));
        assert!(!advertises(TargetUinput::Stylus, EV_KEY, 30));
    }

    #[test]
    fn keyboard_mouse_is_the_union() {
        assert!(advertises(TargetUinput::KeyboardMouse, EV_KEY, 30));
        assert!(advertises(TargetUinput::KeyboardMouse, EV_KEY, 0x110));
        assert!(advertises(TargetUinput::KeyboardMouse, EV_REL, 0));
        assert!(!advertises(TargetUinput::KeyboardMouse, EV_ABS, 0));
    }
}
