//! The plain `(type, code, value)` event triple and its tagged form.
//!
//! Everything downstream of the producers works on [`Event`] rather than the
//! evdev crate's own types, so handlers and the macro runtime can be driven
//! from tests without a kernel device behind them.

use std::time::{SystemTime, UNIX_EPOCH};

// Kernel event type numbers. The evdev crate has an `EventType` newtype for
// these, but handlers index routing tables by raw u16 and presets store the
// number, so the constants live here once.
pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;
pub const EV_ABS: u16 = 0x03;
pub const EV_MSC: u16 = 0x04;
pub const EV_LED: u16 = 0x11;
pub const EV_FF: u16 = 0x15;

pub const SYN_REPORT: u16 = 0x00;

pub const REL_X: u16 = 0x00;
pub const REL_Y: u16 = 0x01;
pub const REL_HWHEEL: u16 = 0x06;
pub const REL_WHEEL: u16 = 0x08;

/// Identifies which sub-device of a group produced an event. Stable across
/// restarts for the same hardware (hash of the kernel identity fields).
pub type OriginHash = u64;

/// One kernel input event, decoupled from any device handle.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Event {
    pub ty: u16,
    pub code: u16,
    pub value: i32,
}

impl Event {
    pub const fn new(ty: u16, code: u16, value: i32) -> Self {
        Event { ty, code, value }
    }

    pub const fn key(code: u16, value: i32) -> Self {
        Event::new(EV_KEY, code, value)
    }

    #[inline]
    pub fn is_key(&self) -> bool {
        self.ty == EV_KEY
    }

    /// KEY value 1 is press, 2 is hold/repeat. Both count as "down".
    #[inline]
    pub fn is_key_down(&self) -> bool {
        self.ty == EV_KEY && self.value >= 1
    }

    #[inline]
    pub fn is_key_up(&self) -> bool {
        self.ty == EV_KEY && self.value == 0
    }

    /// SYN and MSC events are batch markers, never mapping triggers.
    #[inline]
    pub fn is_marker(&self) -> bool {
        self.ty == EV_SYN || self.ty == EV_MSC
    }
}

impl From<evdev::InputEvent> for Event {
    fn from(ev: evdev::InputEvent) -> Self {
        Event {
            ty: ev.event_type().0,
            code: ev.code(),
            value: ev.value(),
        }
    }
}

impl From<Event> for evdev::InputEvent {
    fn from(ev: Event) -> Self {
        evdev::InputEvent::new(ev.ty, ev.code, ev.value)
    }
}

/// An event as it leaves a producer: the raw triple, the sub-device it came
/// from, and its timestamp in microseconds since the epoch.
#[derive(Copy, Clone, Debug)]
pub struct TaggedEvent {
    pub event: Event,
    pub origin: OriginHash,
    pub time_us: u64,
}

impl TaggedEvent {
    pub fn new(event: Event, origin: OriginHash, time_us: u64) -> Self {
        TaggedEvent {
            event,
            origin,
            time_us,
        }
    }
}

/// Microseconds since the epoch for an evdev event, falling back to the
/// current clock when the kernel timestamp is unusable.
pub fn event_microseconds(ev: &evdev::InputEvent) -> u64 {
    ev.timestamp()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_else(|_| now_microseconds())
}

/// Wall-clock microseconds since the epoch. The injection loop stamps timer
/// ticks with this; handlers never read clocks themselves.
pub fn now_microseconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
