//! Event producers: one reader thread per grabbed sub-device.
//!
//! Each producer owns its exclusively-grabbed device, tags kernel events
//! with the sub-device's origin hash and delivers them, in kernel order,
//! into the injection's merge channel. A stop flag is observed within one
//! 50 ms poll tick; the grab is always released on the way out.

use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;

use crate::event::{self, OriginHash, TaggedEvent};

/// How long a producer sleeps in `poll(2)` before re-checking its stop
/// flag.
const POLL_TICK_MS: i32 = 50;

pub fn spawn(
    mut device: evdev::Device,
    path: PathBuf,
    origin: OriginHash,
    tx: Sender<TaggedEvent>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("producer-{}", path.display()))
        .spawn(move || {
            run(&mut device, &path, origin, &tx, &stop);
            // Release the grab so the device works normally again. The
            // node may already be gone if the hardware was unplugged.
            if let Err(err) = device.ungrab() {
                tracing::debug!(path = %path.display(), %err, "ungrab failed");
            }
            tracing::debug!(path = %path.display(), "producer stopped");
        })
        .expect("spawning producer thread")
}

fn run(
    device: &mut evdev::Device,
    path: &PathBuf,
    origin: OriginHash,
    tx: &Sender<TaggedEvent>,
    stop: &AtomicBool,
) {
    let fd = device.as_raw_fd();
    tracing::debug!(path = %path.display(), origin, "producer started");

    while !stop.load(Ordering::SeqCst) {
        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: pollfd points at a valid struct for the duration of the
        // call and fd stays open while the device handle is alive.
        let ready = unsafe { libc::poll(&mut pollfd, 1, POLL_TICK_MS) };
        if ready < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            tracing::warn!(path = %path.display(), %err, "poll failed, dropping producer");
            return;
        }
        if ready == 0 {
            continue;
        }
        if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            tracing::info!(path = %path.display(), "device went away");
            return;
        }

        let events: Vec<evdev::InputEvent> = match device.fetch_events() {
            Ok(events) => events.collect(),
            Err(err) => {
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                // ENODEV when the hardware disappears mid-run: this
                // producer dies, the rest of the injection keeps going.
                tracing::info!(path = %path.display(), %err, "read failed, dropping producer");
                return;
            }
        };

        for raw in events {
            let tagged = TaggedEvent::new(raw.into(), origin, event::event_microseconds(&raw));
            if tx.send(tagged).is_err() {
                // Engine side is gone; nothing left to deliver to.
                return;
            }
        }
    }
}
