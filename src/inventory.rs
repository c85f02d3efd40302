//! Device inventory: enumerates evdev nodes and groups the sub-devices
//! that belong to one physical controller under a stable group key.
//!
//! Identity is `(vendor, product, name)` plus the physical topology root
//! as a tie-breaker, so two otherwise identical controllers on different
//! ports stay apart. The key survives re-plugs and event-node renumbering.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};

use crate::event::OriginHash;

/// One physical controller: a stable key, the kernel name, and its event
/// nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGroup {
    pub key: String,
    pub name: String,
    pub paths: Vec<PathBuf>,
}

/// FNV-1a, used for origin hashes and group-key tie-breakers so the values
/// are stable across runs and builds.
fn fnv1a64(parts: &[&[u8]]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for part in parts {
        for &byte in *part {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    hash
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Identity {
    vendor: u16,
    product: u16,
    name: String,
    phys_root: String,
}

impl Identity {
    fn of(device: &evdev::Device) -> Self {
        let id = device.input_id();
        let name = device.name().unwrap_or("unknown").to_string();
        // "usb-0000:00:14.0-3/input0" and "usb-0000:00:14.0-3/input1"
        // belong to the same controller.
        let phys_root = device
            .physical_path()
            .map(|p| p.split('/').next().unwrap_or(p).to_string())
            .unwrap_or_default();
        Identity {
            vendor: id.vendor(),
            product: id.product(),
            name,
            phys_root,
        }
    }

    fn group_key(&self) -> String {
        let slug: String = self
            .name
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect::<String>()
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        let tiebreak = fnv1a64(&[
            &self.vendor.to_le_bytes(),
            &self.product.to_le_bytes(),
            self.name.as_bytes(),
            self.phys_root.as_bytes(),
        ]);
        format!("{slug}-{:08x}", tiebreak as u32)
    }
}

/// Stable hash identifying one sub-device of a group, recorded into
/// `InputConfig::origin_hash` by recording tools.
pub fn origin_hash(device: &evdev::Device) -> OriginHash {
    let id = device.input_id();
    let name = device.name().unwrap_or("unknown");
    let phys = device.physical_path().unwrap_or("");
    fnv1a64(&[
        &id.vendor().to_le_bytes(),
        &id.product().to_le_bytes(),
        name.as_bytes(),
        phys.as_bytes(),
    ])
}

/// Enumerates `/dev/input/event*` and groups sub-devices. Nodes that fail
/// to open (permissions, races with unplug) are skipped.
pub fn list_groups() -> io::Result<Vec<DeviceGroup>> {
    let mut groups: BTreeMap<Identity, Vec<PathBuf>> = BTreeMap::new();
    for (path, device) in evdev::enumerate() {
        groups.entry(Identity::of(&device)).or_default().push(path);
    }
    let mut out = Vec::with_capacity(groups.len());
    for (identity, mut paths) in groups {
        paths.sort();
        out.push(DeviceGroup {
            key: identity.group_key(),
            name: identity.name,
            paths,
        });
    }
    Ok(out)
}

/// Event node paths for one group key; empty when the group is not
/// currently present.
pub fn resolve(group_key: &str) -> io::Result<Vec<PathBuf>> {
    Ok(list_groups()?
        .into_iter()
        .find(|g| g.key == group_key)
        .map(|g| g.paths)
        .unwrap_or_default())
}

/// A change in the set of connected groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventoryEvent {
    Appeared(DeviceGroup),
    Disappeared(String),
}

/// Polls the inventory and reports appear/disappear transitions. The
/// thread exits when `stop` is set or the receiver is dropped.
pub fn watch(stop: Arc<AtomicBool>, period: Duration) -> (JoinHandle<()>, Receiver<InventoryEvent>) {
    let (tx, rx) = bounded(64);
    let handle = std::thread::Builder::new()
        .name("inventory-watch".into())
        .spawn(move || {
            let mut known: Vec<DeviceGroup> = list_groups().unwrap_or_default();
            while !stop.load(Ordering::SeqCst) {
                std::thread::sleep(period);
                let current = match list_groups() {
                    Ok(groups) => groups,
                    Err(err) => {
                        tracing::debug!(%err, "inventory scan failed");
                        continue;
                    }
                };
                for group in &current {
                    if !known.iter().any(|g| g.key == group.key)
                        && tx.send(InventoryEvent::Appeared(group.clone())).is_err()
                    {
                        return;
                    }
                }
                for group in &known {
                    if !current.iter().any(|g| g.key == group.key)
                        && tx
                            .send(InventoryEvent::Disappeared(group.key.clone()))
                            .is_err()
                    {
                        return;
                    }
                }
                known = current;
            }
        })
        .expect("spawning inventory watcher");
    (handle, rx)
}
