//! Cooperative scheduler over macro tasks.
//!
//! Single-threaded per injection: the injection loop calls `poll` between
//! channel receives, passing the current time. Tasks run until their next
//! suspension point; the runtime tracks who wants to wake when and exposes
//! the earliest deadline so the loop can size its receive timeout.

use std::collections::HashMap;
use std::sync::Arc;

use crate::macros::ast::Program;
use crate::macros::task::{MacroTask, Poll, TaskCtx};
use crate::preset::TargetUinput;

#[derive(Debug, Default)]
pub struct RuntimeStats {
    pub spawned: u64,
    pub completed: u64,
    pub errors: u64,
}

struct TaskSlot {
    task: MacroTask,
    pending: Poll,
}

#[derive(Default)]
pub struct MacroRuntime {
    tasks: HashMap<u64, TaskSlot>,
    /// Latest press instance per mapping, for routing releases.
    by_mapping: HashMap<usize, u64>,
    next_id: u64,
    stats: RuntimeStats,
}

impl MacroRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Earliest wake-up any task is waiting for.
    pub fn next_deadline(&self) -> Option<u64> {
        self.tasks
            .values()
            .filter_map(|slot| slot.pending.deadline())
            .min()
    }

    /// Starts a new task for a mapping press and runs it to its first
    /// suspension point.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        &mut self,
        mapping_idx: usize,
        program: Arc<Program>,
        target: TargetUinput,
        key_sleep_ms: u64,
        rel_rate: u32,
        trigger_codes: Vec<(u16, u16)>,
        mapping_name: String,
        now_us: u64,
        cx: &TaskCtx,
    ) {
        let id = self.next_id;
        self.next_id += 1;
        self.stats.spawned += 1;
        let task = MacroTask::new(
            program,
            target,
            key_sleep_ms,
            rel_rate,
            trigger_codes,
            mapping_name,
        );
        self.tasks.insert(id, TaskSlot {
            task,
            pending: Poll::Sleeping(now_us),
        });
        self.by_mapping.insert(mapping_idx, id);
        self.poll_task(id, now_us, cx);
    }

    /// The trigger of a mapping's latest press instance was released.
    pub fn release(&mut self, mapping_idx: usize, now_us: u64, cx: &TaskCtx) {
        if let Some(&id) = self.by_mapping.get(&mapping_idx) {
            if let Some(slot) = self.tasks.get_mut(&id) {
                slot.task.release(now_us);
            }
            self.poll_task(id, now_us, cx);
        }
    }

    /// A key was pressed somewhere in the injection. Tasks watching for
    /// "another key" (`if_single`, `mod_tap`) re-evaluate.
    pub fn note_key_press(&mut self, ty: u16, code: u16, now_us: u64, cx: &TaskCtx) {
        let ids: Vec<u64> = self.tasks.keys().copied().collect();
        for id in ids {
            if let Some(slot) = self.tasks.get_mut(&id) {
                slot.task.note_key_press(ty, code);
            }
            self.poll_task(id, now_us, cx);
        }
    }

    /// Runs every task that is due at `now_us`.
    pub fn poll(&mut self, now_us: u64, cx: &TaskCtx) {
        let due: Vec<u64> = self
            .tasks
            .iter()
            .filter(|(_, slot)| slot.pending.deadline().is_some_and(|t| t <= now_us))
            .map(|(&id, _)| id)
            .collect();
        for id in due {
            self.poll_task(id, now_us, cx);
        }
    }

    /// Cooperative cancellation: flips every held flag and polls. Sleeps
    /// still complete on schedule, so the caller keeps polling until
    /// [`is_idle`] or its drain bound expires.
    pub fn cancel_all(&mut self, now_us: u64, cx: &TaskCtx) {
        for slot in self.tasks.values_mut() {
            slot.task.release(now_us);
        }
        let ids: Vec<u64> = self.tasks.keys().copied().collect();
        for id in ids {
            self.poll_task(id, now_us, cx);
        }
    }

    /// Hard teardown after the drain bound: emit owed key-up edges and
    /// drop every task.
    pub fn abort_all(&mut self, cx: &TaskCtx) {
        for slot in self.tasks.values_mut() {
            slot.task.abort(cx);
        }
        self.tasks.clear();
        self.by_mapping.clear();
    }

    fn poll_task(&mut self, id: u64, now_us: u64, cx: &TaskCtx) {
        // A task may come due again immediately (zero-length key gaps);
        // keep polling it until it parks in the future or finishes.
        loop {
            let Some(slot) = self.tasks.get_mut(&id) else {
                return;
            };
            match slot.task.poll(now_us, cx) {
                Ok(Poll::Done) => {
                    self.stats.completed += 1;
                    self.remove(id);
                    return;
                }
                Ok(pending) => {
                    let again = pending.deadline().is_some_and(|t| t <= now_us);
                    slot.pending = pending;
                    if !again {
                        return;
                    }
                }
                Err(err) => {
                    self.stats.errors += 1;
                    tracing::warn!(mapping = slot.task.mapping_name(), %err, "macro task failed");
                    slot.task.abort(cx);
                    self.remove(id);
                    return;
                }
            }
        }
    }

    fn remove(&mut self, id: u64) {
        self.tasks.remove(&id);
        self.by_mapping.retain(|_, &mut v| v != id);
    }
}
