//! Background timer handles.

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Holds at most one outstanding background task.
///
/// The slot lock is held while a task is spawned, so a task that clears its
/// own slot on wake-up always finds its handle already stored.
#[derive(Debug, Default)]
pub(crate) struct TimerSlot {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerSlot {
    /// Stores the task returned by `spawn` unless a live task is already
    /// held. Returns true if a task was armed.
    pub(crate) fn arm_if_idle(&self, spawn: impl FnOnce() -> JoinHandle<()>) -> bool {
        let mut slot = self.handle.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        *slot = Some(spawn());
        true
    }

    /// Forgets the held task without aborting it. Called by the task itself
    /// once it fires.
    pub(crate) fn disarm(&self) {
        self.handle.lock().take();
    }

    /// Aborts the held task.
    pub(crate) fn cancel(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
