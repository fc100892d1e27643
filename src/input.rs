// ============================================================================
// input.rs: pixelswarm
// Single-slot "latest pointer" cell shared between the event source and the
// tick loop. Newer events overwrite older ones; nothing queues.
// ============================================================================

use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct PointerSlot {
    latest: Mutex<Option<[f32; 2]>>,
}

impl PointerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pointer position in display units, replacing any unread one.
    pub fn publish(&self, x: f32, y: f32) {
        *self.lock() = Some([x, y]);
    }

    /// Read and clear: `Some` only if a position arrived since the last take.
    pub fn take(&self) -> Option<[f32; 2]> {
        self.lock().take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<[f32; 2]>> {
        // The slot holds plain data, so a poisoned lock is still usable.
        self.latest.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
