//! Boundaries to the mailbox and the platform clock.
use core::time::Duration;

use crate::shmem::SharedMemory;

/// The mailbox the coprocessor is reached through.
///
/// Inbound messages are delivered by the embedder calling [crate::Dcp::receive].
/// `send_message` must not deliver a reply by calling back into the engine before it returns.
pub trait Transport: Send + Sync {
    /// Ring the doorbell of `endpoint` with a raw 64-bit message.
    fn send_message(&self, endpoint: u8, message: u64);

    /// The region announced to the firmware with `SET_SHMEM`.
    fn shared_memory(&self) -> &SharedMemory;
}

pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary epoch.
    fn now(&self) -> Duration;

    /// Wall clock time in nanoseconds, handed to the firmware when it asks.
    fn realtime_ns(&self) -> u64;

    /// Called in the body of bounded busy waits.
    fn relax(&self) {
        core::hint::spin_loop();
    }
}
