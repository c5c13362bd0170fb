use crate::error::TerminationReason;

/// Machine-agnostic run-loop interface. There is exactly one concrete
/// implementation in this workspace (`dc_machines::Dreamcast`), but the
/// trait keeps the frontend binary decoupled from the aggregate's
/// internals.
pub trait Emulator {
    /// Run until the next end-of-frame flag, a fatal error, or the kill
    /// flag is observed — whichever comes first.
    fn run_frame(&mut self) -> Option<TerminationReason>;

    /// Request termination at the next frame boundary: a user-visible
    /// kill flag, checked at frame boundaries, terminates the loop.
    fn request_kill(&mut self);

    /// Reset to power-on state.
    fn reset(&mut self);

    /// Aggregate cycle counts for the performance summary printed on exit:
    /// `(host_cycles, audio_cycles)`.
    fn cycle_counts(&self) -> (u64, u64);
}
