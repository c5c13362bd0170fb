/// Generic CPU interface shared by the host and audio cores.
pub trait Cpu {
    /// Reset to power-on state (vector fetch happens on the next dispatch).
    fn reset(&mut self);

    /// Query whether the CPU is internally halted (SLEEP/STOP-equivalent,
    /// or the audio CPU's external reset line).
    fn is_sleeping(&self) -> bool;
}

pub mod state;
pub use state::{Arm7State, CpuStateTrait, Sh4State};

pub mod sh4;
pub use sh4::Sh4;

pub mod arm7;
pub use arm7::Arm7;
