pub mod machine;

pub use machine::Emulator;
