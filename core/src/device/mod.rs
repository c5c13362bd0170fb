pub mod aica;
pub mod gdrom;
pub mod graphics_iface;
pub mod holly;

pub use aica::Aica;
pub use gdrom::GdromDrive;
pub use holly::Holly;
