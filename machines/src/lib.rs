pub mod dreamcast;

pub use dreamcast::Dreamcast;
