//! Configuration loading and management

mod live;
mod settings;

pub use live::*;
pub use settings::*;
