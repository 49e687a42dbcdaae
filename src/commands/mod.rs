//! Command implementations for lookout CLI

mod check;
mod misc;
mod watchers;

pub use check::*;
pub use misc::*;
pub use watchers::*;
