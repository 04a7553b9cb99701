pub mod messages;
pub mod stats;

pub use messages::*;
pub use stats::*;
