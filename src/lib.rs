pub mod connection_settings;
pub mod echonetlite;
pub mod j11;
pub mod operation;
pub mod pairing;

pub use connection_settings::*;
pub use operation::{FrameConsumer, LogConsumer, RunOptions, run};
pub use pairing::*;
