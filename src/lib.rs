pub mod debug;
pub mod error;
pub mod hang;
pub mod inspector;
pub mod process;
pub mod profiling;
pub mod source_map;

pub use debug::{DebugSession, SessionManager};
pub use error::Error;
pub use hang::{HangCheckConfig, HangDetector, HangResult};

pub type Result<T> = std::result::Result<T, Error>;
