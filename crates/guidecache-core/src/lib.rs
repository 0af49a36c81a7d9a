//! guidecache core library
//!
//! Configuration, generation naming and error types shared by the worker and
//! its collaborators.

pub mod config;
pub mod error;
pub mod types;

pub use config::GuideConfig;
pub use error::{CoreError, CoreResult};
pub use types::{Generation, PartitionKind, DEV_MARKER};
