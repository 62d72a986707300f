pub mod error;
pub mod config;
pub mod session;
pub mod util;

pub use error::{ConfigError, Result, SessionError, SessionkitError, StorageError};
pub use session::{Payload, SessionManager, SessionRecord};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");
/// Version with the build's commit, e.g. `0.2.0 (1a2b3c4)`.
pub const LONG_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");
