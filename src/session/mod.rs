//! Session lifecycle: debounced settings, generation-gated connection
//! management and drain-based shutdown.

pub mod debounce;
pub mod generation;
pub mod lifecycle;
pub mod shutdown;

pub use debounce::{ConfigDebouncer, DebounceVerdict};
pub use generation::Generation;
pub use lifecycle::SourceShared;
pub use shutdown::{CallbackTracker, InflightGuard};
