//! Static addressing settings
//!
//! Settings sources and the watcher that turns their updates into tracker
//! inputs.

pub mod file;
pub mod memory;
pub mod watcher;

pub use file::FileSettingsSource;
pub use memory::MemorySettingsSource;
pub use watcher::SettingsWatcher;
