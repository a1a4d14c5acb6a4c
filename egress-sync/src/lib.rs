pub mod config;
pub mod logging;
pub mod runtime;
pub mod sync;
