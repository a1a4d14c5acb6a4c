pub mod engine;
pub mod paths;
pub mod sink;
pub mod tracking;
