pub mod config;
pub mod daemon;
pub mod network;
pub mod sync;
