pub mod agent;
pub mod config;
pub mod error;
pub mod ids;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod room;
pub mod transport;
pub mod watcher;
