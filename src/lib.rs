pub mod chart;
pub mod config;
pub mod interpret;
pub mod location;
pub mod logging;
pub mod pipeline;
pub mod server;
