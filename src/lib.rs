pub mod config;
pub mod supervision;
pub mod workers;
