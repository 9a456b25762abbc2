pub mod cli;
pub mod config;
pub mod logging;
pub mod portal;
pub mod scheduler;
pub mod utils;
