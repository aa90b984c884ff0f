pub mod cli;
pub mod config;
pub mod exec;
pub mod graph;
pub mod pipelines;
pub mod utils;
pub use cli::Arguments;
