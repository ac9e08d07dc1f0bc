pub mod cli;
pub mod drive;
pub mod load_config;
pub mod oauth;
pub mod s3;

pub use cli::{run, Cli, Commands};
