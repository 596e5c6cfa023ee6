pub mod config;
pub mod generate;
pub mod git;
pub mod stories;
