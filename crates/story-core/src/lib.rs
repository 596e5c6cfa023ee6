pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod git;
pub mod ingest;
pub mod io;
pub mod optimize;
pub mod paths;
pub mod probe;
pub mod prompt;
pub mod remote;
pub mod stage;
pub mod story;

pub use error::{Result, StoryError};
