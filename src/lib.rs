pub mod app;
pub mod domain;
pub mod error;
pub mod executor;
pub mod fs_util;
pub mod manifest;
pub mod output;
pub mod sanitiser;
pub mod scanner;
pub mod transform;
