#![forbid(unsafe_code)]

pub mod cli;
pub mod reporter;
pub mod setup;
