#[macro_use]
extern crate tracing;

pub mod config;
pub mod output;
pub mod report;
pub mod signal;
pub mod trace;
