//! Runtime wiring: logging and pipeline bootstrap.

pub mod boot;
