//! # bodyscale-monitor
//!
//! Host process for the bodyscale protocol engine. It owns no protocol
//! logic: it loads configuration, runs a live session or an explicitly
//! labelled simulation, and writes every measurement to stdout as one JSON
//! object per line.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod cli;
pub mod logging;
pub mod output;
pub mod runner;
