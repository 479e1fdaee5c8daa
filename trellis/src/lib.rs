//! The trellis streaming statistics daemon.
//!
//! This library supports the trellis binary found elsewhere in this project.
//! Feeds receive or generate samples, the pipeline decodes and records them
//! into a shared [`trellis_accumulator::RollingAccumulator`], and the reporter
//! publishes running sum, count and rolling average.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod feed;
pub mod payload;
pub mod pipeline;
pub mod report;
pub mod signals;
