//! Command-line interface for ljprof

pub mod args;

pub use args::{parse_address, parse_max_depth, Args, Command, SnapshotArgs};
