#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod cli;
pub mod clone;
pub mod config;
pub mod connection;
pub mod dialog;
pub mod disk;
pub mod error;
pub mod history;
pub mod host;
pub mod logging;
pub mod paths;
pub mod probe;
pub mod progress;

#[cfg(test)]
pub(crate) mod test_util;
