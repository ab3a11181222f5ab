#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod address;
pub mod cli;
pub mod config;
pub mod error;
pub mod image;
pub mod instance;
pub mod lifecycle;
pub mod output;
pub mod paths;
pub mod process;
