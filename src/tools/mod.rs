//! The tools module provides several helpers shared across the compressor.
//!
//! The tools are:
//! - cli: Command line interface options and parser.
//! - context: Untyped string map driving transform/entropy selection.
//! - magic: Content type detection from leading magic bytes.
//!
pub mod cli;
pub mod context;
pub mod magic;
