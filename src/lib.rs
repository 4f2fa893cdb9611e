//! # Squash - Docker Image Layer Squashing Tool
//!
//! A command-line tool for squashing Docker image layers, written in Rust.
//!
//! ## Features
//!
//! - **Multiple Input Sources**: export an image name:tag from the Docker
//!   daemon, or read an already-exported archive directly
//! - **Flexible Output**: save to a file, load directly into Docker, or both
//! - **Layer Selection**: squash the last N layers, or everything from a
//!   given layer id onward
//! - **Temporary Directory Support**: configure where intermediate files are
//!   stored
//! - **Verbose Output**: narrates each step of the squash when requested
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use squash::{cli::Cli, docker::DockerImage};
//! use clap::Parser;
//!
//! // Parse command line arguments
//! let cli = Cli::parse();
//!
//! // Load and process Docker image
//! // (This is a simplified example - see main.rs for complete implementation)
//! ```

/// Command line interface definitions
pub mod cli;
/// Docker image manipulation utilities
pub mod docker;
/// Error types and handling
pub mod error;

pub use cli::*;
pub use error::*;
