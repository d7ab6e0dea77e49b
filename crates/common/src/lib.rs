//! Common utilities and shared types for inbox-guard.
//!
//! This crate provides the foundational pieces used across all inbox-guard crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//!
//! # Example
//!
//! ```no_run
//! use inbox_guard_common::{AppResult, Config};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     println!("Forwarding to {}", config.upstream.origin);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;

pub use config::{Config, Heuristic};
pub use error::{AppError, AppResult};
