//! # RDTK Common Library
//!
//! Shared code for the reading-tracker identity modules including:
//! - Error taxonomy shared by every operation
//! - Configuration loading and root folder resolution
//! - Database initialization, schema migrations and the settings table
//! - Content Store adapter over the shared books table

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
