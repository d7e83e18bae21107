// src/config/mod.rs

//! Configuration loading and validation for rulesched.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate settings and rule-graph integrity (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{AnalysisConfig, ConfigFile, ConfigSection, RawConfigFile, Settings};
pub use validate::sanity_check;
