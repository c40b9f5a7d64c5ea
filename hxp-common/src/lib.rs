//! # HXP Common Library
//!
//! Shared code for the HXP hypoxemia-risk services:
//! - Versioned feature schema (the classifier's input contract)
//! - Bootstrap configuration loading and resolution
//! - Common error type

pub mod config;
pub mod error;
pub mod schema;

pub use error::{Error, Result};
pub use schema::{FeatureKind, FeatureSchema, FeatureSpec, SCHEMA_VERSION};
