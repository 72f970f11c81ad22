//! # Manthan Common Library
//!
//! Shared code for the Manthan packaging services:
//! - Error type shared by the service crates
//! - Bootstrap configuration loading and root folder resolution
//! - Pipeline event types and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
