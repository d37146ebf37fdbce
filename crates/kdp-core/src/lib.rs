//! KDP Core - Core types for rendering KDP definitions
//!
//! This crate provides the foundational types shared by the engine and the
//! Kubernetes integration:
//! - `Definition`: How a subject kind renders into manifests
//! - `Parameters`: User parameters with deep merge support
//! - `Context`: Per-render key/value environment
//! - `Subject`: Capability interface exposed by every renderable kind

pub mod context;
pub mod definition;
pub mod error;
pub mod parameters;
pub mod subject;

pub use context::{Context, ContextBuilder, ContextValue, short_id};
pub use definition::{ApiResourceRef, Definition, DynamicParameter};
pub use error::{CoreError, Result};
pub use parameters::Parameters;
pub use subject::{GroupInfo, ObjectIdentity, Subject};
