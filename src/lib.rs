//! Keeps a browser's native bookmark tree in step with an encrypted remote
//! copy.
//!
//! Native events become [`change::Change`]s on a single queue. One task
//! drains it, applies each change to a copy of the canonical tree, pushes the
//! encrypted result and only then commits it locally.

pub mod bookmark;
pub mod cache;
pub mod change;
pub mod config;
pub mod crypto;
pub mod detector;
pub mod error;
pub mod id_mapper;
pub mod import;
pub mod native;
pub mod platform;
pub mod progress;
pub mod queue;
pub mod remote;
pub mod scheduler;
pub mod search;
pub mod store;
pub mod sync;
pub mod text;
pub mod validator;

pub use error::{Result, SyncError};
pub use sync::{SyncEngine, SyncEngineOptions};
