//! Stateless coordination groups.
//!
//! Independent processes form a group by meeting at a shared key-value store: rank 0
//! hosts the store, every member connects to it, and nothing process-wide is touched,
//! so the same process can join any number of overlapping groups. On top of the store
//! a group offers a round-isolated barrier and small-object exchange.

mod barrier;
mod builder;
mod collective;
mod config;
mod error;
mod group;
mod keys;

pub use builder::GroupBuilder;
pub use config::{
    DEFAULT_DATA_EXPIRATION_SECONDS, DEFAULT_STORE_CONNECT_TIMEOUT_SECONDS, GroupConfig,
};
pub use error::{GroupErr, Result};
pub use group::GroupHandle;
