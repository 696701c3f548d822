//! The coordination store: a tiny TCP key-value service with blocking reads and key expiration.

mod client;
mod error;
mod server;
mod store;

pub use client::StoreClient;
pub use error::{Result, StoreErr};
pub use server::{ServerHandle, StoreServer};
pub use store::Store;
