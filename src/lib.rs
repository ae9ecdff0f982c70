//! taskpad - personal to-do list core
//!
//! Tasks and tags live in a remote store when an account (or anonymous
//! session) is available and on the device otherwise. A [`Session`] ties
//! the identity, the repositories, the filter and the realtime change feed
//! together for a presentation layer.

pub mod api;
mod collection;
pub mod config;
pub mod details;
pub mod error;
pub mod filter;
pub mod identity;
pub mod local;
pub mod models;
pub mod notice;
pub mod remote;
pub mod session;
pub mod tags;
pub mod tasks;

pub use error::{RepoError, RepoResult};
pub use session::{Session, Snapshot};
