//! Container task lifecycle for the boxexec workspace.
//!
//! Runs one command per fresh container on containerd or docker, bounded
//! by a deadline, and always tears the container down afterwards. Also
//! reports fleet statistics over the containers it owns.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod client;
pub mod command;
pub mod lifecycle;
pub mod mount;
pub mod stats;
pub mod stdio;
pub mod trace;

#[cfg(test)]
pub(crate) mod testing;
