//! Latchkey: a node-local workload identity agent.
//!
//! Local processes connect over a Unix socket. The agent reads their
//! kernel-verified credentials, attests them into selectors, matches the
//! selectors against a sealed registry, and returns a signed, expiring
//! identity document.
//!
//! See `DESIGN.md` for the module-by-module design.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;

pub mod extractor;
pub mod identity;

pub mod attestor;
pub mod registry;

pub mod agent;
pub mod bootstrap;
pub mod issuance;

pub mod client;
pub mod exchange;
pub mod server;
