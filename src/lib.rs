//! Core library of `relic`, a conformance checker for REST-style resource
//! APIs.
//!
//! `relic` drives one full resource lifecycle against a configured API:
//! create a resource, retrieve it, patch it, retrieve it again and delete
//! it, authenticating every request with a bearer token. Each step prints
//! one human-readable pass/fail line and the process exits non-zero if any
//! step failed.
//!
//! The primary interface is the `relic` binary. This library exists so the
//! driver in [`check`] can be exercised end-to-end by the integration tests.

pub mod api;
pub mod check;
pub mod cli;
pub mod config;
pub mod log;
pub mod token;
pub mod util;

mod prelude;
