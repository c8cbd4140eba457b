//! Integration test suite for relay.
//!
//! These tests drive the public API end to end: the task queue under
//! load, provider fallback through the dispatcher, the real subprocess
//! and HTTP transports, and concurrent health probing.
//!
//! # Test Categories
//!
//! - `queue_scheduling`: capacity, priority order, timeouts, clear, drain
//! - `fallback`: capability routing, fallback chains, multi-model review
//! - `transports`: subprocess and HTTP strategies through the dispatcher
//! - `health`: concurrent probes with slow and missing providers
//!
//! # CI Compatibility
//!
//! Providers are scripted transports, `sh`/`cat`/`sleep` subprocesses, or
//! local `wiremock` servers. No external service is contacted.

mod fixtures;

mod fallback;
mod health;
mod transports;
