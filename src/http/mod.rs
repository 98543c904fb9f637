//! HTTP layer for the metrics gateway.
//!
//! This module provides the axum-based HTTP server that authenticates
//! inbound metric batches against the authority-backed gateway, applies
//! instance-ownership checks, and hands accepted samples to the configured
//! publisher.

pub mod handler;
