//! End-to-end tests for Clawbernetes queue preemption.
//!
//! These tests exercise the engine the way a cluster drives it:
//! - Queue configuration and reconfiguration
//! - Submission, placement and completion
//! - Preemption across guarantees and fences
//! - The background scheduler task and its intent channel

#![cfg(test)]
