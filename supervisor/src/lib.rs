//! Supervisor for long, unattended runs of an elevated-permission coding agent.
//!
//! The supervisor re-invokes itself inside a container unless it is already
//! contained or isolation is explicitly bypassed, then drives a sequential
//! iteration loop with resource gating, retries with self-debug calls,
//! adversarial checkpoint reviews, error snapshots and one terminal metrics
//! record. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (run counters, verdict
//!   classification). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (agent process, git, host resources,
//!   logs, snapshots, metrics, notifications, container runtime). Each seam
//!   is a trait so tests can inject scripted fakes.
//!
//! Orchestration modules ([`supervise`], [`checkpoint`]) compose core logic
//! with I/O to implement the loop.

pub mod checkpoint;
pub mod core;
pub mod errors;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod supervise;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
