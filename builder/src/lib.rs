//! LLM-driven workflow builder engine.
//!
//! This crate drives an iterative, tool-using conversation with a model that
//! incrementally writes and repairs a single workflow source file until it
//! validates cleanly or retry ceilings trip. The architecture enforces a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (document store, warning ledger,
//!   tool-call model). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting boundaries (model client, compiler, generic
//!   tools, logs). Isolated to enable mocking in tests.
//!
//! Orchestration modules ([`gateway`], [`dispatch`], [`session`]) coordinate
//! core logic with the collaborators to implement the build loop.

pub mod core;
pub mod dispatch;
pub mod exit_codes;
pub mod gateway;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;
