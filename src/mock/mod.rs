//! Mock Conformance Worker
//!
//! A configurable in-process implementation of the conformance service used
//! to test the prober without external implementations.
//!
//! # Usage Modes
//!
//! - **In-process library**: wrapped by `MockTransport` for unit and integration tests
//! - **Standalone binary**: served over stdio by the `probe-worker` crate
//!
//! Every optional feature can be switched off through [`MockFeatures`], and
//! [`FailureInjector`] rewrites replies per method (error, delay, hang,
//! wrong result, truncated stream, fail-count).

mod failure;
mod state;
mod worker;

pub use failure::{FailureConfig, FailureInjector};
pub use state::{MockState, OpenExchange};
pub use worker::{MockFeatures, MockWorker, ReplyDelay, WorkerReply, GARBLED_LINE, MOCK_PRINCIPAL};
