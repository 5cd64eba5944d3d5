//! convoy-runtime — runtime clients and replica-set management.
//!
//! The [`RuntimeClient`] trait is Convoy's only interface to the container
//! runtime: start an instance, stop an instance, ask what became of one.
//! Two implementations ship here: [`SimRuntime`], an in-process simulation
//! used by tests and local runs, and [`HttpRuntime`], a client for a remote
//! runtime agent.
//!
//! [`ReplicaSetManager`] owns the instance handles for one service and is
//! the only component that calls the runtime. Every call is bounded by a
//! timeout; a timed-out call counts as a failure, never as success.

pub mod client;
pub mod http;
pub mod manager;
pub mod sim;

pub use client::{
    ClientFuture, ProvisioningError, RuntimeClient, RuntimeStatus, StartRequest, StartedInstance,
    RUNTIME_CALL_TIMEOUT,
};
pub use http::HttpRuntime;
pub use manager::{InstanceHandle, ReplicaSetManager, StatusCounts};
pub use sim::SimRuntime;
