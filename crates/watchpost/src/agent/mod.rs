/// Regional agent protocol - the contract between the core service and
/// remote execution agents.
///
/// The core POSTs an [`protocol::ExecuteRequest`] to an agent's `/execute`
/// endpoint and gets back an [`protocol::ExecuteResponse`]; the
/// [`client::AgentClient`] bounds every call end-to-end and converts any
/// transport or protocol problem into an `agent_error` check result so a
/// broken region never aborts its siblings.
pub mod client;
pub mod protocol;

pub use client::AgentClient;
pub use protocol::{ExecuteRequest, ExecuteResponse};
