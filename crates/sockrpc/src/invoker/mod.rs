//! Local and remote invocation engines.

pub mod local;
pub mod remote;

pub use local::LocalInvoker;
pub use remote::{RemoteContract, RemoteInvoker};
