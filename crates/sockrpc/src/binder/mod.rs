//! Binders wire invocation engines onto connections and register them in the
//! process-wide [`Directory`].

use crate::connection::Connection;
use crate::error::Result;
use crate::invoker::RemoteContract;
use crate::service::RpcService;
use std::sync::Arc;

pub mod directory;
pub mod fanout;
pub mod local;
pub mod relay;
pub mod remote;

pub use directory::Directory;
pub use fanout::{call_all, call_all_for, notify_all};
pub use local::{bind_local, LocalBinder};
pub use relay::bind_relay;
pub use remote::{bind_remote, CallBuilder, RemoteBinder};

/// Serve `service` and bind contract `C` toward the peer on the same
/// connection: both directions of a bidirectional endpoint in one step.
pub fn bind_duplex<S: RpcService, C: RemoteContract>(
    connection: &Connection,
    directory: &Directory,
    service: Arc<S>,
) -> Result<(LocalBinder<S>, Arc<RemoteBinder<C>>)> {
    let local = bind_local(connection, directory, service)?;
    let remote = bind_remote::<C>(connection, directory)?;
    Ok((local, remote))
}
