//! Collaborator interfaces.
//!
//! The engine does not own the application's in-memory state or the
//! network. It hydrates the former through [`ApplicationModel`] and asks the
//! latter for data through [`RemoteSync`].

use crate::error::RemoteError;
use mirrordb_core::{Record, SequenceNumber};
use std::future::Future;

/// The application's in-memory model.
///
/// Calls arrive in bulk-load order from a single task.
pub trait ApplicationModel: Send + Sync + 'static {
    /// Installs a file or folder node.
    fn install_node(&self, record: Record);

    /// Installs a user or contact.
    fn install_user(&self, record: Record);

    /// Installs a share of node `key`.
    fn install_share(&self, key: &str, record: Record);

    /// Installs the still-encrypted share key embedded in node `node_id`.
    fn install_share_key(&self, node_id: &str, encrypted_key: &str);

    /// Installs an outgoing share key.
    fn install_outgoing_key(&self, record: Record);

    /// Returns true if the model holds no nodes.
    fn is_empty(&self) -> bool;

    /// Drops everything installed so far. Called before a rebuild so no
    /// partial hydration survives it.
    fn discard(&self);
}

/// The remote source of truth.
pub trait RemoteSync: Send + Sync + 'static {
    /// Fetches the complete account state. Returns the sequence position the
    /// snapshot corresponds to.
    fn fetch_full_snapshot(
        &self,
    ) -> impl Future<Output = Result<SequenceNumber, RemoteError>> + Send;

    /// Fetches every mutation after `marker`. Returns the new position.
    fn fetch_since(
        &self,
        marker: SequenceNumber,
    ) -> impl Future<Output = Result<SequenceNumber, RemoteError>> + Send;
}
