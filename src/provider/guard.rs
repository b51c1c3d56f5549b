use tokio::runtime::Handle;

use super::manager::{ConnectionManager, ProviderConnection};

/// The connections opened for one spawn invocation.
///
/// Call [`ConnectionSet::close`] on every exit path. If the set is dropped
/// while still holding connections (a panic, or a timeout dropping the
/// owning future) the close is scheduled on the current runtime instead;
/// subprocess transports additionally die with their handle.
pub struct ConnectionSet {
    manager: ConnectionManager,
    connections: Vec<ProviderConnection>,
}

impl ConnectionSet {
    pub fn new(manager: ConnectionManager, connections: Vec<ProviderConnection>) -> Self {
        Self {
            manager,
            connections,
        }
    }

    pub fn connections(&self) -> &[ProviderConnection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub async fn close(mut self) {
        let connections = std::mem::take(&mut self.connections);
        self.manager.close_all(connections).await;
    }
}

impl Drop for ConnectionSet {
    fn drop(&mut self) {
        if self.connections.is_empty() {
            return;
        }
        let connections = std::mem::take(&mut self.connections);
        tracing::warn!(
            count = connections.len(),
            "Connection set dropped while open, scheduling close"
        );
        match Handle::try_current() {
            Ok(handle) => {
                let manager = self.manager.clone();
                handle.spawn(async move {
                    manager.close_all(connections).await;
                });
            }
            Err(_) => drop(connections),
        }
    }
}
