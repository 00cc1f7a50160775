use crate::connection::ConnectionEvent;
use std::collections::HashMap;
use system::ClientId;

pub type ConnectionTx = tokio::sync::mpsc::Sender<ConnectionEvent>;

pub struct ConnectionTxStorage {
    connection_txs: HashMap<ClientId, ConnectionTx>,
}

impl ConnectionTxStorage {
    pub fn new() -> Self {
        Self {
            connection_txs: HashMap::new(),
        }
    }

    pub fn insert(&mut self, connection_id: ClientId, tx: ConnectionTx) {
        self.connection_txs.insert(connection_id, tx);
    }

    /// False when the connection is unknown or its actor has already stopped.
    pub async fn send(&mut self, to: &ClientId, message: ConnectionEvent) -> bool {
        if let Some(tx) = self.connection_txs.get_mut(to) {
            if tx.send(message).await.is_err() {
                log::warn!("Connection {} is gone, dropping event", to);
                return false;
            }
            true
        } else {
            log::debug!("No connection {} to send to", to);
            false
        }
    }

    pub fn remove(&mut self, connection_id: &ClientId) -> Option<ConnectionTx> {
        self.connection_txs.remove(connection_id)
    }
}
