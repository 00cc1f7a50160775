use tokio::sync::mpsc::{channel, Sender};

use system::{
    AccessRules, ClientId, IdentifiableCommand, IdentifiableEvent, Outbox, StoreHub,
};

use crate::admin::AdminCommand;
use crate::config::ServerConfig;
use crate::connection::{ConnectionCommand, ConnectionEvent};
use crate::connection_tx_storage::ConnectionTxStorage;
use crate::server_state::ServerState;

#[derive(Debug)]
pub enum ServerCommand {
    ConnectionCommand(ConnectionCommand),
    AdminCommand(AdminCommand),
}

pub type ServerTx = Sender<ServerCommand>;

struct Server {
    server_state: ServerState,
    connections: ConnectionTxStorage,
}

impl Server {
    fn new(config: &ServerConfig) -> Self {
        let rules = if config.enforce_rules {
            Some(AccessRules::new())
        } else {
            None
        };
        Self {
            server_state: ServerState::new(StoreHub::new(rules)),
            connections: ConnectionTxStorage::new(),
        }
    }

    async fn handle_command(&mut self, command: ServerCommand) {
        match command {
            ServerCommand::ConnectionCommand(command) => {
                self.handle_connection_command(command).await
            }
            ServerCommand::AdminCommand(command) => self.handle_admin_command(command),
        }
    }

    async fn handle_connection_command(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::Connect { tx, identity_id } => {
                let connection_id = self.server_state.connect(identity_id);
                self.connections.insert(connection_id, tx);
                let delivered = self
                    .connections
                    .send(&connection_id, ConnectionEvent::Connected { connection_id })
                    .await;
                // the socket closed before it learned its id, so no Disconnect will follow
                if !delivered {
                    self.connections.remove(&connection_id);
                    let outbox = self.server_state.disconnect(connection_id);
                    self.deliver(outbox).await;
                }
            }
            ConnectionCommand::Disconnect { from } => {
                let outbox = self.server_state.disconnect(from);
                if self.connections.remove(&from).is_some() {
                    log::info!("Connection {} closed", from);
                }
                self.deliver(outbox).await;
            }
            ConnectionCommand::IdentifiableCommand {
                from,
                command:
                    IdentifiableCommand {
                        command_id,
                        command,
                    },
            } => {
                let (result, outbox) = self.server_state.execute(from, &command);
                self.connections
                    .send(
                        &from,
                        ConnectionEvent::IdentifiableEvent(IdentifiableEvent::ByMyself {
                            command_id,
                            result,
                        }),
                    )
                    .await;
                self.deliver(outbox).await;
            }
        }
    }

    fn handle_admin_command(&mut self, command: AdminCommand) {
        match command {
            AdminCommand::GetStats { tx } => {
                if tx.send(self.server_state.hub.stats()).is_err() {
                    log::warn!("Admin request went away before the reply");
                }
            }
        }
    }

    async fn deliver(&mut self, outbox: Outbox) {
        for (to, event) in outbox {
            self.send_event(&to, IdentifiableEvent::BySystem { event })
                .await;
        }
    }

    async fn send_event(&mut self, to: &ClientId, event: IdentifiableEvent) {
        self.connections
            .send(to, ConnectionEvent::IdentifiableEvent(event))
            .await;
    }
}

pub fn spawn_server(config: &ServerConfig) -> ServerTx {
    let (srv_tx, mut srv_rx) = channel::<ServerCommand>(64);
    let mut server = Box::new(Server::new(config));
    log::info!("Store server started, rules enforced: {}", config.enforce_rules);

    tokio::spawn(async move {
        while let Some(command) = srv_rx.recv().await {
            server.handle_command(command).await;
        }
        log::info!("Store server stopped");
    });

    srv_tx
}
