use actix::{Actor, ActorContext, AsyncContext, Handler, Message, Running, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;

use system::{serde_json, ClientId, IdentifiableCommand, IdentifiableEvent, IdentityId, StorePath};

use crate::connection_tx_storage::ConnectionTx;
use crate::server::{ServerCommand, ServerTx};
use actix_web_actors::ws::{CloseCode, CloseReason};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Debug)]
pub enum ConnectionCommand {
    Connect {
        tx: ConnectionTx,
        identity_id: IdentityId,
    },
    Disconnect {
        from: ClientId,
    },
    IdentifiableCommand {
        from: ClientId,
        command: IdentifiableCommand,
    },
}

#[derive(Debug)]
pub enum ConnectionEvent {
    Connected { connection_id: ClientId },
    IdentifiableEvent(IdentifiableEvent),
}

pub fn decode_command(text: &str) -> Result<IdentifiableCommand, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn encode_event(event: &IdentifiableEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

#[derive(Message)]
#[rtype(result = "()")]
struct ConnectionActorMessage(ConnectionEvent);

/// Commands that arrive before the server assigned an id are held until it does.
enum ConnectionState {
    Idle(Vec<IdentifiableCommand>),
    Connected(ClientId),
}

impl ConnectionState {
    fn admit(&mut self, command: IdentifiableCommand) -> Option<ConnectionCommand> {
        match self {
            ConnectionState::Idle(pending) => {
                pending.push(command);
                None
            }
            ConnectionState::Connected(from) => Some(ConnectionCommand::IdentifiableCommand {
                from: *from,
                command,
            }),
        }
    }

    fn connect(&mut self, connection_id: ClientId) -> Vec<ConnectionCommand> {
        let previous = std::mem::replace(self, ConnectionState::Connected(connection_id));
        match previous {
            ConnectionState::Idle(pending) => pending
                .into_iter()
                .map(|command| ConnectionCommand::IdentifiableCommand {
                    from: connection_id,
                    command,
                })
                .collect(),
            ConnectionState::Connected(_) => Vec::new(),
        }
    }
}

/// Hands a connection's commands to the server in order, waiting for room
/// in the server channel instead of dropping them.
fn spawn_forwarder(
    srv_tx: ServerTx,
    mut rx: UnboundedReceiver<ConnectionCommand>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            if srv_tx
                .send(ServerCommand::ConnectionCommand(command))
                .await
                .is_err()
            {
                log::warn!("Server is gone, dropping connection commands");
                break;
            }
        }
    })
}

struct ConnectionActor {
    state: ConnectionState,
    srv_tx: ServerTx,
    to_server: Option<UnboundedSender<ConnectionCommand>>,
    identity_id: IdentityId,
}

impl ConnectionActor {
    fn send_to_server(&self, command: ConnectionCommand) {
        match &self.to_server {
            Some(tx) => {
                if tx.send(command).is_err() {
                    log::warn!("Connection forwarder stopped");
                }
            }
            None => log::warn!("Connection command before start: {:?}", command),
        }
    }
}

impl Actor for ConnectionActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let (command_tx, command_rx) = unbounded_channel::<ConnectionCommand>();
        spawn_forwarder(self.srv_tx.clone(), command_rx);
        self.to_server = Some(command_tx);

        let (tx, mut rx) = tokio::sync::mpsc::channel::<ConnectionEvent>(32);

        self.send_to_server(ConnectionCommand::Connect {
            tx,
            identity_id: self.identity_id.clone(),
        });

        let addr = ctx.address().recipient();

        tokio::spawn(async move {
            log::debug!("connection green thread - started");
            while let Some(msg) = rx.recv().await {
                if addr.try_send(ConnectionActorMessage(msg)).is_err() {
                    log::warn!("Connection actor mailbox is full or closed");
                    break;
                }
            }
            log::debug!("connection green thread - terminated");
        });
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        if let ConnectionState::Connected(id) = self.state {
            self.send_to_server(ConnectionCommand::Disconnect { from: id });
        }
        // the forwarder drains what is queued, then stops
        self.to_server = None;

        Running::Stop
    }
}

/// Ingress
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ConnectionActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Text(text)) => {
                log::debug!("Ingress size: {}", text.len());
                match decode_command(&text) {
                    Ok(command) => {
                        log::debug!("Ingress {:?}", command);
                        if let Some(command) = self.state.admit(command) {
                            self.send_to_server(command);
                        }
                    }
                    Err(e) => {
                        log::warn!("Closing connection of {} on a bad frame: {}", self.identity_id, e);
                        ctx.close(Some(CloseReason {
                            code: CloseCode::Invalid,
                            description: None,
                        }));
                        ctx.stop();
                    }
                }
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Binary(_)) => {
                ctx.close(Some(CloseReason {
                    code: CloseCode::Unsupported,
                    description: Some("text frames only".into()),
                }));
                ctx.stop();
            }
            Ok(_) => (),
            Err(e) => {
                log::warn!("Websocket protocol error: {}", e);
                ctx.stop();
            }
        }
    }
}

/// Egress
impl Handler<ConnectionActorMessage> for ConnectionActor {
    type Result = ();

    fn handle(
        &mut self,
        msg: ConnectionActorMessage,
        ctx: &mut ws::WebsocketContext<Self>,
    ) -> Self::Result {
        let connection_event = msg.0;
        log::debug!("Egress {:?}", connection_event);
        match connection_event {
            ConnectionEvent::Connected { connection_id } => {
                for command in self.state.connect(connection_id) {
                    self.send_to_server(command);
                }
            }
            ConnectionEvent::IdentifiableEvent(event) => match encode_event(&event) {
                Ok(serialized) => ctx.text(serialized),
                Err(e) => log::error!("Can't encode {:?}: {}", event, e),
            },
        }
    }
}

pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    srv_tx: web::Data<ServerTx>,
) -> Result<HttpResponse, Error> {
    let identity_id = req.match_info().get("identity_id").unwrap_or_default();
    if StorePath::validate_segment(identity_id).is_err() {
        return Ok(HttpResponse::BadRequest().body("invalid identity id"));
    }
    ws::start(
        ConnectionActor {
            srv_tx: srv_tx.get_ref().clone(),
            to_server: None,
            state: ConnectionState::Idle(Vec::new()),
            identity_id: identity_id.to_owned(),
        },
        &req,
        stream,
    )
}
