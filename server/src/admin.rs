use system::HubStats;
use tokio::sync::oneshot::Sender;

#[derive(Debug)]
pub enum AdminCommand {
    GetStats { tx: Sender<HubStats> },
}
