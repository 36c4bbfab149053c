//! Initiator role: connect to a known peer and promote the socket

use super::role::{cancelled, RoleContext};
use super::session::SessionHandle;
use crate::transport::Transport;
use btchat_shared::{ConnectionError, PeerAddress, Role, ServiceDescriptor};
use tokio::sync::watch;
use tracing::{info, warn};

/// Connect once to `peer`; no retry and no `Connecting` event.
pub(crate) async fn run_initiator<T: Transport>(
    ctx: RoleContext<T>,
    service: ServiceDescriptor,
    peer: PeerAddress,
    mut cancel: watch::Receiver<bool>,
) -> Option<SessionHandle> {
    let role = Role::Initiator;
    if !ctx.radio_ready(role).await {
        return None;
    }

    info!("[{}] Connecting to {} via {}", role, peer, ctx.transport.name());
    let connected = tokio::select! {
        biased;
        _ = cancelled(&mut cancel) => {
            info!("[{}] Cancelled", role);
            return None;
        }
        connected = ctx.transport.connect(&service, &peer) => connected,
    };

    match connected {
        Ok(stream) => Some(ctx.promote(role, stream).await),
        Err(e) => {
            warn!("[{}] Connect to {} failed: {:#}", role, peer, e);
            ctx.fail(role, ConnectionError::ConnectFailure(format!("{:#}", e)))
                .await;
            None
        }
    }
}
