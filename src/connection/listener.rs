//! Listener role: accept one peer and promote it into a session

use super::role::{cancelled, RoleContext};
use super::session::SessionHandle;
use crate::transport::{Transport, TransportListener};
use btchat_shared::{ConnectionError, ConnectionEvent, Role, ServiceDescriptor};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Bind a listening socket for `service` and wait for a single peer.
///
/// Each accept attempt is announced with `Connecting`; a failed attempt is
/// reported and retried until `attempts` are used up. Cancellation ends the
/// role silently.
pub(crate) async fn run_listener<T: Transport>(
    ctx: RoleContext<T>,
    service: ServiceDescriptor,
    attempts: u32,
    mut cancel: watch::Receiver<bool>,
) -> Option<SessionHandle> {
    let role = Role::Listener;
    if !ctx.radio_ready(role).await {
        return None;
    }

    let mut listener = match ctx.transport.listen(&service).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("[{}] Bind failed for {}: {:#}", role, service, e);
            ctx.fail(role, ConnectionError::BindFailure(format!("{:#}", e)))
                .await;
            return None;
        }
    };
    info!("[{}] Listening for {} via {}", role, service, ctx.transport.name());

    for attempt in 1..=attempts.max(1) {
        ctx.events.emit(ConnectionEvent::Connecting { role }).await;

        let accepted = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                info!("[{}] Cancelled", role);
                return None;
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok(stream) => {
                // Single-session design: stop listening once a peer is in
                drop(listener);
                return Some(ctx.promote(role, stream).await);
            }
            Err(e) => {
                warn!("[{}] Accept attempt {} failed: {}", role, attempt, e);
                ctx.fail(role, ConnectionError::AcceptFailure(e.to_string()))
                    .await;
            }
        }
    }

    error!("[{}] Giving up after {} failed accepts", role, attempts.max(1));
    None
}
