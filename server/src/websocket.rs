//! WebSocket connection lifecycle
//!
//! Each accepted socket gets a read loop feeding [`ChatRouter::dispatch`] and a
//! forwarding task draining the connection's bounded outbound queue.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::router::ChatRouter;
use crate::session::ClientHandle;

// ---------------------------------------------------------------------------
// Server state
// ---------------------------------------------------------------------------

/// Server state shared across connections
pub struct ServerState {
    pub config: ServerConfig,
    pub router: ChatRouter,
    /// Current total connection count (for enforcing max_connections)
    connection_count: AtomicUsize,
    /// Per-IP connection counts (for enforcing max_connections_per_ip)
    ip_connections: dashmap::DashMap<IpAddr, AtomicUsize>,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            router: ChatRouter::new(),
            connection_count: AtomicUsize::new(0),
            ip_connections: dashmap::DashMap::new(),
        }
    }

    /// Try to acquire a connection slot. Returns false if limits are exceeded.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> bool {
        let max_global = self.config.max_connections;
        let max_per_ip = self.config.max_connections_per_ip;

        if max_global > 0 && self.connection_count.load(Ordering::Relaxed) >= max_global {
            return false;
        }

        if max_per_ip > 0 {
            let entry = self
                .ip_connections
                .entry(ip)
                .or_insert_with(|| AtomicUsize::new(0));
            if entry.value().load(Ordering::Relaxed) >= max_per_ip {
                return false;
            }
            entry.value().fetch_add(1, Ordering::Relaxed);
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Release a connection slot.
    pub fn release_connection(&self, ip: IpAddr) {
        self.connection_count.fetch_sub(1, Ordering::Relaxed);
        if let Some(entry) = self.ip_connections.get(&ip) {
            let prev = entry.value().fetch_sub(1, Ordering::Relaxed);
            if prev <= 1 {
                drop(entry);
                self.ip_connections.remove(&ip);
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Relaxed)
    }

    /// Acquire a slot owned by a guard that releases it on drop
    pub fn acquire_slot(self: &Arc<Self>, ip: IpAddr) -> Option<ConnectionSlot> {
        self.try_acquire_connection(ip).then(|| ConnectionSlot {
            state: Arc::clone(self),
            ip,
        })
    }
}

/// A held connection slot. Dropping it releases the slot, whether or not the
/// upgrade ever reached the socket handler.
pub struct ConnectionSlot {
    state: Arc<ServerState>,
    ip: IpAddr,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.release_connection(self.ip);
    }
}

// ---------------------------------------------------------------------------
// WebSocket upgrade handler
// ---------------------------------------------------------------------------

/// Handle WebSocket upgrade, enforcing connection limits before accepting
pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let ip = addr.ip();

    let Some(slot) = state.acquire_slot(ip) else {
        warn!(%ip, "connection rejected: limit exceeded");
        return axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    // The slot moves into the callback; a failed upgrade drops it unused
    ws.max_message_size(state.config.max_message_size)
        .on_failed_upgrade(move |e| debug!(%addr, error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| handle_socket(socket, state, addr, slot))
        .into_response()
}

// ---------------------------------------------------------------------------
// Socket lifecycle
// ---------------------------------------------------------------------------

async fn handle_socket(
    socket: WebSocket,
    state: Arc<ServerState>,
    addr: SocketAddr,
    slot: ConnectionSlot,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(state.config.outbound_buffer);

    let conn_id = state
        .router
        .connect(ClientHandle::new(tx, state.config.send_timeout()));
    info!(conn_id, %addr, "new WebSocket connection");

    // Forward queued frames and keep the socket alive with pings
    let ping_interval_secs = state.config.ws_ping_interval;
    let forward_task = tokio::spawn(async move {
        let mut ping_ticker =
            tokio::time::interval(std::time::Duration::from_secs(ping_interval_secs));
        ping_ticker.tick().await; // skip first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_sender.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_ticker.tick() => {
                    if ws_sender.send(Message::Ping(vec![])).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(next) = ws_receiver.next().await {
        match next {
            Ok(Message::Text(text)) => state.router.dispatch(conn_id, &text).await,
            Ok(Message::Binary(_)) => debug!(conn_id, "ignoring binary frame"),
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => { /* axum auto-responds to pings */ }
            Err(e) => {
                debug!(conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    state.router.disconnect(conn_id).await;
    drop(slot);
    forward_task.abort();
    info!(conn_id, %addr, "connection closed");
}
