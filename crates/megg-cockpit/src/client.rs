//! One WebSocket client session.
//!
//! The session subscribes to the event bus *before* taking the initial
//! snapshot, then sends `connection` followed by `status`. From then on it
//! forwards every broadcast and answers the client's own commands.
//!
//! A session ends when the client closes, a write fails or times out, or the
//! client falls so far behind that its bus window overflowed. None of these
//! affect other sessions.

use std::net::SocketAddr;
use std::num::NonZeroU32;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use megg_runtime::CoordinatorHandle;
use megg_types::{Command, ConnectionInfo, Event, MeggError, Outbound, codes};
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::server::{HubConfig, Registry};

/// `source` of events generated by the hub itself.
pub const SOURCE: &str = "megg-cockpit::client";

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

pub(crate) async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    handle: CoordinatorHandle,
    clients: Registry,
    config: &HubConfig,
) -> Result<(), MeggError> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| MeggError::Channel(format!("WS handshake from {peer}: {e}")))?;

    let id = Uuid::new_v4();
    clients.write().await.insert(id, peer);
    info!(client = %id, %peer, "client connected");

    let result = session(ws, id, &handle, config).await;

    let remaining = {
        let mut clients = clients.write().await;
        clients.remove(&id);
        clients.len()
    };
    info!(client = %id, %peer, remaining, "client disconnected");
    result
}

async fn session(
    ws: WebSocketStream<TcpStream>,
    id: Uuid,
    handle: &CoordinatorHandle,
    config: &HubConfig,
) -> Result<(), MeggError> {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut bus_rx = handle.subscribe();
    let limiter = rate_limiter(config.rate_limit_per_sec);

    let greeting = vec![
        Event::new(
            SOURCE,
            Outbound::Connection(ConnectionInfo::new(env!("CARGO_PKG_VERSION"))),
        ),
        Event::new(SOURCE, Outbound::status(handle.snapshot().await?)),
    ];
    if !deliver(&mut ws_tx, &greeting, config).await {
        return Ok(());
    }

    loop {
        tokio::select! {
            // ── Downstream: coordinator broadcasts → client ─────────────────
            result = bus_rx.recv() => match result {
                Ok(event) => {
                    if !deliver(&mut ws_tx, std::slice::from_ref(&event), config).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(client = %id, lagged_by = n, "client stalled, dropping it");
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                Err(RecvError::Closed) => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            },
            // ── Upstream: client commands → coordinator ─────────────────────
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let replies = if limiter.check().is_ok() {
                        handle_inbound(text.as_str(), handle).await
                    } else {
                        debug!(client = %id, "rate limited");
                        vec![rate_limited()]
                    };
                    if !deliver(&mut ws_tx, &replies, config).await {
                        break;
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    let err = MeggError::protocol(codes::INVALID_ENVELOPE, "Binary frames are not supported");
                    if !deliver(&mut ws_tx, &[Event::new(SOURCE, Outbound::error(&err))], config).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(client = %id, error = %e, "read error");
                    break;
                }
                _ => {}
            },
        }
    }
    Ok(())
}

/// Parse one text frame and run it through the coordinator, returning the
/// requester-only replies.
pub async fn handle_inbound(text: &str, handle: &CoordinatorHandle) -> Vec<Event> {
    let command = match Command::parse(text) {
        Ok(command) => command,
        Err(e) => {
            debug!(code = e.code(), error = %e, "rejected inbound message");
            return vec![Event::new(SOURCE, Outbound::error(&e))];
        }
    };
    match handle.dispatch(command).await {
        Ok(replies) => replies,
        Err(e) => vec![Event::new(SOURCE, Outbound::error(&e))],
    }
}

fn rate_limited() -> Event {
    let err = MeggError::protocol(codes::RATE_LIMITED, "Too many messages; slow down");
    Event::new(SOURCE, Outbound::error(&err))
}

fn rate_limiter(per_sec: u32) -> DefaultDirectRateLimiter {
    let per_sec = NonZeroU32::new(per_sec).unwrap_or(NonZeroU32::MIN);
    RateLimiter::direct(Quota::per_second(per_sec))
}

/// Write `events` in order. `false` means the client is gone or too slow and
/// the session must end.
async fn deliver(ws_tx: &mut WsSink, events: &[Event], config: &HubConfig) -> bool {
    for event in events {
        let json = match event.to_wire() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, kind = event.payload.kind(), "dropping unserializable event");
                continue;
            }
        };
        match tokio::time::timeout(config.send_timeout, ws_tx.send(Message::Text(json.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "write failed");
                return false;
            }
            Err(_) => {
                warn!(timeout = ?config.send_timeout, "write timed out, dropping client");
                return false;
            }
        }
    }
    true
}
