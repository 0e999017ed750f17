// crates/relay-server/src/connection.rs
//! Per-connection lifecycle: one reader and one writer per socket.
//!
//! - The writer task owns the sending half of the socket and drains the
//!   client's outbound queue in order.
//! - The reader loop owns the receiving half, turns each inbound frame into
//!   a `ChatMessage` and submits it to the dispatcher.
//!
//! The writer is running before the client is registered, so the first
//! handoff always finds a consumer.
//!
//! Either side failing ends the connection: the client is deregistered
//! (idempotently, the dispatcher may have done it already) and the other
//! side is stopped. Deregistration from anywhere else (a backpressure drop)
//! fires the client's eviction, which stops both sides as well.

use std::fmt;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use relay_core::{ClientId, Dispatcher, Eviction, OutboundRx};
use relay_protocol::{decode_inbound, decode_inbound_bytes, encode_output, ProtocolError};
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::auth::Identity;
use crate::types::{AppState, ConnectionState};

/// Why a reader loop stopped.
#[derive(Debug)]
enum ReaderExit {
    /// Close frame or end of stream.
    PeerClosed,
    /// Transport error while reading.
    ReadFailed(axum::Error),
    /// Frame that is not a chat message.
    Malformed(ProtocolError),
    /// The writer finished first (write error, or we were dropped).
    WriterStopped,
    /// Deregistered elsewhere, e.g. dropped as unresponsive.
    Evicted,
    DispatcherClosed,
}

/// How long an evicted writer gets to flush its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

impl fmt::Display for ReaderExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderExit::PeerClosed => write!(f, "peer closed"),
            ReaderExit::ReadFailed(e) => write!(f, "read error: {}", e),
            ReaderExit::Malformed(e) => write!(f, "{}", e),
            ReaderExit::WriterStopped => write!(f, "writer stopped"),
            ReaderExit::Evicted => write!(f, "evicted"),
            ReaderExit::DispatcherClosed => write!(f, "dispatcher closed"),
        }
    }
}

/// Drive one upgraded, authorized connection until it closes.
///
/// `_slot` holds this connection's place under `max_clients` until it ends.
pub async fn run_connection(
    socket: WebSocket,
    state: AppState,
    identity: Identity,
    _slot: OwnedSemaphorePermit,
) {
    let relay = state.relay;
    let (client, out_rx) = relay.open_client(Some(identity.display_name.as_str()));
    let client_id = client.id();
    let display_name = client.display_name().to_string();
    let eviction = client.eviction();

    let (write_half, read_half) = socket.split();
    let mut writer = tokio::spawn(run_writer(client_id, write_half, out_rx, eviction.clone()));

    if !relay.registry().register(client).await {
        error!(client_id = %client_id, "Client id already registered; closing");
        writer.abort();
        return;
    }
    info!(
        client_id = %client_id,
        display_name = %display_name,
        state = %ConnectionState::Active,
        "Client connected"
    );

    let exit = run_reader(
        client_id,
        &display_name,
        read_half,
        &relay.dispatcher(),
        eviction,
        &mut writer,
    )
    .await;

    debug!(
        client_id = %client_id,
        state = %ConnectionState::Closing,
        reason = %exit,
        "Closing connection"
    );
    relay.registry().deregister(client_id).await;

    // An evicted writer may still be flushing its close frame; anything else
    // has nothing left to say.
    if matches!(exit, ReaderExit::Evicted) && timeout(CLOSE_GRACE, &mut writer).await.is_ok() {
        debug!(client_id = %client_id, "Writer finished after eviction");
    } else {
        writer.abort();
    }

    match exit {
        ReaderExit::PeerClosed => info!(
            client_id = %client_id,
            display_name = %display_name,
            state = %ConnectionState::Closed,
            "Client disconnected"
        ),
        other => warn!(
            client_id = %client_id,
            display_name = %display_name,
            state = %ConnectionState::Closed,
            reason = %other,
            "Client connection ended"
        ),
    }
}

/// Reader loop: one inbound frame at a time until something ends it.
async fn run_reader(
    client_id: ClientId,
    display_name: &str,
    mut read_half: SplitStream<WebSocket>,
    dispatcher: &Dispatcher,
    mut eviction: Eviction,
    writer: &mut JoinHandle<()>,
) -> ReaderExit {
    loop {
        let frame = tokio::select! {
            biased;
            _ = eviction.evicted() => return ReaderExit::Evicted,
            _ = &mut *writer => return ReaderExit::WriterStopped,
            frame = read_half.next() => frame,
        };

        let decoded = match frame {
            None | Some(Ok(Message::Close(_))) => return ReaderExit::PeerClosed,
            Some(Err(e)) => return ReaderExit::ReadFailed(e),
            Some(Ok(Message::Text(text))) => decode_inbound(&text),
            Some(Ok(Message::Binary(bytes))) => decode_inbound_bytes(&bytes),
            // Ping/pong are answered by the WebSocket layer.
            Some(Ok(_)) => continue,
        };

        let inbound = match decoded {
            Ok(inbound) => inbound,
            Err(e) => return ReaderExit::Malformed(e),
        };

        if let Some(claimed) = inbound.sender.as_deref() {
            if claimed != display_name {
                debug!(
                    client_id = %client_id,
                    claimed,
                    display_name,
                    "Ignoring client-supplied sender"
                );
            }
        }

        // A frame read just as we were dropped must not reach anyone.
        if eviction.is_evicted() {
            return ReaderExit::Evicted;
        }

        let msg = inbound.into_chat(display_name, Utc::now());
        if dispatcher.submit(msg).is_err() {
            return ReaderExit::DispatcherClosed;
        }
    }
}

/// Writer task: drain the outbound queue to the socket, in order.
///
/// Ends on the first write error, or once the client has been evicted (its
/// queue is closed at the same moment). A write stuck on a stalled peer is
/// abandoned on eviction rather than waited out.
async fn run_writer(
    client_id: ClientId,
    mut write_half: SplitSink<WebSocket, Message>,
    mut out_rx: OutboundRx,
    mut eviction: Eviction,
) {
    loop {
        let msg = tokio::select! {
            biased;
            _ = eviction.evicted() => break,
            msg = out_rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let text = match encode_output(&msg) {
            Ok(text) => text,
            Err(e) => {
                error!(client_id = %client_id, kind = msg.kind(), error = %e, "Failed to encode frame");
                continue;
            }
        };

        let sent = tokio::select! {
            biased;
            _ = eviction.evicted() => break,
            sent = write_half.send(Message::Text(text)) => sent,
        };
        if let Err(e) = sent {
            warn!(client_id = %client_id, error = %e, "Client write error");
            return;
        }
    }

    debug!(client_id = %client_id, "Client evicted; closing socket");
    let _ = write_half
        .send(Message::Close(Some(CloseFrame {
            code: close_code::AGAIN,
            reason: "unresponsive".into(),
        })))
        .await;
}
