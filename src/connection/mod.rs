//! Per-socket connection handling
//!
//! Every accepted WebSocket gets two tasks: a read loop (decode and
//! dispatch inbound frames) and a write loop (drain the bounded outbound
//! queue, keepalive pings, write deadlines). The two halves never share
//! mutable state; the hub reaches the write loop through the queue and a
//! close signal, and the read loop reaches everything else through
//! handles.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use hyper_util::rt::TokioIo;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::hub::ConnHandle;
use crate::packet::{codec, Packet};
use crate::server::AppState;

type WsStream = hyper_tungstenite::WebSocketStream<TokioIo<hyper::upgrade::Upgraded>>;

/// Frame payload delivered to probe clients in reply to `"PING"`.
const PONG: Bytes = Bytes::from_static(b"PONG");

/// Delimiter between coalesced messages inside one transport write.
const COALESCE_DELIMITER: u8 = b'\n';

/// Serve one upgraded WebSocket connection until it closes.
///
/// Registers with the hub, runs the write loop as its own task and the
/// read loop in place. Whatever ends the read loop drives exactly one
/// `unregister`, which in turn releases the write loop.
pub async fn serve(state: Arc<AppState>, ws: WsStream) {
    let conn_id = Uuid::new_v4();
    let (outbound_tx, outbound_rx) = mpsc::channel::<Bytes>(state.args.queue_capacity);
    let (closed_tx, closed_rx) = watch::channel(false);

    if state
        .hub
        .register(ConnHandle {
            id: conn_id,
            outbound: outbound_tx.clone(),
            closed: closed_tx,
        })
        .is_err()
    {
        warn!(conn = %conn_id, "hub not running, dropping connection");
        return;
    }

    let (sink, stream) = ws.split();

    let writer = tokio::spawn(write_loop(
        Arc::clone(&state),
        conn_id,
        sink,
        outbound_rx,
        closed_rx,
    ));

    read_loop(&state, conn_id, stream, &outbound_tx).await;

    // The read side is done (error, deadline or close): one unregister,
    // which closes the outbound path and lets the write loop finish.
    let _ = state.hub.unregister(conn_id);
    drop(outbound_tx);
    let _ = writer.await;

    info!(conn = %conn_id, "connection finished");
}

/// Pump inbound frames from the transport.
///
/// Each read carries the read deadline, so any arriving frame (data or
/// Pong) refreshes it. Undecodable frames are dropped without harming
/// the connection; transport errors end the loop.
async fn read_loop(
    state: &Arc<AppState>,
    conn_id: Uuid,
    mut stream: SplitStream<WsStream>,
    outbound: &mpsc::Sender<Bytes>,
) {
    let deadline = state.args.read_deadline();

    loop {
        let msg = match timeout(deadline, stream.next()).await {
            Err(_) => {
                info!(conn = %conn_id, "read deadline expired, dropping connection");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                // An expected close is routine; anything else is worth a warning
                match e {
                    WsError::ConnectionClosed | WsError::AlreadyClosed => {
                        debug!(conn = %conn_id, "transport closed")
                    }
                    e => warn!(conn = %conn_id, error = %e, "read error"),
                }
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => {
                handle_frame(state, conn_id, text.into_bytes(), outbound).await
            }
            Message::Binary(data) => handle_frame(state, conn_id, data, outbound).await,
            // Transport pings are answered by the protocol layer; both
            // control frames still count as liveness via the timeout above
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                debug!(conn = %conn_id, "peer closed");
                break;
            }
            Message::Frame(_) => {}
        }
    }
}

/// Dispatch one inbound data frame.
async fn handle_frame(
    state: &Arc<AppState>,
    conn_id: Uuid,
    data: Vec<u8>,
    outbound: &mpsc::Sender<Bytes>,
) {
    // Liveness probe outside the structured protocol: no decode at all
    if is_ping(&data) {
        if outbound.try_send(PONG).is_err() {
            // Own queue full means this connection is its own slow
            // consumer; the overflow policy is eviction
            warn!(conn = %conn_id, "outbound queue full on PONG, evicting");
            let _ = state.hub.unregister(conn_id);
        }
        return;
    }

    let packet = match codec::decode(&data) {
        Ok(packet) => packet,
        Err(e) => {
            warn!(conn = %conn_id, error = %e, "undecodable frame dropped");
            return;
        }
    };

    match packet {
        Packet::Heartbeat(heartbeat) => {
            if let Err(e) = state.validator.validate(&heartbeat) {
                warn!(conn = %conn_id, error = %e, "heartbeat rejected");
                return;
            }
            // Identity state lives in the hub; it also arbitrates
            // conflicting claims from an already-bound connection
            let _ = state.hub.bind(conn_id, heartbeat.id, heartbeat.ts);
        }
        Packet::Instruction(instruction) => {
            state.router.route_client(instruction).await;
        }
    }
}

/// Case-insensitive match for the literal "PING" probe, ignoring
/// surrounding whitespace.
fn is_ping(data: &[u8]) -> bool {
    data.trim_ascii().eq_ignore_ascii_case(b"PING")
}

/// Pump the outbound queue to the transport.
///
/// Sends a keepalive ping when idle, coalesces queued messages into a
/// single write, and turns the hub's close signal (or queue closure)
/// into a close frame. Write errors end the loop; unregistration stays
/// the read side's job.
async fn write_loop(
    state: Arc<AppState>,
    conn_id: Uuid,
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::Receiver<Bytes>,
    mut closed: watch::Receiver<bool>,
) {
    let write_deadline = state.args.write_deadline();
    let period = state.args.ping_period();
    let mut ping = interval_at(Instant::now() + period, period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Pending data wins over the ping timer
            biased;

            maybe = outbound.recv() => match maybe {
                Some(frame) => {
                    let mut buf = frame.to_vec();
                    // Coalesce whatever else is already queued into this
                    // same transport write
                    while let Ok(next) = outbound.try_recv() {
                        buf.push(COALESCE_DELIMITER);
                        buf.extend_from_slice(&next);
                    }
                    if write(&mut sink, conn_id, Message::Binary(buf), write_deadline)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                None => {
                    let _ = write(&mut sink, conn_id, Message::Close(None), write_deadline).await;
                    break;
                }
            },
            _ = closed.changed() => {
                debug!(conn = %conn_id, "close signal from hub");
                let _ = write(&mut sink, conn_id, Message::Close(None), write_deadline).await;
                break;
            }
            _ = ping.tick() => {
                if write(&mut sink, conn_id, Message::Ping(Vec::new()), write_deadline)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

async fn write(
    sink: &mut SplitSink<WsStream, Message>,
    conn_id: Uuid,
    msg: Message,
    deadline: std::time::Duration,
) -> Result<(), ()> {
    match timeout(deadline, sink.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(conn = %conn_id, error = %e, "write failed");
            Err(())
        }
        Err(_) => {
            warn!(conn = %conn_id, "write deadline expired");
            Err(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_probe_matches_loosely() {
        assert!(is_ping(b"PING"));
        assert!(is_ping(b"ping"));
        assert!(is_ping(b"Ping"));
        assert!(is_ping(b"  PING \n"));
    }

    #[test]
    fn ping_probe_rejects_near_misses() {
        assert!(!is_ping(b"PINGPONG"));
        assert!(!is_ping(b"PIN"));
        assert!(!is_ping(b""));
        assert!(!is_ping(br#"{"type":"heartbeat"}"#));
    }
}
