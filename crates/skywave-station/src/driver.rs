//! Driver tasks: the only code that touches the clock, the channels,
//! and the radio.
//!
//! Three tasks per station, talking over bounded queues:
//!
//! - **RX**: capture buffers from the radio callback, through the modem,
//!   the link envelope, and the router.
//! - **TX**: outbound frames onto the radio, ACK queue drained ahead of
//!   data.
//! - **Tick**: drives retransmission backoff, route discovery timeouts,
//!   and reassembly expiry every 50 ms.
//!
//! Every state-machine lock is released before any await; actions are
//! collected under the lock and executed after, which is what keeps the
//! stack deadlock-free with the loopback radio's synchronous delivery.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use skywave_content::{
    AppliedDom, ContentKind, RequestSigner, SignedRequest, compress, decompress,
    vdom::{self, DEFAULT_MAX_DELTA_OPS},
};
use skywave_core::{Environment, FragmentKey, Freshness, ReliabilityAction};
use skywave_mesh::RouterAction;
use skywave_proto::{
    Callsign, Packet, PacketFlags, PacketHeader, PacketId, PacketType, Payload, fragment,
    linkframe,
    payload::{
        app::{DeltaPayload, HttpRequest, HttpResponse, RequestAuth},
        link::AckPayload,
    },
    reassembly::CompleteMessage,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    error::StationError,
    radio::RadioInterface,
    station::{HandlerReply, IncomingRequest, StationShared, TxItem},
    storage::{PageMeta, TrustLookup},
};

/// Payloads smaller than this skip the compression attempt.
const COMPRESS_THRESHOLD: usize = 96;

/// Tick cadence for the reliability and routing clocks.
const TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Milliseconds since the Unix epoch, for signing and cache metadata.
pub(crate) fn unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Spawn the three driver tasks and wire the radio callback.
pub(crate) fn spawn(
    shared: Arc<StationShared>,
    radio: Arc<dyn RadioInterface>,
    rx_data: mpsc::Receiver<TxItem>,
    rx_ack: mpsc::Receiver<TxItem>,
) -> Result<Vec<tokio::task::JoinHandle<()>>, StationError> {
    let (sample_tx, mut sample_rx) = mpsc::channel::<Vec<f32>>(32);

    let cb_shared = Arc::clone(&shared);
    radio.start_receive(Arc::new(move |samples: &[f32]| {
        if sample_tx.try_send(samples.to_vec()).is_err() {
            cb_shared.rx_overflow.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }))?;

    let mut handles = Vec::new();

    let rx_shared = Arc::clone(&shared);
    handles.push(tokio::spawn(async move {
        while let Some(samples) = sample_rx.recv().await {
            handle_capture(&rx_shared, &samples).await;
        }
    }));

    let tx_shared = Arc::clone(&shared);
    handles.push(tokio::spawn(tx_loop(tx_shared, radio, rx_data, rx_ack)));

    handles.push(tokio::spawn(tick_loop(shared)));

    Ok(handles)
}

/// TX task: ACKs first, then data.
async fn tx_loop(
    shared: Arc<StationShared>,
    radio: Arc<dyn RadioInterface>,
    mut rx_data: mpsc::Receiver<TxItem>,
    mut rx_ack: mpsc::Receiver<TxItem>,
) {
    loop {
        let item = tokio::select! {
            biased;
            item = rx_ack.recv() => item,
            item = rx_data.recv() => item,
        };
        let Some(item) = item else { break };
        transmit_item(&shared, &radio, item).await;
    }
}

async fn transmit_item(shared: &Arc<StationShared>, radio: &Arc<dyn RadioInterface>, item: TxItem) {
    let frame = linkframe::encode(shared.config.callsign, item.next_hop, &item.packet);

    let samples = match shared.modem.lock() {
        Ok(mut modem) => modem.transmit(&frame),
        Err(_) => return,
    };
    let samples = match samples {
        Ok(samples) => samples,
        Err(error) => {
            warn!(%error, "modem rejected frame");
            return;
        },
    };

    // transmit blocks until PTT drops; keep it off the async threads.
    let radio = Arc::clone(radio);
    let result = tokio::task::spawn_blocking(move || radio.transmit(&samples)).await;
    match result {
        Ok(Ok(())) => {},
        Ok(Err(error)) => warn!(%error, "radio transmit failed"),
        Err(error) => warn!(%error, "radio transmit task failed"),
    }
}

/// Tick task: reliability backoff, discovery timeouts, reassembly GC.
async fn tick_loop(shared: Arc<StationShared>) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let now = shared.env.now();

        let router_actions = match shared.router.lock() {
            Ok(mut router) => router.tick(now),
            Err(_) => Vec::new(),
        };
        pump(&shared, router_actions).await;

        let reliability_actions = match shared.pending_acks.lock() {
            Ok(mut acks) => acks.tick(now),
            Err(_) => Vec::new(),
        };
        for action in reliability_actions {
            match action {
                ReliabilityAction::Retransmit { destination, packet } => {
                    let actions = match shared.router.lock() {
                        Ok(mut router) => router.send_data(now, destination, packet),
                        Err(_) => Vec::new(),
                    };
                    pump(&shared, actions).await;
                },
                ReliabilityAction::Failed { error, .. } => {
                    let pending = shared
                        .pending_requests
                        .lock()
                        .ok()
                        .and_then(|mut p| p.remove(&error.id));
                    match pending {
                        Some(pending) => {
                            let _ = pending.responder.send(Err(StationError::RetriesExhausted));
                        },
                        None => debug!(id = %error.id, "fragment failed outside a request"),
                    }
                    if let Ok(mut acks) = shared.pending_acks.lock() {
                        acks.abandon(error.id);
                    }
                },
            }
        }

        if let Ok(mut reassembler) = shared.reassembler.lock() {
            for id in reassembler.expire(now) {
                debug!(%id, "reassembly timed out");
            }
        }
    }
}

/// RX path: one capture buffer, hopefully one frame.
async fn handle_capture(shared: &Arc<StationShared>, samples: &[f32]) {
    let (received, snr_db) = match shared.modem.lock() {
        Ok(mut modem) => {
            let received = modem.receive(samples);
            (received, modem.status().snr_db)
        },
        Err(_) => return,
    };

    let bytes = match received {
        Ok(bytes) => bytes,
        Err(error) => {
            debug!(%error, "frame not decodable");
            shared.bump(|c| c.receive_errors += 1);
            return;
        },
    };

    let frame = match linkframe::decode(&bytes) {
        Ok(frame) => frame,
        Err(error) => {
            debug!(%error, "bad link envelope");
            shared.bump(|c| c.receive_errors += 1);
            return;
        },
    };

    if let Some(recipient) = frame.recipient {
        if recipient != shared.config.callsign {
            return;
        }
    }

    let now = shared.env.now();
    let actions = match shared.router.lock() {
        Ok(mut router) => {
            if let Some(snr) = snr_db {
                router.set_link_quality((snr / 30.0).clamp(0.0, 1.0));
            }
            router.handle_packet(now, frame.sender, &frame.packet)
        },
        Err(_) => Vec::new(),
    };
    pump(shared, actions).await;
}

/// Execute router actions, feeding local deliveries back through the
/// dispatch loop. Iterative on purpose: delivery can produce more
/// actions (ACKs, responses) without recursing.
pub(crate) async fn pump(shared: &Arc<StationShared>, actions: Vec<RouterAction>) {
    let mut queue: VecDeque<RouterAction> = actions.into();
    while let Some(action) = queue.pop_front() {
        match action {
            RouterAction::Broadcast(packet) => {
                let _ = shared.tx_data.send(TxItem { next_hop: None, packet }).await;
            },
            RouterAction::Unicast { next_hop, packet } => {
                let _ = shared.tx_data.send(TxItem { next_hop: Some(next_hop), packet }).await;
            },
            RouterAction::Deliver { source, packet } => {
                let more = deliver_local(shared, source, packet).await;
                queue.extend(more);
            },
            RouterAction::DiscoveryFailed { destination } => {
                fail_pending_for(shared, destination);
            },
            RouterAction::Warning(warning) => {
                warn!(?warning, "mesh warning");
            },
        }
    }
}

/// Handle a packet addressed to this station.
async fn deliver_local(
    shared: &Arc<StationShared>,
    source: Callsign,
    packet: Packet,
) -> Vec<RouterAction> {
    match packet.header.packet_type() {
        PacketType::Ack => {
            if let Ok(Payload::Ack(ack)) = Payload::from_packet(&packet) {
                if let Ok(mut acks) = shared.pending_acks.lock() {
                    acks.acknowledge(ack.id, ack.sequence);
                }
            }
            Vec::new()
        },
        PacketType::Request
        | PacketType::Response
        | PacketType::Delta
        | PacketType::Stream
        | PacketType::Schema => deliver_data(shared, source, packet).await,
        // Mesh control that reached the dispatcher is a routing bug, not
        // application traffic.
        _ => {
            debug!(?source, "mesh control frame delivered locally, ignoring");
            Vec::new()
        },
    }
}

async fn deliver_data(
    shared: &Arc<StationShared>,
    source: Callsign,
    packet: Packet,
) -> Vec<RouterAction> {
    let id = packet.header.packet_id();
    let sequence = packet.header.sequence();
    let mut out = Vec::new();

    // ACK before dedup: a retransmitted fragment means our previous ACK
    // was lost, and the fix is another ACK.
    if shared.config.send_acks && source != shared.config.callsign {
        let payload = Payload::Ack(AckPayload { id, sequence });
        let header = PacketHeader::new(PacketType::Ack, shared.env.random_packet_id());
        if let Ok(ack_packet) = payload.into_packet(header) {
            let now = shared.env.now();
            let actions = match shared.router.lock() {
                Ok(mut router) => router.send_data(now, source, ack_packet),
                Err(_) => Vec::new(),
            };
            for action in actions {
                match action {
                    RouterAction::Unicast { next_hop, packet } => {
                        let _ = shared
                            .tx_ack
                            .send(TxItem { next_hop: Some(next_hop), packet })
                            .await;
                    },
                    RouterAction::Broadcast(packet) => {
                        let _ = shared.tx_ack.send(TxItem { next_hop: None, packet }).await;
                    },
                    other => out.push(other),
                }
            }
            shared.bump(|c| c.acks_sent += 1);
        }
    }

    let key = FragmentKey { originator: source, id, sequence };
    let fresh = shared
        .seen_fragments
        .lock()
        .map(|mut seen| seen.offer(key))
        .unwrap_or(Freshness::Fresh);
    if fresh == Freshness::Duplicate {
        shared.bump(|c| c.duplicates_dropped += 1);
        return out;
    }

    let now = shared.env.now();
    let complete = match shared.reassembler.lock() {
        Ok(mut reassembler) => reassembler.accept(now, &packet),
        Err(_) => return out,
    };
    match complete {
        Ok(Some(message)) => {
            out.extend(handle_complete(shared, source, message).await);
        },
        Ok(None) => {},
        Err(error) => debug!(%error, "fragment rejected"),
    }
    out
}

async fn handle_complete(
    shared: &Arc<StationShared>,
    source: Callsign,
    message: CompleteMessage,
) -> Vec<RouterAction> {
    let bytes = if message.flags.contains(PacketFlags::COMPRESSED) {
        match decompress(&message.payload) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(%error, "payload decompression failed");
                return Vec::new();
            },
        }
    } else {
        message.payload.clone()
    };

    let payload = match Payload::decode(message.packet_type, &bytes) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(%error, "payload decode failed");
            return Vec::new();
        },
    };

    match payload {
        Payload::Request(request) => handle_request(shared, source, message.id, request).await,
        Payload::Response(response) => {
            complete_response(shared, source, response);
            Vec::new()
        },
        Payload::Delta(delta) => {
            complete_delta(shared, source, &delta);
            Vec::new()
        },
        Payload::Stream(_) | Payload::Schema(_) => {
            debug!("stream/schema payload ignored (reserved capability)");
            Vec::new()
        },
        _ => Vec::new(),
    }
}

async fn handle_request(
    shared: &Arc<StationShared>,
    source: Callsign,
    request_id: PacketId,
    request: HttpRequest,
) -> Vec<RouterAction> {
    shared.bump(|c| c.requests_handled += 1);

    let mut verified_callsign = None;
    if let Some(auth) = &request.auth {
        let trust = shared.trust.read().ok().and_then(|slot| (*slot).clone());
        let result = match trust {
            None => Err(skywave_content::SignatureError::UntrustedKey {
                callsign: auth.callsign.to_string(),
            }),
            Some(trust) => {
                let callsign_str = auth.callsign.to_string();
                let signed = SignedRequest {
                    callsign: &callsign_str,
                    method: &request.method,
                    path: &request.path,
                    headers: &request.headers,
                    body: request.body.as_deref(),
                    timestamp_ms: auth.timestamp_ms,
                    nonce: auth.nonce,
                };
                let lookup = TrustLookup(trust.as_ref());
                match shared.verifier.lock() {
                    Ok(mut verifier) => verifier.verify(
                        &lookup,
                        &signed,
                        &auth.signature,
                        &auth.public_key_pem,
                        unix_ms(),
                    ),
                    Err(_) => {
                        Err(skywave_content::SignatureError::UntrustedKey {
                            callsign: auth.callsign.to_string(),
                        })
                    },
                }
            },
        };
        match result {
            Ok(()) => verified_callsign = Some(auth.callsign.to_string()),
            Err(error) => {
                warn!(%error, %source, "rejected signed request");
                let body = error.to_string().into_bytes();
                return respond(shared, source, request_id, 401, Default::default(), body);
            },
        }
    }

    let handler = shared.handler.read().ok().and_then(|slot| (*slot).clone());
    let Some(handler) = handler else {
        debug!(%source, path = %request.path, "no handler registered, dropping request");
        return Vec::new();
    };

    let incoming = IncomingRequest {
        source,
        method: request.method.clone(),
        path: request.path.clone(),
        headers: request.headers.clone(),
        body: request.body.clone(),
        verified_callsign,
    };
    let reply = handler(incoming).await;

    match reply {
        HandlerReply::Response { status, headers, body } => {
            respond(shared, source, request_id, status, headers, body)
        },
        HandlerReply::Page { status, mut headers, tree } => {
            let key = (source, request.path.clone());
            let previous = shared
                .tree_history
                .lock()
                .ok()
                .and_then(|history| history.get(&key).cloned());
            let ops = vdom::diff(previous.as_ref(), &tree);
            if let Ok(mut history) = shared.tree_history.lock() {
                history.insert(key, tree.clone());
            }

            if previous.is_some() && ops.len() <= DEFAULT_MAX_DELTA_OPS {
                let ops_bytes = match vdom::encode_ops(&ops) {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        warn!(%error, "delta encode failed, sending full page");
                        headers.insert("content-type".to_string(), "text/html".to_string());
                        let body = vdom::render(&tree).into_bytes();
                        return respond(shared, source, request_id, status, headers, body);
                    },
                };
                shared.bump(|c| c.deltas_sent += 1);
                let payload = Payload::Delta(DeltaPayload {
                    in_reply_to: request_id,
                    target: request.path.clone(),
                    ops: ops_bytes,
                });
                dispatch_message(shared, source, payload).unwrap_or_default()
            } else {
                headers.insert("content-type".to_string(), "text/html".to_string());
                let body = vdom::render(&tree).into_bytes();
                // Ship the tree too so the peer can hold a structured
                // page view for later delta updates.
                let mut tree_bytes = Vec::new();
                let page_tree = ciborium::ser::into_writer(&tree, &mut tree_bytes)
                    .ok()
                    .map(|()| tree_bytes);
                respond_with_tree(shared, source, request_id, status, headers, body, page_tree)
            }
        },
    }
}

fn respond(
    shared: &Arc<StationShared>,
    source: Callsign,
    request_id: PacketId,
    status: u16,
    headers: std::collections::BTreeMap<String, String>,
    body: Vec<u8>,
) -> Vec<RouterAction> {
    respond_with_tree(shared, source, request_id, status, headers, body, None)
}

#[allow(clippy::too_many_arguments)]
fn respond_with_tree(
    shared: &Arc<StationShared>,
    source: Callsign,
    request_id: PacketId,
    status: u16,
    headers: std::collections::BTreeMap<String, String>,
    body: Vec<u8>,
    page_tree: Option<Vec<u8>>,
) -> Vec<RouterAction> {
    let response = HttpResponse { in_reply_to: request_id, status, headers, body, page_tree };
    dispatch_message(shared, source, Payload::Response(response)).unwrap_or_default()
}

/// Requester side: a full response arrived.
fn complete_response(shared: &Arc<StationShared>, source: Callsign, response: HttpResponse) {
    let pending = shared
        .pending_requests
        .lock()
        .ok()
        .and_then(|mut pending| pending.remove(&response.in_reply_to));
    let Some(pending) = pending else {
        debug!(%source, "response without a pending request");
        return;
    };

    shared.bump(|c| c.responses_received += 1);

    let content_type =
        response.headers.get("content-type").cloned().unwrap_or_default();
    // Prefer the structured tree: it lets later deltas navigate into the
    // page. Raw HTML only supports whole-page replaces.
    let applied = match &response.page_tree {
        Some(bytes) => ciborium::de::from_reader::<skywave_content::Node, _>(bytes.as_slice())
            .ok()
            .map(|tree| AppliedDom::from_node(&tree)),
        None if content_type.contains("text/html") => {
            String::from_utf8(response.body.clone()).ok().map(AppliedDom::from_html)
        },
        None => None,
    };
    if let Some(applied) = applied {
        if let Ok(mut pages) = shared.page_state.lock() {
            pages.insert((source, pending.path.clone()), applied);
        }
    }

    cache_page(shared, source, &pending.path, &content_type, &response.body);
    let _ = pending.responder.send(Ok(response));
}

/// Requester side: a delta arrived instead of a full response.
fn complete_delta(shared: &Arc<StationShared>, source: Callsign, delta: &DeltaPayload) {
    let pending = shared
        .pending_requests
        .lock()
        .ok()
        .and_then(|mut pending| pending.remove(&delta.in_reply_to));
    let Some(pending) = pending else {
        debug!(%source, "delta without a pending request");
        return;
    };

    let ops = match vdom::decode_ops(&delta.ops) {
        Ok(ops) => ops,
        Err(error) => {
            let _ = pending.responder.send(Err(StationError::Protocol(error.to_string())));
            return;
        },
    };

    let key = (source, delta.target.clone());
    let html = {
        let mut pages = match shared.page_state.lock() {
            Ok(pages) => pages,
            Err(_) => return,
        };
        let Some(dom) = pages.get_mut(&key) else {
            drop(pages);
            let _ = pending.responder.send(Err(StationError::Protocol(
                "delta update without a cached page".to_string(),
            )));
            return;
        };
        if let Err(error) = dom.apply_all(&ops) {
            let _ = pending.responder.send(Err(StationError::Protocol(error.to_string())));
            return;
        }
        dom.render()
    };

    shared.bump(|c| c.deltas_received += 1);
    cache_page(shared, source, &pending.path, "text/html", html.as_bytes());

    let mut headers = std::collections::BTreeMap::new();
    headers.insert("content-type".to_string(), "text/html".to_string());
    let response = HttpResponse {
        in_reply_to: delta.in_reply_to,
        status: 200,
        headers,
        body: html.into_bytes(),
        page_tree: None,
    };
    let _ = pending.responder.send(Ok(response));
}

fn cache_page(
    shared: &Arc<StationShared>,
    source: Callsign,
    path: &str,
    content_type: &str,
    body: &[u8],
) {
    let cache = shared.pages.read().ok().and_then(|slot| (*slot).clone());
    if let Some(cache) = cache {
        let meta = PageMeta {
            content_type: content_type.to_string(),
            stored_at_ms: unix_ms().max(0) as u64,
            origin: Some(source.to_string()),
        };
        if let Err(error) = cache.put(path, body, &meta) {
            warn!(%error, "page cache write failed");
        }
    }
}

/// Requests to a destination the mesh gave up on all fail together.
fn fail_pending_for(shared: &Arc<StationShared>, destination: Callsign) {
    let mut failed: Vec<PacketId> = Vec::new();
    if let Ok(mut pending) = shared.pending_requests.lock() {
        let ids: Vec<PacketId> = pending
            .iter()
            .filter(|(_, p)| p.target == destination)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(request) = pending.remove(&id) {
                let _ = request.responder.send(Err(StationError::NoRoute { destination }));
                failed.push(id);
            }
        }
    }
    if let Ok(mut acks) = shared.pending_acks.lock() {
        for id in &failed {
            acks.abandon(*id);
        }
    }
}

/// Serialize, compress, fragment, track, and route one logical message.
/// Returns the router actions for the caller's pump.
pub(crate) fn dispatch_message(
    shared: &Arc<StationShared>,
    target: Callsign,
    payload: Payload,
) -> Result<Vec<RouterAction>, StationError> {
    dispatch_message_with_id(shared, target, shared.env.random_packet_id(), payload)
}

pub(crate) fn dispatch_message_with_id(
    shared: &Arc<StationShared>,
    target: Callsign,
    id: PacketId,
    payload: Payload,
) -> Result<Vec<RouterAction>, StationError> {
    let kind = match &payload {
        Payload::Response(response) => {
            let html = response
                .headers
                .get("content-type")
                .map(|ct| ct.contains("text/html"))
                .unwrap_or(false);
            if html { ContentKind::Html } else { ContentKind::Generic }
        },
        _ => ContentKind::Generic,
    };
    let mut flags = PacketFlags::empty();
    if matches!(payload, Payload::Delta(_)) {
        flags = flags.with(PacketFlags::DELTA_UPDATE);
    }

    let packet_type = payload.packet_type();
    let mut bytes =
        payload.to_bytes().map_err(|e| StationError::Protocol(e.to_string()))?;

    if bytes.len() > COMPRESS_THRESHOLD {
        let blob = compress(&bytes, kind);
        if blob.len() < bytes.len() {
            bytes = blob;
            flags = flags.with(PacketFlags::COMPRESSED);
        }
    }

    let fragments =
        fragment::fragment_message(packet_type, id, flags, &bytes, shared.config.max_packet_len)
            .map_err(|e| StationError::Protocol(e.to_string()))?;

    let now = shared.env.now();
    let mut actions = Vec::new();
    {
        let mut acks = shared
            .pending_acks
            .lock()
            .map_err(|_| StationError::Protocol("state poisoned".to_string()))?;
        let mut router = shared
            .router
            .lock()
            .map_err(|_| StationError::Protocol("state poisoned".to_string()))?;
        for fragment in fragments {
            acks.track(now, target, fragment.clone());
            actions.extend(router.send_data(now, target, fragment));
        }
    }
    Ok(actions)
}

/// Async wrapper used by the public API: dispatch and pump.
pub(crate) async fn send_message(
    shared: &Arc<StationShared>,
    target: Callsign,
    id: PacketId,
    payload: Payload,
) -> Result<(), StationError> {
    let actions = dispatch_message_with_id(shared, target, id, payload)?;
    pump(shared, actions).await;
    Ok(())
}

/// Build the signature envelope for an outgoing request.
pub(crate) fn sign_request(
    shared: &Arc<StationShared>,
    signer: &RequestSigner,
    request: &HttpRequest,
) -> Result<RequestAuth, StationError> {
    let mut nonce = [0u8; 16];
    shared.env.random_bytes(&mut nonce);
    let timestamp_ms = unix_ms();

    let signed = SignedRequest {
        callsign: signer.callsign(),
        method: &request.method,
        path: &request.path,
        headers: &request.headers,
        body: request.body.as_deref(),
        timestamp_ms,
        nonce,
    };
    let signature = signer.sign(&signed);

    let callsign = Callsign::parse(signer.callsign())
        .map_err(|e| StationError::Protocol(e.to_string()))?;

    Ok(RequestAuth {
        callsign,
        timestamp_ms,
        nonce,
        signature,
        public_key_pem: signer.public_key_pem().to_string(),
    })
}
