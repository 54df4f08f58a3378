//! The station: the whole stack assembled behind a request/response API.
//!
//! A `Station` owns one modem, one mesh router, one reliability table,
//! and one reassembly table, and drives them with a small set of tasks
//! over bounded channels (see `driver`). All protocol state machines are
//! sans-IO; this layer is the only place that touches the clock, the
//! radio, and the channels.

use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use skywave_content::{AppliedDom, Node, RequestSigner, RequestVerifier};
use skywave_core::{
    Environment, FragmentKey, PendingAcks, RecentlySeen, ReliabilityConfig, StackConfig,
};
use skywave_mesh::MeshRouter;
use skywave_modem::{Modem, ModemConfig, Modulation};
use skywave_proto::{
    Callsign, Packet, PacketId,
    payload::app::{HttpRequest, HttpResponse},
};
use tokio::sync::{mpsc, oneshot};

use crate::{
    driver,
    env::StationEnv,
    error::StationError,
    radio::RadioInterface,
    storage::{PageCache, TrustedKeyStore},
};

/// Default deadline for `send_request`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A request as seen by the registered handler.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    /// Originating station.
    pub source: Callsign,
    /// Request method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// Request body.
    pub body: Option<Vec<u8>>,
    /// Callsign whose signature verified, if the request was signed.
    pub verified_callsign: Option<String>,
}

/// What a handler can answer with.
#[derive(Debug, Clone)]
pub enum HandlerReply {
    /// A plain response, sent as-is.
    Response {
        /// Status code.
        status: u16,
        /// Response headers.
        headers: BTreeMap<String, String>,
        /// Response body.
        body: Vec<u8>,
    },
    /// A page tree: the station decides between a full response and a
    /// delta update against the tree it previously sent this peer.
    Page {
        /// Status code.
        status: u16,
        /// Response headers (content type is set automatically).
        headers: BTreeMap<String, String>,
        /// The page as a virtual-DOM tree.
        tree: Node,
    },
}

/// Boxed async request handler.
pub type RequestHandler = Arc<
    dyn Fn(IncomingRequest) -> Pin<Box<dyn Future<Output = HandlerReply> + Send>> + Send + Sync,
>;

/// Snapshot returned by [`Station::status`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StationStatus {
    /// Modulation currently selected.
    pub modulation: Modulation,
    /// Smoothed SNR estimate in dB.
    pub snr_db: Option<f32>,
    /// Net data rate at the current modulation.
    pub data_rate_bps: f32,
    /// Route discoveries in flight.
    pub pending_routes: usize,
    /// Fragments awaiting acknowledgement.
    pub pending_acks: usize,
}

/// Station event counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StationCounters {
    /// Requests sent by this station.
    pub requests_sent: u64,
    /// Responses received for our requests.
    pub responses_received: u64,
    /// Delta updates received and applied.
    pub deltas_received: u64,
    /// Delta updates sent instead of full responses.
    pub deltas_sent: u64,
    /// Requests handled for peers.
    pub requests_handled: u64,
    /// ACK frames sent.
    pub acks_sent: u64,
    /// Duplicate fragments dropped before the upper layer.
    pub duplicates_dropped: u64,
    /// Captures the modem could not decode.
    pub receive_errors: u64,
    /// Sample buffers dropped because the RX queue was full.
    pub rx_overflow: u64,
}

/// An outbound frame: where it goes and what it carries.
#[derive(Debug, Clone)]
pub(crate) struct TxItem {
    /// Link-layer recipient; `None` broadcasts.
    pub next_hop: Option<Callsign>,
    /// The packet to put on the air.
    pub packet: Packet,
}

/// A request awaiting its response.
pub(crate) struct PendingRequest {
    pub target: Callsign,
    pub path: String,
    pub responder: oneshot::Sender<Result<HttpResponse, StationError>>,
}

type Instant = tokio::time::Instant;

/// State shared between the API and the driver tasks.
pub(crate) struct StationShared {
    pub config: StackConfig,
    pub env: StationEnv,
    pub modem: Mutex<Modem>,
    pub router: Mutex<MeshRouter<StationEnv>>,
    pub reassembler: Mutex<skywave_proto::reassembly::Reassembler<Instant>>,
    pub pending_acks: Mutex<PendingAcks<Instant>>,
    pub seen_fragments: Mutex<RecentlySeen<FragmentKey>>,
    pub pending_requests: Mutex<HashMap<PacketId, PendingRequest>>,
    pub handler: RwLock<Option<RequestHandler>>,
    pub signer: RwLock<Option<Arc<RequestSigner>>>,
    pub verifier: Mutex<RequestVerifier>,
    pub trust: RwLock<Option<Arc<dyn TrustedKeyStore>>>,
    pub pages: RwLock<Option<Arc<dyn PageCache>>>,
    /// Responder side: last tree sent per (peer, path).
    pub tree_history: Mutex<HashMap<(Callsign, String), Node>>,
    /// Requester side: applied page state per (peer, path).
    pub page_state: Mutex<HashMap<(Callsign, String), AppliedDom>>,
    pub tx_data: mpsc::Sender<TxItem>,
    pub tx_ack: mpsc::Sender<TxItem>,
    pub counters: Mutex<StationCounters>,
    pub rx_overflow: AtomicU64,
}

impl StationShared {
    pub fn bump<F: FnOnce(&mut StationCounters)>(&self, f: F) {
        if let Ok(mut counters) = self.counters.lock() {
            f(&mut counters);
        }
    }
}

/// The assembled stack for one callsign.
pub struct Station {
    shared: Arc<StationShared>,
    radio: RwLock<Option<Arc<dyn RadioInterface>>>,
    rx_data: Mutex<Option<mpsc::Receiver<TxItem>>>,
    rx_ack: Mutex<Option<mpsc::Receiver<TxItem>>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    started: AtomicBool,
}

impl Station {
    /// Build a station. Nothing runs until [`Station::start`].
    pub fn new(config: StackConfig, modem_config: ModemConfig) -> Result<Self, StationError> {
        let modem = Modem::new(modem_config).map_err(|e| StationError::Radio(e.to_string()))?;
        let env = StationEnv;
        let router = MeshRouter::new(env, config.clone());

        let (tx_data, rx_data) = mpsc::channel(64);
        let (tx_ack, rx_ack) = mpsc::channel(64);

        let reliability = ReliabilityConfig {
            initial_timeout: config.ack_timeout,
            backoff_cap: config.ack_backoff_cap,
            max_retries: config.ack_retries,
            capacity: 128,
        };
        let reassembly = skywave_proto::reassembly::ReassemblyConfig {
            timeout: config.reassembly_timeout,
            capacity: config.reassembly_capacity,
        };

        let shared = Arc::new(StationShared {
            env,
            modem: Mutex::new(modem),
            router: Mutex::new(router),
            reassembler: Mutex::new(skywave_proto::reassembly::Reassembler::new(reassembly)),
            pending_acks: Mutex::new(PendingAcks::new(reliability)),
            seen_fragments: Mutex::new(RecentlySeen::new(config.seen_fragments_capacity)),
            pending_requests: Mutex::new(HashMap::new()),
            handler: RwLock::new(None),
            signer: RwLock::new(None),
            verifier: Mutex::new(RequestVerifier::new()),
            trust: RwLock::new(None),
            pages: RwLock::new(None),
            tree_history: Mutex::new(HashMap::new()),
            page_state: Mutex::new(HashMap::new()),
            tx_data,
            tx_ack,
            counters: Mutex::new(StationCounters::default()),
            rx_overflow: AtomicU64::new(0),
            config,
        });

        Ok(Self {
            shared,
            radio: RwLock::new(None),
            rx_data: Mutex::new(Some(rx_data)),
            rx_ack: Mutex::new(Some(rx_ack)),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// This station's callsign.
    #[must_use]
    pub fn callsign(&self) -> Callsign {
        self.shared.config.callsign
    }

    /// Attach the radio. Must happen before [`Station::start`].
    pub fn set_radio(&self, radio: Arc<dyn RadioInterface>) {
        if let Ok(mut slot) = self.radio.write() {
            *slot = Some(radio);
        }
    }

    /// Install the request signer used for outgoing requests.
    pub fn set_signer(&self, signer: RequestSigner) {
        if let Ok(mut slot) = self.shared.signer.write() {
            *slot = Some(Arc::new(signer));
        }
    }

    /// Attach the trusted-key store consulted for incoming signatures.
    pub fn set_trust_store(&self, store: Arc<dyn TrustedKeyStore>) {
        if let Ok(mut slot) = self.shared.trust.write() {
            *slot = Some(store);
        }
    }

    /// Attach the page cache fed by received pages.
    pub fn set_page_cache(&self, cache: Arc<dyn PageCache>) {
        if let Ok(mut slot) = self.shared.pages.write() {
            *slot = Some(cache);
        }
    }

    /// Register the request handler.
    ///
    /// A station without a handler stays silent: requests are logged and
    /// dropped, not answered with an error page.
    pub fn on_request<F, Fut>(&self, handler: F)
    where
        F: Fn(IncomingRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerReply> + Send + 'static,
    {
        let wrapped: RequestHandler = Arc::new(move |request| {
            Box::pin(handler(request)) as Pin<Box<dyn Future<Output = HandlerReply> + Send>>
        });
        if let Ok(mut slot) = self.shared.handler.write() {
            *slot = Some(wrapped);
        }
    }

    /// Pin the modem's transmit modulation.
    pub fn set_modulation(&self, modulation: Modulation) {
        if let Ok(mut modem) = self.shared.modem.lock() {
            modem.set_modulation(modulation);
        }
    }

    /// Start the driver tasks and begin receiving.
    pub fn start(&self) -> Result<(), StationError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let radio = self
            .radio
            .read()
            .ok()
            .and_then(|slot| slot.clone())
            .ok_or_else(|| StationError::Radio("no radio attached".to_string()))?;

        let rx_data = self
            .rx_data
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or(StationError::NotRunning)?;
        let rx_ack = self
            .rx_ack
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or(StationError::NotRunning)?;

        let handles =
            driver::spawn(Arc::clone(&self.shared), radio, rx_data, rx_ack)?;
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.extend(handles);
        }
        Ok(())
    }

    /// Stop the driver tasks and the radio.
    pub fn shutdown(&self) {
        self.started.store(false, Ordering::SeqCst);
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        if let Ok(slot) = self.radio.read() {
            if let Some(radio) = slot.as_ref() {
                radio.stop_receive();
            }
        }
    }

    /// Send a request with the default deadline.
    pub async fn send_request(
        &self,
        method: &str,
        path: &str,
        headers: BTreeMap<String, String>,
        body: Option<Vec<u8>>,
        target: Callsign,
    ) -> Result<HttpResponse, StationError> {
        self.send_request_with_deadline(
            method,
            path,
            headers,
            body,
            target,
            DEFAULT_REQUEST_TIMEOUT,
        )
        .await
    }

    /// Send a request, waiting at most `deadline` for the response.
    pub async fn send_request_with_deadline(
        &self,
        method: &str,
        path: &str,
        headers: BTreeMap<String, String>,
        body: Option<Vec<u8>>,
        target: Callsign,
        deadline: Duration,
    ) -> Result<HttpResponse, StationError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(StationError::NotRunning);
        }

        let mut request = HttpRequest {
            method: method.to_string(),
            path: path.to_string(),
            headers,
            body,
            auth: None,
        };

        let signer = self.shared.signer.read().ok().and_then(|slot| slot.clone());
        if let Some(signer) = signer {
            request.auth = Some(driver::sign_request(&self.shared, &signer, &request)?);
        }

        let (responder, receiver) = oneshot::channel();
        let id = self.shared.env.random_packet_id();

        {
            let mut pending = self
                .shared
                .pending_requests
                .lock()
                .map_err(|_| StationError::Protocol("state poisoned".to_string()))?;
            pending.insert(
                id,
                PendingRequest { target, path: path.to_string(), responder },
            );
        }

        let result = driver::send_message(
            &self.shared,
            target,
            id,
            skywave_proto::Payload::Request(request),
        )
        .await;
        if let Err(error) = result {
            if let Ok(mut pending) = self.shared.pending_requests.lock() {
                pending.remove(&id);
            }
            return Err(error);
        }
        self.shared.bump(|c| c.requests_sent += 1);

        match tokio::time::timeout(deadline, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(StationError::NotRunning),
            Err(_) => {
                if let Ok(mut pending) = self.shared.pending_requests.lock() {
                    pending.remove(&id);
                }
                if let Ok(mut acks) = self.shared.pending_acks.lock() {
                    acks.abandon(id);
                }
                Err(StationError::Timeout)
            },
        }
    }

    /// Link and stack status.
    #[must_use]
    pub fn status(&self) -> StationStatus {
        let (modulation, snr_db, data_rate_bps) = self
            .shared
            .modem
            .lock()
            .map(|m| {
                let s = m.status();
                (s.modulation, s.snr_db, s.data_rate_bps)
            })
            .unwrap_or((Modulation::Bpsk, None, 0.0));
        let pending_routes =
            self.shared.router.lock().map(|r| r.pending_discoveries()).unwrap_or(0);
        let pending_acks = self.shared.pending_acks.lock().map(|a| a.pending()).unwrap_or(0);
        StationStatus { modulation, snr_db, data_rate_bps, pending_routes, pending_acks }
    }

    /// Event counters.
    #[must_use]
    pub fn counters(&self) -> StationCounters {
        self.shared
            .counters
            .lock()
            .map(|c| {
                let mut snapshot = *c;
                snapshot.rx_overflow = self.shared.rx_overflow.load(Ordering::Relaxed);
                snapshot
            })
            .unwrap_or_default()
    }

    /// Rendered state of a page previously fetched from `peer`, as the
    /// delta applier currently sees it.
    #[must_use]
    pub fn page_snapshot(&self, peer: Callsign, path: &str) -> Option<String> {
        self.shared
            .page_state
            .lock()
            .ok()
            .and_then(|pages| pages.get(&(peer, path.to_string())).map(AppliedDom::render))
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        self.shutdown();
    }
}
