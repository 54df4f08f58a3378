//! The skywave station: HTTP-style request/response over narrow,
//! noisy amateur-radio channels.
//!
//! Peers are addressed by callsign. Below the API sit four subsystems:
//! the packet codec (`skywave-proto`), reliability and configuration
//! (`skywave-core`), on-demand mesh routing (`skywave-mesh`), and the
//! adaptive modem (`skywave-modem`); the content pipeline
//! (`skywave-content`) shrinks payloads and signs requests. This crate
//! wires them onto a radio interface and a persistence interface, both
//! host-provided.
//!
//! ```no_run
//! use std::{collections::BTreeMap, sync::Arc};
//! use skywave_core::StackConfig;
//! use skywave_modem::ModemConfig;
//! use skywave_proto::Callsign;
//! use skywave_station::{HandlerReply, LoopbackRadio, Station};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let (radio_a, radio_b) = LoopbackRadio::pair();
//!
//! let alpha = Station::new(
//!     StackConfig::new(Callsign::parse("KA1ABC")?),
//!     ModemConfig::default(),
//! )?;
//! alpha.set_radio(Arc::new(radio_a));
//! alpha.start()?;
//!
//! let bravo = Station::new(
//!     StackConfig::new(Callsign::parse("W2DEF")?),
//!     ModemConfig::default(),
//! )?;
//! bravo.set_radio(Arc::new(radio_b));
//! bravo.on_request(|request| async move {
//!     HandlerReply::Response {
//!         status: 200,
//!         headers: BTreeMap::new(),
//!         body: format!("73 de {}", request.path).into_bytes(),
//!     }
//! });
//! bravo.start()?;
//!
//! let response = alpha
//!     .send_request("GET", "/index", BTreeMap::new(), None, bravo.callsign())
//!     .await?;
//! assert_eq!(response.status, 200);
//! # Ok(())
//! # }
//! ```

mod driver;
mod env;
mod error;
mod radio;
mod station;
pub mod storage;

pub use env::StationEnv;
pub use error::{StationError, StorageError};
pub use radio::{ChannelFn, LoopbackRadio, RadioInterface, RadioStatus, RxCallback};
pub use station::{
    DEFAULT_REQUEST_TIMEOUT, HandlerReply, IncomingRequest, RequestHandler, Station,
    StationCounters, StationStatus,
};
