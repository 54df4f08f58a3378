//! Adaptive audio modem for narrow radio channels.
//!
//! Converts byte frames to and from real-valued baseband samples: BPSK,
//! QPSK, 8-PSK, or 16-QAM on a single audio tone, Reed-Solomon FEC with a
//! convolutional interleaver against burst errors, and an SNR-driven
//! hysteretic modulation selector. The occupied bandwidth at the default
//! 2000 baud with 0.35 rolloff is 2.7 kHz.
//!
//! The modem is loss-reporting, not loss-hiding: a frame that cannot be
//! synchronized or corrected is dropped with an error and a counter bump.
//! Retransmission belongs to the packet layer above.

pub mod adaptive;
pub mod constellation;
mod error;
mod gf256;
pub mod interleave;
mod modem;
pub mod rs;
pub mod waveform;

pub use adaptive::AdaptiveSelector;
pub use constellation::Modulation;
pub use error::{ModemError, ReceiveError};
pub use interleave::InterleaverParams;
pub use modem::{Modem, ModemConfig, ModemCounters, ModemStatus};
pub use rs::RsParams;
pub use waveform::WaveformConfig;
