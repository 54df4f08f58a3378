//! Production environment: tokio clock, OS randomness.
//!
//! Using the tokio clock (not `std::time::Instant`) means every deadline
//! in the stack honours `tokio::time::pause` in tests.

use std::time::Duration;

use rand::RngCore;
use skywave_core::Environment;

/// Environment backed by the tokio clock and the OS RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct StationEnv;

impl Environment for StationEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        rand::rngs::OsRng.fill_bytes(buffer);
    }
}
