//! Environment abstraction for deterministic testing.
//!
//! Protocol state machines never read the system clock or an OS RNG
//! directly; they take an `Environment` (or plain instants) so the same
//! logic runs in production and under the simulation harness with a
//! virtual clock and a seeded generator.

use std::time::Duration;

/// Time and randomness source for a protocol stack instance.
///
/// Implementations guarantee:
///
/// - `now()` is monotonic within one execution context.
/// - `random_bytes()` draws from a cryptographically secure source in
///   production; simulation environments may substitute a seeded
///   generator for reproducibility.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Instant type: real (`std::time::Instant`, `tokio::time::Instant`)
    /// or virtual under simulation.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Sleep for the given duration. The only async entry point; driver
    /// code uses it, protocol logic never does.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Random `u64`, for broadcast ids and sequence seeds.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_le_bytes(bytes)
    }

    /// Random 8-byte packet id.
    fn random_packet_id(&self) -> skywave_proto::PacketId {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        skywave_proto::PacketId::from_bytes(bytes)
    }
}
