//! ECDSA request signing and verification.
//!
//! Requests are signed with ECDSA over P-256 (SHA-256) and bound to a
//! callsign. The signed byte string is canonical JSON of the request
//! fields with the timestamp and a 16-byte nonce folded in; canonical
//! means fixed field order and hex-encoded body bytes, so signer and
//! verifier derive identical bytes with no shared state.
//!
//! Acceptance requires all four, checked in this order: the callsign is
//! bound to the asserted key in the trust store, the signature verifies,
//! the timestamp sits inside the window, and the nonce is fresh. The
//! nonce is recorded only on full acceptance so a rejected request
//! cannot poison the replay cache.

use std::collections::{BTreeMap, HashSet, VecDeque};

use p256::ecdsa::{
    Signature, SigningKey, VerifyingKey,
    signature::{Signer, Verifier},
};
use p256::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use serde::Serialize;

use crate::error::SignatureError;

/// Future-direction timestamp tolerance: five minutes.
pub const TIMESTAMP_TOLERANCE_MS: i64 = 5 * 60 * 1000;

/// Extra allowance for a signer whose clock runs behind ours.
pub const CLOCK_SKEW_ALLOWANCE_MS: i64 = 60 * 1000;

/// Nonce bytes per request.
pub const NONCE_LEN: usize = 16;

/// Host-provided trust store binding callsigns to public keys.
///
/// The store itself (persistence, operator management) is outside the
/// core; verification only needs the lookup.
pub trait TrustedKeys {
    /// SPKI PEM for a callsign, if the operator trusts one.
    fn lookup(&self, callsign: &str) -> Option<String>;
}

impl TrustedKeys for BTreeMap<String, String> {
    fn lookup(&self, callsign: &str) -> Option<String> {
        self.get(callsign).cloned()
    }
}

/// The fields covered by a request signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest<'a> {
    /// Asserted signer callsign.
    pub callsign: &'a str,
    /// Request method.
    pub method: &'a str,
    /// Request path.
    pub path: &'a str,
    /// Request headers.
    pub headers: &'a BTreeMap<String, String>,
    /// Request body, if any.
    pub body: Option<&'a [u8]>,
    /// Signing time, ms since the Unix epoch.
    pub timestamp_ms: i64,
    /// Fresh random nonce.
    pub nonce: [u8; NONCE_LEN],
}

/// Canonical serialization order. Field order here IS the wire contract;
/// serde_json emits struct fields in declaration order.
#[derive(Serialize)]
struct CanonicalForm<'a> {
    callsign: &'a str,
    method: &'a str,
    path: &'a str,
    headers: &'a BTreeMap<String, String>,
    body_hex: Option<String>,
    timestamp_ms: i64,
    nonce_hex: String,
}

/// The exact byte string a request signature covers.
#[must_use]
pub fn canonical_bytes(request: &SignedRequest<'_>) -> Vec<u8> {
    let form = CanonicalForm {
        callsign: request.callsign,
        method: request.method,
        path: request.path,
        headers: request.headers,
        body_hex: request.body.map(hex::encode),
        timestamp_ms: request.timestamp_ms,
        nonce_hex: hex::encode(request.nonce),
    };
    // Serialization of a struct with string/int fields cannot fail.
    serde_json::to_vec(&form).unwrap_or_default()
}

/// Signing half: owns the private key and the asserted identity.
pub struct RequestSigner {
    key: SigningKey,
    callsign: String,
    public_key_pem: String,
}

impl RequestSigner {
    /// Wrap an existing key.
    pub fn new(key: SigningKey, callsign: impl Into<String>) -> Result<Self, SignatureError> {
        let public_key_pem = VerifyingKey::from(&key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| SignatureError::MalformedKey(e.to_string()))?;
        Ok(Self { key, callsign: callsign.into(), public_key_pem })
    }

    /// Generate a fresh P-256 key pair.
    #[must_use]
    pub fn generate(
        rng: &mut impl p256::elliptic_curve::rand_core::CryptoRngCore,
        callsign: impl Into<String>,
    ) -> Self {
        let key = SigningKey::random(rng);
        let public_key_pem = VerifyingKey::from(&key)
            .to_public_key_pem(LineEnding::LF)
            .unwrap_or_default();
        Self { key, callsign: callsign.into(), public_key_pem }
    }

    /// The signer's callsign.
    #[must_use]
    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    /// The signer's public key, SPKI PEM.
    #[must_use]
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Sign a request. Returns the DER-encoded signature.
    #[must_use]
    pub fn sign(&self, request: &SignedRequest<'_>) -> Vec<u8> {
        let bytes = canonical_bytes(request);
        let signature: Signature = self.key.sign(&bytes);
        signature.to_der().as_bytes().to_vec()
    }
}

/// Bounded replay cache over request nonces.
///
/// The retention window must be at least the timestamp tolerance: any
/// request old enough to have left the cache is already rejected by the
/// timestamp check.
#[derive(Debug)]
pub struct NonceCache {
    seen: HashSet<[u8; NONCE_LEN]>,
    order: VecDeque<([u8; NONCE_LEN], i64)>,
    retention_ms: i64,
    capacity: usize,
}

impl Default for NonceCache {
    fn default() -> Self {
        Self::new(TIMESTAMP_TOLERANCE_MS + CLOCK_SKEW_ALLOWANCE_MS, 4096)
    }
}

impl NonceCache {
    /// Create a cache with the given retention window and capacity.
    #[must_use]
    pub fn new(retention_ms: i64, capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            retention_ms,
            capacity: capacity.max(1),
        }
    }

    /// Number of nonces currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// True when no nonces are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Record a nonce; `Err` if it was already inside the window.
    pub fn check_and_record(
        &mut self,
        nonce: [u8; NONCE_LEN],
        now_ms: i64,
    ) -> Result<(), SignatureError> {
        self.prune(now_ms);
        if self.seen.contains(&nonce) {
            return Err(SignatureError::NonceReplayed);
        }
        if self.order.len() >= self.capacity {
            if let Some((oldest, _)) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(nonce);
        self.order.push_back((nonce, now_ms));
        Ok(())
    }

    /// Drop nonces past the retention window.
    pub fn prune(&mut self, now_ms: i64) {
        while let Some(&(nonce, seen_at)) = self.order.front() {
            if now_ms.saturating_sub(seen_at) > self.retention_ms {
                self.order.pop_front();
                self.seen.remove(&nonce);
            } else {
                break;
            }
        }
    }
}

/// Verifying half: trust binding, signature, window, replay.
#[derive(Debug, Default)]
pub struct RequestVerifier {
    nonces: NonceCache,
}

impl RequestVerifier {
    /// Fresh verifier with the default replay window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify a signed request against the trust store at time `now_ms`.
    pub fn verify(
        &mut self,
        trust: &impl TrustedKeys,
        request: &SignedRequest<'_>,
        signature_der: &[u8],
        asserted_pem: &str,
        now_ms: i64,
    ) -> Result<(), SignatureError> {
        // 1. The callsign must be bound to exactly the asserted key.
        let trusted_pem = trust.lookup(request.callsign).ok_or_else(|| {
            SignatureError::UntrustedKey { callsign: request.callsign.to_string() }
        })?;
        if trusted_pem.trim() != asserted_pem.trim() {
            return Err(SignatureError::UntrustedKey {
                callsign: request.callsign.to_string(),
            });
        }

        // 2. The signature must verify under that key.
        let key = VerifyingKey::from_public_key_pem(&trusted_pem)
            .map_err(|e| SignatureError::MalformedKey(e.to_string()))?;
        let signature =
            Signature::from_der(signature_der).map_err(|_| SignatureError::SignatureInvalid)?;
        let bytes = canonical_bytes(request);
        key.verify(&bytes, &signature).map_err(|_| SignatureError::SignatureInvalid)?;

        // 3. Timestamp window: +5 min future, -5 min past with an extra
        // minute for slow clocks.
        let skew_ms = request.timestamp_ms.saturating_sub(now_ms);
        if skew_ms > TIMESTAMP_TOLERANCE_MS
            || -skew_ms > TIMESTAMP_TOLERANCE_MS + CLOCK_SKEW_ALLOWANCE_MS
        {
            return Err(SignatureError::TimestampOutOfWindow { skew_ms });
        }

        // 4. Nonce freshness, recorded only now that everything passed.
        self.nonces.check_and_record(request.nonce, now_ms)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn signer(callsign: &str, seed: u64) -> RequestSigner {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        RequestSigner::generate(&mut rng, callsign)
    }

    fn trust_for(signers: &[&RequestSigner]) -> BTreeMap<String, String> {
        signers
            .iter()
            .map(|s| (s.callsign().to_string(), s.public_key_pem().to_string()))
            .collect()
    }

    fn request<'a>(
        signer: &'a RequestSigner,
        headers: &'a BTreeMap<String, String>,
        timestamp_ms: i64,
        nonce: [u8; NONCE_LEN],
    ) -> SignedRequest<'a> {
        SignedRequest {
            callsign: signer.callsign(),
            method: "GET",
            path: "/index",
            headers,
            body: None,
            timestamp_ms,
            nonce,
        }
    }

    const NOW_MS: i64 = 1_700_000_000_000;

    #[test]
    fn accepts_valid_request() {
        let signer = signer("KA1ABC", 1);
        let trust = trust_for(&[&signer]);
        let headers = BTreeMap::new();
        let req = request(&signer, &headers, NOW_MS, [1; 16]);
        let sig = signer.sign(&req);

        let mut verifier = RequestVerifier::new();
        verifier
            .verify(&trust, &req, &sig, signer.public_key_pem(), NOW_MS)
            .unwrap();
    }

    #[test]
    fn replay_is_rejected_with_nonce_replayed() {
        let signer = signer("KA1ABC", 2);
        let trust = trust_for(&[&signer]);
        let headers = BTreeMap::new();
        let req = request(&signer, &headers, NOW_MS, [7; 16]);
        let sig = signer.sign(&req);

        let mut verifier = RequestVerifier::new();
        verifier.verify(&trust, &req, &sig, signer.public_key_pem(), NOW_MS).unwrap();

        // Byte-for-byte identical resend inside the window.
        let result =
            verifier.verify(&trust, &req, &sig, signer.public_key_pem(), NOW_MS + 1000);
        assert_eq!(result, Err(SignatureError::NonceReplayed));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let signer = signer("KA1ABC", 3);
        let trust = trust_for(&[&signer]);
        let headers = BTreeMap::new();

        // Ten minutes in the past.
        let req = request(&signer, &headers, NOW_MS - 10 * 60 * 1000, [2; 16]);
        let sig = signer.sign(&req);
        let mut verifier = RequestVerifier::new();
        let result = verifier.verify(&trust, &req, &sig, signer.public_key_pem(), NOW_MS);
        assert!(matches!(result, Err(SignatureError::TimestampOutOfWindow { .. })));

        // Four minutes in the past: inside the window.
        let req = request(&signer, &headers, NOW_MS - 4 * 60 * 1000, [3; 16]);
        let sig = signer.sign(&req);
        verifier.verify(&trust, &req, &sig, signer.public_key_pem(), NOW_MS).unwrap();

        // Five minutes fifty seconds in the past: saved by the skew
        // allowance.
        let req = request(&signer, &headers, NOW_MS - 350 * 1000, [4; 16]);
        let sig = signer.sign(&req);
        verifier.verify(&trust, &req, &sig, signer.public_key_pem(), NOW_MS).unwrap();

        // Six minutes in the future: rejected, no skew allowance there.
        let req = request(&signer, &headers, NOW_MS + 6 * 60 * 1000, [5; 16]);
        let sig = signer.sign(&req);
        let result = verifier.verify(&trust, &req, &sig, signer.public_key_pem(), NOW_MS);
        assert!(matches!(result, Err(SignatureError::TimestampOutOfWindow { .. })));
    }

    #[test]
    fn tampered_request_fails_signature() {
        let signer = signer("KA1ABC", 4);
        let trust = trust_for(&[&signer]);
        let headers = BTreeMap::new();
        let req = request(&signer, &headers, NOW_MS, [6; 16]);
        let sig = signer.sign(&req);

        let tampered = SignedRequest { path: "/admin", ..req };
        let mut verifier = RequestVerifier::new();
        let result = verifier.verify(&trust, &tampered, &sig, signer.public_key_pem(), NOW_MS);
        assert_eq!(result, Err(SignatureError::SignatureInvalid));
    }

    #[test]
    fn unknown_callsign_is_untrusted() {
        let signer = signer("KA1ABC", 5);
        let trust: BTreeMap<String, String> = BTreeMap::new();
        let headers = BTreeMap::new();
        let req = request(&signer, &headers, NOW_MS, [8; 16]);
        let sig = signer.sign(&req);

        let mut verifier = RequestVerifier::new();
        let result = verifier.verify(&trust, &req, &sig, signer.public_key_pem(), NOW_MS);
        assert!(matches!(result, Err(SignatureError::UntrustedKey { .. })));
    }

    #[test]
    fn key_substitution_is_untrusted() {
        // The callsign is registered, but the envelope asserts a
        // different key that also signs correctly.
        let real = signer("KA1ABC", 6);
        let imposter = signer("KA1ABC", 7);
        let trust = trust_for(&[&real]);
        let headers = BTreeMap::new();
        let req = request(&imposter, &headers, NOW_MS, [9; 16]);
        let sig = imposter.sign(&req);

        let mut verifier = RequestVerifier::new();
        let result = verifier.verify(&trust, &req, &sig, imposter.public_key_pem(), NOW_MS);
        assert!(matches!(result, Err(SignatureError::UntrustedKey { .. })));
    }

    #[test]
    fn rejected_request_does_not_burn_its_nonce() {
        let signer = signer("KA1ABC", 8);
        let trust = trust_for(&[&signer]);
        let headers = BTreeMap::new();

        // First attempt arrives too old and is rejected.
        let stale = request(&signer, &headers, NOW_MS - 20 * 60 * 1000, [10; 16]);
        let sig = signer.sign(&stale);
        let mut verifier = RequestVerifier::new();
        assert!(verifier.verify(&trust, &stale, &sig, signer.public_key_pem(), NOW_MS).is_err());

        // A fresh request reusing that nonce value still passes: the
        // rejection did not record it.
        let fresh = request(&signer, &headers, NOW_MS, [10; 16]);
        let sig = signer.sign(&fresh);
        verifier.verify(&trust, &fresh, &sig, signer.public_key_pem(), NOW_MS).unwrap();
    }

    #[test]
    fn nonce_cache_prunes_by_window() {
        let mut cache = NonceCache::new(1000, 64);
        cache.check_and_record([1; 16], 0).unwrap();
        assert_eq!(cache.check_and_record([1; 16], 500), Err(SignatureError::NonceReplayed));

        // Past the retention window the nonce ages out; the timestamp
        // check is what rejects such a request by then.
        cache.check_and_record([1; 16], 2000).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn canonical_bytes_are_stable() {
        let headers: BTreeMap<String, String> =
            [("accept".to_string(), "text/html".to_string())].into_iter().collect();
        let req = SignedRequest {
            callsign: "KA1ABC",
            method: "GET",
            path: "/index",
            headers: &headers,
            body: Some(b"hi"),
            timestamp_ms: 123,
            nonce: [0xAB; 16],
        };
        let bytes = canonical_bytes(&req);
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            r#"{"callsign":"KA1ABC","method":"GET","path":"/index","headers":{"accept":"text/html"},"body_hex":"6869","timestamp_ms":123,"nonce_hex":"abababababababababababababababab"}"#
        );
    }
}
