//! Reed-Solomon codec over GF(2^8).
//!
//! Systematic (n, k) code: each block carries k data bytes followed by
//! n - k parity bytes and corrects up to (n - k) / 2 byte errors. A byte
//! stream is coded as full blocks plus one shortened block for the
//! remainder, so the coded length is a pure function of the input length
//! and the receiver needs no extra framing.
//!
//! Decoding is the classic chain: syndromes, Berlekamp-Massey error
//! locator, Chien search, Forney magnitudes.

use crate::gf256;

/// Reed-Solomon code dimensions.
///
/// The default (32, 24) gives 25% redundancy and corrects 4 byte errors
/// per block; small blocks keep shortening waste low at fragment sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RsParams {
    /// Block length (data + parity), at most 255.
    pub n: usize,
    /// Data bytes per block.
    pub k: usize,
}

impl Default for RsParams {
    fn default() -> Self {
        Self { n: 32, k: 24 }
    }
}

impl RsParams {
    /// Parity bytes per block.
    #[must_use]
    pub fn parity(&self) -> usize {
        self.n - self.k
    }

    /// Correctable byte errors per block.
    #[must_use]
    pub fn correctable(&self) -> usize {
        self.parity() / 2
    }

    /// Code rate (k / n).
    #[must_use]
    pub fn rate(&self) -> f32 {
        self.k as f32 / self.n as f32
    }

    /// Validate the dimensions.
    pub fn validate(&self) -> Result<(), String> {
        if self.n > 255 {
            return Err(format!("block length {} exceeds 255", self.n));
        }
        if self.k == 0 || self.k >= self.n {
            return Err(format!("data length {} outside 1..{}", self.k, self.n));
        }
        if self.parity() % 2 != 0 {
            return Err(format!("parity count {} must be even", self.parity()));
        }
        Ok(())
    }

    /// Coded length for a given input length.
    #[must_use]
    pub fn coded_len(&self, data_len: usize) -> usize {
        let full = data_len / self.k;
        let rem = data_len % self.k;
        full * self.n + if rem > 0 { rem + self.parity() } else { 0 }
    }

    /// Input length recovered from a coded length, if the coded length is
    /// consistent with this code.
    #[must_use]
    pub fn data_len(&self, coded_len: usize) -> Option<usize> {
        let full = coded_len / self.n;
        let rem = coded_len % self.n;
        if rem == 0 {
            Some(full * self.k)
        } else if rem > self.parity() {
            Some(full * self.k + rem - self.parity())
        } else {
            None
        }
    }
}

/// Generator polynomial with roots `alpha^0 .. alpha^(nsym-1)`,
/// highest-degree coefficient first.
fn generator_poly(nsym: usize) -> Vec<u8> {
    let mut g = vec![1u8];
    for i in 0..nsym {
        g = gf256::poly_mul(&g, &[1, gf256::pow(i as i32)]);
    }
    g
}

/// Encode one block: returns data followed by parity.
fn encode_block(data: &[u8], gen_poly: &[u8]) -> Vec<u8> {
    let nsym = gen_poly.len() - 1;
    let mut buf = vec![0u8; data.len() + nsym];
    buf[..data.len()].copy_from_slice(data);

    for i in 0..data.len() {
        let coef = buf[i];
        if coef != 0 {
            for (j, &g) in gen_poly.iter().enumerate().skip(1) {
                buf[i + j] ^= gf256::mul(g, coef);
            }
        }
    }

    let mut out = data.to_vec();
    out.extend_from_slice(&buf[data.len()..]);
    out
}

fn syndromes(block: &[u8], nsym: usize) -> Vec<u8> {
    (0..nsym).map(|i| gf256::poly_eval(block, gf256::pow(i as i32))).collect()
}

/// Berlekamp-Massey: error locator polynomial, highest-degree first.
fn error_locator(synd: &[u8], nsym: usize) -> Option<Vec<u8>> {
    let mut err_loc = vec![1u8];
    let mut old_loc = vec![1u8];

    for i in 0..nsym {
        let mut delta = synd[i];
        for j in 1..err_loc.len() {
            delta ^= gf256::mul(err_loc[err_loc.len() - 1 - j], synd[i - j]);
        }

        old_loc.push(0);

        if delta != 0 {
            if old_loc.len() > err_loc.len() {
                let new_loc = gf256::poly_scale(&old_loc, delta);
                old_loc = gf256::poly_scale(&err_loc, gf256::inv(delta));
                err_loc = new_loc;
            }
            err_loc = gf256::poly_add(&err_loc, &gf256::poly_scale(&old_loc, delta));
        }
    }

    while err_loc.first() == Some(&0) {
        err_loc.remove(0);
    }
    if err_loc.is_empty() {
        return None;
    }
    let errs = err_loc.len() - 1;
    if errs * 2 > nsym { None } else { Some(err_loc) }
}

/// Chien search: positions of errors within the block.
fn error_positions(err_loc: &[u8], block_len: usize) -> Option<Vec<usize>> {
    let errs = err_loc.len() - 1;
    let mut reversed = err_loc.to_vec();
    reversed.reverse();

    let mut positions = Vec::new();
    for i in 0..block_len {
        if gf256::poly_eval(&reversed, gf256::pow(i as i32)) == 0 {
            positions.push(block_len - 1 - i);
        }
    }

    if positions.len() == errs { Some(positions) } else { None }
}

/// Forney: compute magnitudes and repair the block in place.
fn correct_errata(block: &mut [u8], synd: &[u8], positions: &[usize]) -> Option<()> {
    let len = block.len();
    // Coefficient degrees of the error positions.
    let coef_pos: Vec<usize> = positions.iter().map(|&p| len - 1 - p).collect();

    // Errata locator from the known positions.
    let mut errata_loc = vec![1u8];
    for &p in &coef_pos {
        errata_loc = gf256::poly_mul(&errata_loc, &gf256::poly_add(&[1], &[gf256::pow(p as i32), 0]));
    }

    // Error evaluator: x * (synd_reversed * errata_loc) mod x^(errs+1),
    // kept highest-degree first. The extra factor of x matches the
    // syndrome indexing (S_j at degree j + 1).
    let mut synd_rev = synd.to_vec();
    synd_rev.reverse();
    let mut product = gf256::poly_mul(&synd_rev, &errata_loc);
    product.push(0);
    let keep = errata_loc.len().min(product.len());
    let err_eval: Vec<u8> = product[product.len() - keep..].to_vec();

    let x: Vec<u8> = coef_pos.iter().map(|&p| gf256::pow(p as i32)).collect();

    for (i, &xi) in x.iter().enumerate() {
        let xi_inv = gf256::inv(xi);

        // Formal derivative of the errata locator evaluated at 1/Xi.
        let mut denom = 1u8;
        for (j, &xj) in x.iter().enumerate() {
            if j != i {
                denom = gf256::mul(denom, 1 ^ gf256::mul(xi_inv, xj));
            }
        }
        if denom == 0 {
            return None;
        }

        let y = gf256::mul(xi, gf256::poly_eval(&err_eval, xi_inv));
        let magnitude = gf256::div(y, denom);
        block[positions[i]] ^= magnitude;
    }
    Some(())
}

/// Decode one block in place. Returns the number of corrected bytes, or
/// `None` when the errors exceed the code's correction power.
fn decode_block(block: &mut [u8], nsym: usize) -> Option<usize> {
    let synd = syndromes(block, nsym);
    if synd.iter().all(|&s| s == 0) {
        return Some(0);
    }

    let err_loc = error_locator(&synd, nsym)?;
    let positions = error_positions(&err_loc, block.len())?;
    correct_errata(block, &synd, &positions)?;

    // A decode that still fails its syndromes was a miscorrection.
    if syndromes(block, nsym).iter().any(|&s| s != 0) {
        return None;
    }
    Some(positions.len())
}

/// Encode a byte stream into RS blocks.
#[must_use]
pub fn encode_stream(data: &[u8], params: RsParams) -> Vec<u8> {
    let gen_poly = generator_poly(params.parity());
    let mut out = Vec::with_capacity(params.coded_len(data.len()));
    for chunk in data.chunks(params.k) {
        out.extend_from_slice(&encode_block(chunk, &gen_poly));
    }
    out
}

/// Decode a coded stream.
///
/// Returns the recovered data and the number of corrected bytes, or
/// `None` when any block is unrecoverable or the coded length is
/// inconsistent with the code dimensions.
#[must_use]
pub fn decode_stream(coded: &[u8], params: RsParams) -> Option<(Vec<u8>, usize)> {
    let data_len = params.data_len(coded.len())?;
    let mut out = Vec::with_capacity(data_len);
    let mut corrected = 0usize;

    for chunk in coded.chunks(params.n) {
        if chunk.len() <= params.parity() {
            return None;
        }
        let mut block = chunk.to_vec();
        corrected += decode_block(&mut block, params.parity())?;
        out.extend_from_slice(&block[..block.len() - params.parity()]);
    }

    Some((out, corrected))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn default_params_give_quarter_redundancy() {
        let params = RsParams::default();
        params.validate().unwrap();
        assert_eq!(params.parity(), 8);
        assert_eq!(params.correctable(), 4);
        assert!((params.rate() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn coded_len_round_trips() {
        let params = RsParams::default();
        for len in 0..200 {
            assert_eq!(params.data_len(params.coded_len(len)), Some(len));
        }
    }

    #[test]
    fn clean_stream_round_trip() {
        let params = RsParams::default();
        let data: Vec<u8> = (0..=255u8).collect();
        let coded = encode_stream(&data, params);
        let (decoded, corrected) = decode_stream(&coded, params).unwrap();
        assert_eq!(decoded, data);
        assert_eq!(corrected, 0);
    }

    #[test]
    fn corrects_up_to_t_errors_per_block() {
        let params = RsParams::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let data: Vec<u8> = (0..params.k as u8).collect();
        let coded = encode_stream(&data, params);
        assert_eq!(coded.len(), params.n);

        for errors in 1..=params.correctable() {
            let mut corrupted = coded.clone();
            let mut touched = std::collections::HashSet::new();
            while touched.len() < errors {
                let pos = rng.gen_range(0..corrupted.len());
                if touched.insert(pos) {
                    corrupted[pos] ^= rng.gen_range(1..=255u8);
                }
            }
            let (decoded, corrected) = decode_stream(&corrupted, params)
                .unwrap_or_else(|| panic!("{errors} errors should correct"));
            assert_eq!(decoded, data);
            assert_eq!(corrected, errors);
        }
    }

    #[test]
    fn rejects_excess_errors() {
        let params = RsParams::default();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let data: Vec<u8> = (0..params.k as u8).rev().collect();
        let coded = encode_stream(&data, params);

        let mut failures = 0;
        for trial in 0..20 {
            let mut corrupted = coded.clone();
            let mut touched = std::collections::HashSet::new();
            // Twice the correction power: must not silently miscorrect to
            // the original.
            while touched.len() < params.correctable() * 2 {
                let pos = rng.gen_range(0..corrupted.len());
                if touched.insert(pos) {
                    corrupted[pos] ^= rng.gen_range(1..=255u8);
                }
            }
            match decode_stream(&corrupted, params) {
                None => failures += 1,
                Some((decoded, _)) => {
                    assert_ne!(decoded, data, "trial {trial}: silent wrong decode");
                },
            }
        }
        assert!(failures > 0);
    }

    #[test]
    fn shortened_tail_block() {
        let params = RsParams::default();
        let data = vec![0x5Au8; params.k + 5];
        let coded = encode_stream(&data, params);
        assert_eq!(coded.len(), params.n + 5 + params.parity());

        let mut corrupted = coded;
        // Corrupt inside the shortened block.
        let tail = params.n + 2;
        corrupted[tail] ^= 0xFF;
        let (decoded, corrected) = decode_stream(&corrupted, params).unwrap();
        assert_eq!(decoded, data);
        assert_eq!(corrected, 1);
    }

    proptest! {
        #[test]
        fn stream_round_trip(data in prop::collection::vec(any::<u8>(), 0..600)) {
            let params = RsParams::default();
            let coded = encode_stream(&data, params);
            prop_assert_eq!(coded.len(), params.coded_len(data.len()));
            let (decoded, corrected) = decode_stream(&coded, params).expect("clean decode");
            prop_assert_eq!(decoded, data);
            prop_assert_eq!(corrected, 0);
        }

        #[test]
        fn burst_within_correction_power(
            data in prop::collection::vec(any::<u8>(), 64..256),
            start in 0usize..64,
        ) {
            let params = RsParams::default();
            let coded = encode_stream(&data, params);
            let mut corrupted = coded.clone();

            // A burst of t bytes confined to one block.
            let block = (start % (corrupted.len() / params.n)) * params.n;
            for i in 0..params.correctable() {
                corrupted[block + i] ^= 0xA5;
            }

            let (decoded, corrected) = decode_stream(&corrupted, params).expect("should correct");
            prop_assert_eq!(decoded, data);
            prop_assert_eq!(corrected, params.correctable());
        }
    }
}
