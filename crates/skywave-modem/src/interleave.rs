//! Convolutional byte interleaver.
//!
//! A short interleaver sits between the Reed-Solomon coder and the
//! modulator so a burst of symbol errors lands across several code words
//! instead of overwhelming one. The permutation is the circular form of a
//! convolutional interleaver: byte `j` on branch `b = j mod B` is delayed
//! by `b * depth` slots within its branch, wrapping inside the frame so
//! the interleaved frame is exactly the (padded) input length.

/// Interleaver structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterleaverParams {
    /// Branch count; consecutive bytes cycle through branches.
    pub branches: usize,
    /// Delay increment per branch, in branch slots.
    pub depth: usize,
}

impl Default for InterleaverParams {
    fn default() -> Self {
        Self { branches: 4, depth: 3 }
    }
}

impl InterleaverParams {
    /// Validate the structure.
    pub fn validate(&self) -> Result<(), String> {
        if self.branches == 0 || self.branches > 255 {
            return Err(format!("branch count {} outside 1..=255", self.branches));
        }
        if self.depth == 0 {
            return Err("depth must be non-zero".to_string());
        }
        Ok(())
    }

    /// Zero bytes appended so the frame length is a branch multiple.
    #[must_use]
    pub fn padding_for(&self, len: usize) -> usize {
        (self.branches - len % self.branches) % self.branches
    }
}

/// Interleave a frame. Returns the interleaved bytes and the padding that
/// was appended (needed to undo the operation).
#[must_use]
pub fn interleave(data: &[u8], params: InterleaverParams) -> (Vec<u8>, usize) {
    let pad = params.padding_for(data.len());
    let mut padded = data.to_vec();
    padded.resize(data.len() + pad, 0);

    let n = padded.len();
    if n == 0 {
        return (padded, pad);
    }

    let b = params.branches;
    let step = b * params.depth;
    let mut out = vec![0u8; n];
    for (j, slot) in out.iter_mut().enumerate() {
        let branch = j % b;
        let src = (j + n - (step * branch) % n) % n;
        *slot = padded[src];
    }
    (out, pad)
}

/// Invert [`interleave`]. `pad` is the padding count it reported.
#[must_use]
pub fn deinterleave(data: &[u8], params: InterleaverParams, pad: usize) -> Vec<u8> {
    let n = data.len();
    if n == 0 {
        return Vec::new();
    }

    let b = params.branches;
    let step = b * params.depth;
    let mut out = vec![0u8; n];
    for (i, slot) in out.iter_mut().enumerate() {
        let branch = i % b;
        let src = (i + (step * branch) % n) % n;
        *slot = data[src];
    }
    out.truncate(n.saturating_sub(pad));
    out
}
