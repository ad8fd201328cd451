//! The MD4 message digest (RFC 1320).
//!
//! NTLM derives its password hash from MD4, so the algorithm has to be reproduced exactly even
//! though it has long been broken. Do not use it for anything else.


const INITIAL_STATE: [u32; 4] = [0x6745_2301, 0xEFCD_AB89, 0x98BA_DCFE, 0x1032_5476];
const ROUND2_CONSTANT: u32 = 0x5A82_7999;
const ROUND3_CONSTANT: u32 = 0x6ED9_EBA1;


/// An incremental MD4 hasher.
#[derive(Clone, Debug)]
pub struct Md4 {
    state: [u32; 4],
    count: u64,
    buffer: [u8; 64],
}
impl Md4 {
    /// Creates a hasher that has not consumed any input yet.
    pub fn new() -> Self {
        Self {
            state: INITIAL_STATE,
            count: 0,
            buffer: [0; 64],
        }
    }

    /// Computes the MD4 digest of `data` in one go.
    pub fn digest(data: &[u8]) -> [u8; 16] {
        let mut md4 = Self::new();
        md4.update(data);
        md4.finalize()
    }

    /// Feeds more input into the hasher.
    pub fn update(&mut self, mut input: &[u8]) {
        let mut buffer_pos = (self.count % 64) as usize;
        self.count = self.count.wrapping_add(input.len() as u64);

        while !input.is_empty() {
            let transfer = (64 - buffer_pos).min(input.len());
            self.buffer[buffer_pos..buffer_pos + transfer].copy_from_slice(&input[..transfer]);
            buffer_pos += transfer;
            input = &input[transfer..];

            if buffer_pos == 64 {
                compress(&mut self.state, &self.buffer);
                buffer_pos = 0;
            }
        }
    }

    /// Pads the input, processes the remaining block(s) and returns the digest.
    pub fn finalize(mut self) -> [u8; 16] {
        let bit_count = self.count.wrapping_mul(8);

        // 0x80, then zeroes up to 56 mod 64, then the bit count
        let buffer_pos = (self.count % 64) as usize;
        let pad_len = if buffer_pos < 56 { 56 - buffer_pos } else { 120 - buffer_pos };
        let mut padding = [0u8; 64];
        padding[0] = 0x80;
        self.update(&padding[..pad_len]);
        self.update(&bit_count.to_le_bytes());

        let mut ret = [0u8; 16];
        for (chunk, word) in ret.chunks_exact_mut(4).zip(self.state.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        ret
    }
}
impl Default for Md4 {
    fn default() -> Self {
        Self::new()
    }
}


fn f(x: u32, y: u32, z: u32) -> u32 {
    (x & y) | (!x & z)
}

fn g(x: u32, y: u32, z: u32) -> u32 {
    (x & y) | (x & z) | (y & z)
}

fn h(x: u32, y: u32, z: u32) -> u32 {
    x ^ y ^ z
}

fn round1(a: u32, b: u32, c: u32, d: u32, x: u32, s: u32) -> u32 {
    a.wrapping_add(f(b, c, d))
        .wrapping_add(x)
        .rotate_left(s)
}

fn round2(a: u32, b: u32, c: u32, d: u32, x: u32, s: u32) -> u32 {
    a.wrapping_add(g(b, c, d))
        .wrapping_add(x)
        .wrapping_add(ROUND2_CONSTANT)
        .rotate_left(s)
}

fn round3(a: u32, b: u32, c: u32, d: u32, x: u32, s: u32) -> u32 {
    a.wrapping_add(h(b, c, d))
        .wrapping_add(x)
        .wrapping_add(ROUND3_CONSTANT)
        .rotate_left(s)
}

/// Processes one 64-byte block.
fn compress(state: &mut [u32; 4], block: &[u8; 64]) {
    let mut x = [0u32; 16];
    for (word, chunk) in x.iter_mut().zip(block.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }

    let [mut a, mut b, mut c, mut d] = *state;

    for i in [0, 4, 8, 12] {
        a = round1(a, b, c, d, x[i], 3);
        d = round1(d, a, b, c, x[i + 1], 7);
        c = round1(c, d, a, b, x[i + 2], 11);
        b = round1(b, c, d, a, x[i + 3], 19);
    }

    for i in [0, 1, 2, 3] {
        a = round2(a, b, c, d, x[i], 3);
        d = round2(d, a, b, c, x[i + 4], 5);
        c = round2(c, d, a, b, x[i + 8], 9);
        b = round2(b, c, d, a, x[i + 12], 13);
    }

    for i in [0, 2, 1, 3] {
        a = round3(a, b, c, d, x[i], 3);
        d = round3(d, a, b, c, x[i + 8], 9);
        c = round3(c, d, a, b, x[i + 4], 11);
        b = round3(b, c, d, a, x[i + 12], 15);
    }

    state[0] = state[0].wrapping_add(a);
    state[1] = state[1].wrapping_add(b);
    state[2] = state[2].wrapping_add(c);
    state[3] = state[3].wrapping_add(d);
}
