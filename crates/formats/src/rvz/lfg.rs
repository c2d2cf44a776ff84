//! Lagged Fibonacci generator for RVZ junk-data regeneration.
//!
//! GameCube/Wii discs fill unused space with pseudo-random "junk" derived
//! from this generator. RVZ strips those runs and stores only the 17 seed
//! words; decoding reseeds the generator and replays the run. Output is a
//! pure function of the seed and the starting disc offset, which is the
//! property reconstruction relies on.

const LFG_K: usize = 521;
const LFG_J: usize = 32;

/// Seed words carried per junk run in the packed stream.
pub const SEED_SIZE: usize = 17;

const BUFFER_BYTES: usize = LFG_K * 4;

pub struct LaggedFibonacci {
    buffer: [u32; LFG_K],
    position_bytes: usize,
}

impl LaggedFibonacci {
    pub fn from_seed(seed: &[u32; SEED_SIZE]) -> Self {
        let mut lfg = Self {
            buffer: [0u32; LFG_K],
            position_bytes: 0,
        };
        lfg.buffer[..SEED_SIZE].copy_from_slice(seed);
        lfg.initialize();
        lfg
    }

    fn initialize(&mut self) {
        for i in SEED_SIZE..LFG_K {
            self.buffer[i] =
                (self.buffer[i - 17] << 23) ^ (self.buffer[i - 16] >> 9) ^ self.buffer[i - 1];
        }
        // Bake the output bit shuffle into the state once instead of
        // applying it to every emitted word: bytes 3, 1, 0 pass through,
        // byte 2 comes from bits 25..18.
        for word in self.buffer.iter_mut() {
            *word = (*word & 0xFF00_FFFF) | ((*word >> 2) & 0x00FF_0000);
        }
        self.position_bytes = 0;
        for _ in 0..4 {
            self.forward();
        }
    }

    fn forward(&mut self) {
        for i in 0..LFG_J {
            self.buffer[i] ^= self.buffer[i + LFG_K - LFG_J];
        }
        for i in LFG_J..LFG_K {
            self.buffer[i] ^= self.buffer[i - LFG_J];
        }
    }

    /// Discard `count` output bytes.
    pub fn skip(&mut self, count: usize) {
        let mut pos = self.position_bytes + count;
        while pos >= BUFFER_BYTES {
            self.forward();
            pos -= BUFFER_BYTES;
        }
        self.position_bytes = pos;
    }

    pub fn fill(&mut self, out: &mut [u8]) {
        for byte in out.iter_mut() {
            if self.position_bytes == BUFFER_BYTES {
                self.forward();
                self.position_bytes = 0;
            }
            let word = self.buffer[self.position_bytes / 4];
            *byte = word.to_be_bytes()[self.position_bytes % 4];
            self.position_bytes += 1;
        }
    }
}
