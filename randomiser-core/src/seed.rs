use log::warn;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{RandomiserError, Result};

/// Exclusive upper bound for seeds.
pub const SEED_MAX: u32 = i32::MAX as u32;

/// The single random stream shared by every pass in a run.
///
/// ChaCha8 is specified bit-for-bit, so a given seed yields the same draw
/// sequence on every platform and every build.
pub type RandomStream = ChaCha8Rng;

const ALPHABET_LEN: u64 = 26;

/// Resolve the effective seed for a run and build the stream from it.
///
/// A missing, negative or out-of-range request is replaced by a fresh seed
/// drawn from the thread-local entropy source.
pub fn initialize(requested: Option<i64>) -> (u32, RandomStream) {
    let seed = match requested {
        Some(s) if (0..i64::from(SEED_MAX)).contains(&s) => s as u32,
        Some(s) => {
            warn!("requested seed {s} is outside [0, {SEED_MAX}), drawing a fresh one");
            rand::thread_rng().gen_range(0..SEED_MAX)
        }
        None => rand::thread_rng().gen_range(0..SEED_MAX),
    };
    (seed, stream_for(seed))
}

/// Deterministic stream for an already-resolved seed.
pub fn stream_for(seed: u32) -> RandomStream {
    ChaCha8Rng::seed_from_u64(u64::from(seed))
}

/// Render a seed in base 26 using `A`..=`Z` as digits (`A` = 0).
pub fn encode(seed: u32) -> String {
    let mut n = u64::from(seed);
    let mut digits = Vec::new();
    loop {
        digits.push(b'A' + (n % ALPHABET_LEN) as u8);
        n /= ALPHABET_LEN;
        if n == 0 {
            break;
        }
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Parse a base-26 seed string. Letters are accepted in either case.
pub fn decode(code: &str) -> Result<u32> {
    let code = code.trim();
    if code.is_empty() {
        return Err(RandomiserError::InvalidSeed(code.to_string()));
    }

    let mut n: u64 = 0;
    for ch in code.chars() {
        if !ch.is_ascii_alphabetic() {
            return Err(RandomiserError::InvalidSeed(code.to_string()));
        }
        let digit = u64::from(ch.to_ascii_uppercase() as u8 - b'A');
        n = n * ALPHABET_LEN + digit;
        if n >= u64::from(SEED_MAX) {
            return Err(RandomiserError::InvalidSeed(code.to_string()));
        }
    }
    Ok(n as u32)
}
