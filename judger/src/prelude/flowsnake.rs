//! Roughly time-ordered 64-bit identifiers for sandbox runs.
//!
//! Layout, from the most significant bit: 34 bits of unix seconds, 12 bits of
//! per-thread worker id, 18 bits of sequence number. Printed as 13 characters
//! of Crockford base32, which is safe to use in container names and paths.

use std::{
    cell::RefCell,
    fmt::{Debug, Formatter},
};

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct FlowSnake(pub u64);

thread_local! {
    static LAST_GENERATION_TIME: RefCell<u64> = RefCell::new(0);
    static SEQ_NUMBER: RefCell<u64> = RefCell::new(0);
    static LOC_WORKER_ID: once_cell::unsync::Lazy<u64> = once_cell::unsync::Lazy::new(get_worker_id);
}

fn get_worker_id() -> u64 {
    rand::random::<u64>()
}

pub const TIMESTAMP_BITS: u32 = 34;
pub const WORKER_ID_BITS: u32 = 12;
pub const SEQUENCE_BITS: u32 = 18;

const BASE32_ALPHABET: &[u8; 32] = b"0123456789abcdefghjkmnpqrstvwxyz";

impl FlowSnake {
    pub fn new_parts(timestamp: u64, worker_id: u64, seq: u64) -> FlowSnake {
        let n = ((timestamp & ((1 << TIMESTAMP_BITS) - 1)) << (WORKER_ID_BITS + SEQUENCE_BITS))
            | ((worker_id & ((1 << WORKER_ID_BITS) - 1)) << SEQUENCE_BITS)
            | (seq & ((1 << SEQUENCE_BITS) - 1));
        FlowSnake(n)
    }

    pub fn generate() -> FlowSnake {
        let time = std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let worker_id = LOC_WORKER_ID.with(|x| **x);
        let seq = if LAST_GENERATION_TIME.with(|x| time <= *x.borrow()) {
            SEQ_NUMBER.with(|s| {
                let mut s = s.borrow_mut();
                let seq = *s;
                *s += 1;
                seq
            })
        } else {
            LAST_GENERATION_TIME.with(|t| *(t.borrow_mut()) = time);
            // Leave a quarter of the sequence space as headroom for this second.
            let rnd = rand::random::<u64>() % ((1 << SEQUENCE_BITS) - (1 << (SEQUENCE_BITS - 2)));
            SEQ_NUMBER.with(|s| {
                (*s.borrow_mut()) = rnd + 1;
            });
            rnd
        };

        FlowSnake::new_parts(time, worker_id, seq)
    }

    pub fn timestamp(&self) -> u64 {
        self.0 >> (WORKER_ID_BITS + SEQUENCE_BITS)
    }

    fn write_str_buffered(&self, buf: &mut [u8; 13]) {
        for (i, slot) in buf.iter_mut().enumerate() {
            // 13 * 5 = 65 bits, the first character only carries 4 of them.
            let five_bit = (self.0 >> (5 * (12 - i))) & 0x1f;
            *slot = BASE32_ALPHABET[five_bit as usize];
        }
    }
}

impl std::fmt::Display for FlowSnake {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut s = [0u8; 13];
        self.write_str_buffered(&mut s);
        // The alphabet is pure ASCII.
        f.write_str(std::str::from_utf8(&s).map_err(|_| std::fmt::Error)?)
    }
}

impl Debug for FlowSnake {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}
