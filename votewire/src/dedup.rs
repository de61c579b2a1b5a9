use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use uuid::Uuid;

/// Expected ballot population and acceptable false-positive rate for the
/// prefilter: ten million elements at one in a thousand.
const EXPECTED_ELEMENTS: usize = 10_000_000;
const FALSE_POSITIVE_RATE: f64 = 0.001;

/// Decides, atomically, whether a ballot id has been seen before.
///
/// Two-stage set: a Bloom-style prefilter answers "definitely new" cheaply;
/// only ids the prefilter cannot rule out touch the exact set. Both stages
/// live under one lock so that two concurrent calls with the same id admit
/// it exactly once.
pub struct ReplayDetector {
    inner: Mutex<DetectorInner>,
    duplicates: AtomicU64,
}

struct DetectorInner {
    prefilter: BloomFilter,
    seen: HashSet<Uuid>,
}

impl ReplayDetector {
    pub fn new() -> Self {
        ReplayDetector {
            inner: Mutex::new(DetectorInner {
                prefilter: BloomFilter::new(EXPECTED_ELEMENTS, FALSE_POSITIVE_RATE),
                seen: HashSet::new(),
            }),
            duplicates: AtomicU64::new(0),
        }
    }

    /// Returns `true` if the id is new (and registers it), `false` if it
    /// is a replay.
    pub fn check_and_register(&self, id: Uuid) -> bool {
        let id_str = id.to_string();
        let mut inner = self.inner.lock().expect("replay detector poisoned");

        if inner.prefilter.might_contain(&id_str) && inner.seen.contains(&id) {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        inner.seen.insert(id);
        inner.prefilter.put(&id_str);
        true
    }

    pub fn duplicate_count(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }
}

impl Default for ReplayDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Bloom filter over id strings.
///
/// Sized by the standard formulas m = -n ln p / (ln 2)^2 and
/// k = round((m/n) ln 2). Each of the k hashes mixes a 31-multiply rolling
/// hash of the string with the seed through the 32-bit finaliser
/// `h ^= h>>16; h *= 0x85ebca6b; h ^= h>>13; h *= 0xc2b2ae35; h ^= h>>16`.
struct BloomFilter {
    bits: Vec<u64>,
    bit_count: usize,
    hash_count: u32,
}

impl BloomFilter {
    fn new(expected_elements: usize, false_positive_rate: f64) -> Self {
        let n = expected_elements as f64;
        let ln2 = std::f64::consts::LN_2;
        let bit_count = (-n * false_positive_rate.ln() / (ln2 * ln2)) as usize;
        let bit_count = bit_count.max(64);
        let hash_count = ((bit_count as f64 / n) * ln2).round().max(1.0) as u32;

        BloomFilter {
            bits: vec![0u64; (bit_count + 63) / 64],
            bit_count,
            hash_count,
        }
    }

    fn put(&mut self, element: &str) {
        let base = base_hash(element);
        for seed in 0..self.hash_count {
            let index = self.bit_index(base, seed as i32);
            self.bits[index / 64] |= 1u64 << (index % 64);
        }
    }

    fn might_contain(&self, element: &str) -> bool {
        let base = base_hash(element);
        for seed in 0..self.hash_count {
            let index = self.bit_index(base, seed as i32);
            if self.bits[index / 64] & (1u64 << (index % 64)) == 0 {
                return false;
            }
        }
        true
    }

    fn bit_index(&self, base: i32, seed: i32) -> usize {
        let mut h = seed.wrapping_add(base);
        h ^= h >> 16;
        h = h.wrapping_mul(0x85eb_ca6bu32 as i32);
        h ^= h >> 13;
        h = h.wrapping_mul(0xc2b2_ae35u32 as i32);
        h ^= h >> 16;
        (h % self.bit_count as i32).unsigned_abs() as usize
    }
}

/// 31-multiply rolling hash of the string bytes, 32-bit wrapping.
fn base_hash(element: &str) -> i32 {
    element
        .bytes()
        .fold(0i32, |h, b| h.wrapping_mul(31).wrapping_add(b as i32))
}
