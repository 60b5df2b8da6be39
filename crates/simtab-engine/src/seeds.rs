//! Per-worker random stream assignment.
//!
//! One 256-bit ChaCha key is expanded from the run's master seed and
//! every worker draws from its own ChaCha stream under that key. Stream
//! IDs partition the keystream, so no two workers ever see overlapping
//! output, and any worker's generator can be rebuilt from
//! `(master_seed, worker_id)` alone.

use std::error::Error;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use simtab_core::WorkerId;

/// Generator handed to each worker.
pub type WorkerRng = ChaCha8Rng;

/// Largest supported worker pool.
pub const MAX_WORKERS: usize = 256;

// ── SeedError ─────────────────────────────────────────────────────

/// Seed derivation failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SeedError {
    /// A run needs at least one worker.
    ZeroWorkers,
    /// More workers than [`MAX_WORKERS`] were requested, or a worker ID
    /// beyond that bound was named.
    TooManyWorkers {
        /// Count or ID requested.
        requested: usize,
        /// Supported maximum.
        max: usize,
    },
    /// A master seed override could not be parsed.
    InvalidMasterSeed {
        /// The rejected text.
        value: String,
    },
}

impl fmt::Display for SeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroWorkers => write!(f, "worker count must be at least 1"),
            Self::TooManyWorkers { requested, max } => {
                write!(f, "{requested} workers requested, at most {max} supported")
            }
            Self::InvalidMasterSeed { value } => {
                write!(
                    f,
                    "invalid master seed '{value}': expected a decimal or 0x-prefixed hex u64"
                )
            }
        }
    }
}

impl Error for SeedError {}

// ── WorkerSeed ────────────────────────────────────────────────────

/// The random stream assigned to one worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorkerSeed {
    /// Worker the stream belongs to.
    pub worker: WorkerId,
    /// ChaCha key shared by every worker of the run.
    pub key: [u8; 32],
    /// ChaCha stream ID, unique per worker.
    pub stream: u64,
}

impl WorkerSeed {
    /// A fresh generator positioned at the start of this worker's stream.
    pub fn rng(&self) -> WorkerRng {
        let mut rng = ChaCha8Rng::from_seed(self.key);
        rng.set_stream(self.stream);
        rng
    }

    /// Short summary of the seed for logs and run reports.
    pub fn fingerprint(&self) -> u64 {
        let mut hash = 0xcbf2_9ce4_8422_2325_u64;
        for b in self.key.iter().chain(self.stream.to_le_bytes().iter()) {
            hash ^= u64::from(*b);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        hash
    }
}

// ── SeedAssignment ────────────────────────────────────────────────

/// Seeds for every worker of one run, indexed by worker ID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedAssignment {
    master_seed: u64,
    seeds: Vec<WorkerSeed>,
}

impl SeedAssignment {
    /// The master seed the assignment was derived from.
    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// All worker seeds, worker 0 first.
    pub fn seeds(&self) -> &[WorkerSeed] {
        &self.seeds
    }

    /// The seed of one worker.
    pub fn worker(&self, worker: WorkerId) -> Option<&WorkerSeed> {
        self.seeds.get(worker.0 as usize)
    }

    /// Number of workers.
    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    /// Whether the assignment is empty. Never true for a successful
    /// [`assign_seeds`].
    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    /// Fingerprints of every worker seed, worker 0 first.
    pub fn fingerprints(&self) -> Vec<u64> {
        self.seeds.iter().map(WorkerSeed::fingerprint).collect()
    }
}

fn expand_key(master_seed: u64) -> [u8; 32] {
    ChaCha8Rng::seed_from_u64(master_seed).get_seed()
}

/// Derive the random streams for `worker_count` workers.
///
/// Pure: identical inputs always yield identical assignments.
pub fn assign_seeds(master_seed: u64, worker_count: usize) -> Result<SeedAssignment, SeedError> {
    if worker_count == 0 {
        return Err(SeedError::ZeroWorkers);
    }
    if worker_count > MAX_WORKERS {
        return Err(SeedError::TooManyWorkers {
            requested: worker_count,
            max: MAX_WORKERS,
        });
    }
    let key = expand_key(master_seed);
    let seeds = (0..worker_count as u32)
        .map(|w| WorkerSeed {
            worker: WorkerId(w),
            key,
            stream: u64::from(w),
        })
        .collect();
    Ok(SeedAssignment { master_seed, seeds })
}

/// Re-derive a single worker's seed without building the whole
/// assignment.
pub fn derive_worker_seed(master_seed: u64, worker: WorkerId) -> Result<WorkerSeed, SeedError> {
    if worker.0 as usize >= MAX_WORKERS {
        return Err(SeedError::TooManyWorkers {
            requested: worker.0 as usize + 1,
            max: MAX_WORKERS,
        });
    }
    Ok(WorkerSeed {
        worker,
        key: expand_key(master_seed),
        stream: u64::from(worker.0),
    })
}

/// A master seed taken from the wall clock, for runs that do not supply
/// one. The caller must record it.
pub fn time_derived_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    // splitmix64 finaliser, so consecutive calls differ in every bit.
    let mut z = nanos ^ (u64::from(std::process::id()) << 32);
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Parse a master seed override: decimal, or hex with a `0x` prefix.
pub fn parse_master_seed(text: &str) -> Result<u64, SeedError> {
    let trimmed = text.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => trimmed.parse::<u64>(),
    };
    parsed.map_err(|_| SeedError::InvalidMasterSeed {
        value: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::RngCore;
    use std::collections::HashSet;

    #[test]
    fn zero_and_oversized_pools_are_rejected() {
        assert_eq!(assign_seeds(1, 0), Err(SeedError::ZeroWorkers));
        assert_eq!(
            assign_seeds(1, MAX_WORKERS + 1),
            Err(SeedError::TooManyWorkers {
                requested: MAX_WORKERS + 1,
                max: MAX_WORKERS
            })
        );
        assert_eq!(assign_seeds(1, MAX_WORKERS).map(|a| a.len()), Ok(MAX_WORKERS));
    }

    #[test]
    fn single_worker_rederivation_matches_assignment() {
        let all = assign_seeds(99, 8).unwrap();
        let one = derive_worker_seed(99, WorkerId(5)).unwrap();
        assert_eq!(all.worker(WorkerId(5)), Some(&one));

        let mut a = all.seeds()[5].rng();
        let mut b = one.rng();
        for _ in 0..16 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn different_master_seeds_give_different_streams() {
        let a = assign_seeds(1, 1).unwrap().seeds()[0].rng().next_u64();
        let b = assign_seeds(2, 1).unwrap().seeds()[0].rng().next_u64();
        assert_ne!(a, b);
    }

    #[test]
    fn master_seed_parsing() {
        assert_eq!(parse_master_seed("12345"), Ok(12345));
        assert_eq!(parse_master_seed(" 0xff "), Ok(255));
        assert_eq!(parse_master_seed("0XFF"), Ok(255));
        assert!(matches!(
            parse_master_seed("twelve"),
            Err(SeedError::InvalidMasterSeed { value }) if value == "twelve"
        ));
        assert!(parse_master_seed("-1").is_err());
        assert!(parse_master_seed("").is_err());
    }

    #[test]
    fn time_derived_seeds_vary() {
        let seeds: HashSet<u64> = (0..8)
            .map(|_| {
                std::thread::sleep(std::time::Duration::from_micros(10));
                time_derived_seed()
            })
            .collect();
        assert!(seeds.len() > 1);
    }

    proptest! {
        #[test]
        fn assignment_is_deterministic_and_collision_free(
            master in any::<u64>(),
            workers in 1usize..=64,
        ) {
            let a = assign_seeds(master, workers).unwrap();
            let b = assign_seeds(master, workers).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.master_seed(), master);

            let fingerprints: HashSet<u64> = a.fingerprints().into_iter().collect();
            prop_assert_eq!(fingerprints.len(), workers);

            let firsts: HashSet<[u64; 2]> = a
                .seeds()
                .iter()
                .map(|s| {
                    let mut rng = s.rng();
                    [rng.next_u64(), rng.next_u64()]
                })
                .collect();
            prop_assert_eq!(firsts.len(), workers);
        }
    }
}
