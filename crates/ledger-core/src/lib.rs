pub mod chain;
pub mod constants;
pub mod error;
pub mod mine;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

use crate::constants::HASH_SIZE;
pub use crate::chain::{Chain, ChainConfig, ChainStore, SharedChain, Violation};
pub use crate::error::{LedgerError, Result};

pub type Hash = [u8; HASH_SIZE];

/// Previous-hash value carried by the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Milliseconds since the Unix epoch, or 0 if the clock is set before it.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One ledger entry. `T` is an opaque payload hashed through its serde_json
/// encoding, so it must serialize deterministically: use ordered collections
/// such as `BTreeMap` rather than `HashMap`, or the hash can change between
/// processes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block<T = String> {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: Vec<T>,
    pub previous_hash: String,
    pub nonce: u64,
    pub hash: String,
}

/// Borrowed view of the five fields a block hash commits to.
#[derive(Debug)]
pub struct BlockContent<'a, T> {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: &'a [T],
    pub previous_hash: &'a str,
    pub nonce: u64,
}

impl<T> Clone for BlockContent<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for BlockContent<'_, T> {}

impl<T: Serialize> BlockContent<'_, T> {
    /// Preimage bytes up to, but excluding, the trailing nonce. Variable-length
    /// fields are length-prefixed so distinct contents never share a preimage.
    pub fn preimage_prefix(&self) -> Result<Vec<u8>> {
        let txs = serde_json::to_vec(self.transactions)?;
        let prev = self.previous_hash.as_bytes();
        let mut bytes = Vec::with_capacity(8 + 8 + 8 + txs.len() + 8 + prev.len());
        bytes.extend_from_slice(&self.index.to_le_bytes());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&(txs.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&txs);
        bytes.extend_from_slice(&(prev.len() as u64).to_le_bytes());
        bytes.extend_from_slice(prev);
        Ok(bytes)
    }

    pub fn hash_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = self.preimage_prefix()?;
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        Ok(bytes)
    }
}

/// SHA-256 of a block's content, hex encoded.
pub fn block_hash<T: Serialize>(content: &BlockContent<'_, T>) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(content.hash_bytes()?);
    Ok(hex::encode(hasher.finalize()))
}

/// Finish a hasher already fed with a preimage prefix by appending `nonce`.
pub fn digest_with_nonce(prefix: &Sha256, nonce: u64) -> Hash {
    let mut hasher = prefix.clone();
    hasher.update(nonce.to_le_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&digest[..]);
    out
}

impl<T> Block<T> {
    pub fn content(&self) -> BlockContent<'_, T> {
        BlockContent {
            index: self.index,
            timestamp: self.timestamp,
            transactions: &self.transactions,
            previous_hash: &self.previous_hash,
            nonce: self.nonce,
        }
    }

    /// True when the stored hash starts with `difficulty` zero hex characters.
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        pow::has_leading_zeros(&self.hash, difficulty)
    }

    fn publish(&mut self, proof: pow::Proof) {
        self.nonce = proof.nonce;
        self.hash = proof.hash;
        info!(index = self.index, nonce = self.nonce, "Block mined: {}", self.hash);
    }
}

impl<T: Serialize> Block<T> {
    /// A block awaiting linkage and mining. The hash is computed right away so
    /// the block is self-consistent from the start.
    pub fn new(index: u64, timestamp: u64, transactions: Vec<T>) -> Result<Self> {
        Self::with_previous(index, timestamp, transactions, String::new())
    }

    /// The unmined first block: no transactions and the sentinel previous hash.
    pub fn genesis(timestamp: u64) -> Result<Self> {
        Self::with_previous(0, timestamp, Vec::new(), GENESIS_PREVIOUS_HASH.to_string())
    }

    fn with_previous(
        index: u64,
        timestamp: u64,
        transactions: Vec<T>,
        previous_hash: String,
    ) -> Result<Self> {
        let mut block = Self {
            index,
            timestamp,
            transactions,
            previous_hash,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash()?;
        Ok(block)
    }

    pub fn compute_hash(&self) -> Result<String> {
        block_hash(&self.content())
    }

    /// Stored hash matches the content. Content that no longer serializes
    /// cannot match anything, so it counts as inconsistent.
    pub fn is_self_consistent(&self) -> bool {
        matches!(self.compute_hash(), Ok(h) if h == self.hash)
    }

    /// Search nonces from the current one until the hash has `difficulty`
    /// leading zero hex characters, then store nonce and hash together.
    pub fn mine(&mut self, difficulty: u32) -> Result<()> {
        let proof = pow::search(&self.content(), difficulty)?;
        self.publish(proof);
        Ok(())
    }

    /// Same result as [`Block::mine`], with the search spread over the rayon pool.
    pub fn mine_parallel(&mut self, difficulty: u32) -> Result<()> {
        let proof = mine::search_parallel(&self.content(), difficulty)?;
        self.publish(proof);
        Ok(())
    }
}

pub mod pow {
    use super::{digest_with_nonce, BlockContent, Hash};
    use crate::constants::{BYTE, MAX_DIFFICULTY, NIBBLE_BITS};
    use crate::error::{LedgerError, Result};
    use serde::Serialize;
    use sha2::{Digest, Sha256};

    /// A winning nonce and the hash it produces.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct Proof {
        pub nonce: u64,
        pub hash: String,
    }

    pub fn check_difficulty(difficulty: u32) -> Result<()> {
        if difficulty > MAX_DIFFICULTY {
            return Err(LedgerError::InvalidDifficulty {
                difficulty,
                max: MAX_DIFFICULTY,
            });
        }
        Ok(())
    }

    /// Increment the nonce from `content.nonce` until the hash has at least
    /// `difficulty` leading zero nibbles. Unbounded for large difficulties.
    pub fn search<T: Serialize>(content: &BlockContent<'_, T>, difficulty: u32) -> Result<Proof> {
        check_difficulty(difficulty)?;
        let prefix = Sha256::new().chain_update(content.preimage_prefix()?);
        let mut nonce = content.nonce;
        loop {
            let h = digest_with_nonce(&prefix, nonce);
            if count_leading_zero_nibbles(&h) >= difficulty {
                return Ok(Proof {
                    nonce,
                    hash: hex::encode(h),
                });
            }
            nonce = nonce
                .checked_add(1)
                .ok_or(LedgerError::NonceSpaceExhausted {
                    index: content.index,
                })?;
        }
    }

    pub fn count_leading_zero_bits(hash: &Hash) -> u32 {
        let mut total = 0u32;
        for b in hash {
            if *b == 0 {
                total += BYTE as u32;
            } else {
                total += b.leading_zeros();
                break;
            }
        }
        total
    }

    /// Leading zero hex characters of `hash`.
    pub fn count_leading_zero_nibbles(hash: &Hash) -> u32 {
        count_leading_zero_bits(hash) / NIBBLE_BITS
    }

    pub fn has_leading_zeros(hex_hash: &str, difficulty: u32) -> bool {
        let d = difficulty as usize;
        hex_hash.len() >= d && hex_hash.bytes().take(d).all(|c| c == b'0')
    }
}
