use crate::{
    constants::DEFAULT_DIFFICULTY,
    error::{LedgerError, Result},
    now_millis,
    pow::check_difficulty,
    Block, GENESIS_PREVIOUS_HASH,
};
use anyhow::{bail, Context};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Trait the storage backends implement so a chain can be saved and reloaded.
/// This lives in `ledger-core` to avoid a circular dependency.
///
/// Blocks are written exactly as held in memory and read back without any
/// recomputation, so tampering on disk shows up on validation.
pub trait ChainStore: Send + Sync {
    fn put_block<T: Serialize>(&self, block: &Block<T>) -> anyhow::Result<()>;
    fn get_block<T: DeserializeOwned>(&self, index: u64) -> anyhow::Result<Option<Block<T>>>;
    /// Index of the highest stored block, `None` when the store is empty.
    fn tip_height(&self) -> anyhow::Result<Option<u64>>;
    fn put_difficulty(&self, difficulty: u32) -> anyhow::Result<()>;
    fn difficulty(&self) -> anyhow::Result<Option<u32>>;
    fn close(&self) -> anyhow::Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Leading zero hex characters required of every mined block.
    pub difficulty: u32,
    /// Mine on the rayon pool instead of the calling thread.
    #[serde(default)]
    pub parallel_mining: bool,
}

impl ChainConfig {
    pub fn new(difficulty: u32) -> Result<Self> {
        check_difficulty(difficulty)?;
        Ok(Self {
            difficulty,
            ..Self::default()
        })
    }

    pub fn parallel(mut self, parallel_mining: bool) -> Self {
        self.parallel_mining = parallel_mining;
        self
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            parallel_mining: false,
        }
    }
}

/// First broken invariant found while scanning a chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Stored hash differs from the hash of the block's current content.
    Content { index: u64 },
    /// Previous-hash does not point at the predecessor's hash (or at the
    /// sentinel, for genesis).
    Linkage { index: u64 },
}

impl Violation {
    pub fn index(&self) -> u64 {
        match self {
            Violation::Content { index } | Violation::Linkage { index } => *index,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Content { index } => {
                write!(f, "block {index} hash does not match its content")
            }
            Violation::Linkage { index } => {
                write!(f, "block {index} previous hash does not match its predecessor")
            }
        }
    }
}

/// Single-owner, in-memory ledger starting at a fixed genesis block.
#[derive(Clone, Debug, Serialize)]
pub struct Chain<T = String> {
    blocks: Vec<Block<T>>,
    config: ChainConfig,
    pending: Vec<T>,
}

impl<T: Serialize> Chain<T> {
    /// Genesis only, default difficulty.
    pub fn new() -> Result<Self> {
        Self::with_config(ChainConfig::default())
    }

    pub fn with_config(config: ChainConfig) -> Result<Self> {
        check_difficulty(config.difficulty)?;
        Ok(Self {
            blocks: vec![Block::genesis(now_millis())?],
            config,
            pending: Vec::new(),
        })
    }

    /// Rebuild a chain from blocks exactly as stored.
    pub fn from_blocks(blocks: Vec<Block<T>>, config: ChainConfig) -> Result<Self> {
        check_difficulty(config.difficulty)?;
        if blocks.is_empty() {
            return Err(LedgerError::EmptyChain);
        }
        Ok(Self {
            blocks,
            config,
            pending: Vec::new(),
        })
    }

    /// Link `candidate` to the tail, mine it at the chain difficulty and push it.
    /// Mining runs to completion before this returns.
    pub fn append(&mut self, mut candidate: Block<T>) -> Result<&Block<T>> {
        self.link_and_mine(&mut candidate)?;
        Ok(self.push(candidate))
    }

    fn link_and_mine(&self, candidate: &mut Block<T>) -> Result<()> {
        candidate.previous_hash = self.latest_block().hash.clone();
        if self.config.parallel_mining {
            candidate.mine_parallel(self.config.difficulty)
        } else {
            candidate.mine(self.config.difficulty)
        }
    }

    fn push(&mut self, block: Block<T>) -> &Block<T> {
        debug!(index = block.index, len = self.blocks.len() + 1, "block appended");
        self.blocks.push(block);
        self.latest_block()
    }

    /// Queue a payload for the next [`Chain::mine_pending`].
    pub fn submit(&mut self, payload: T) {
        self.pending.push(payload);
    }

    /// Drain the pending payloads into a new block at the next index and append it.
    /// On failure the payloads stay queued.
    pub fn mine_pending(&mut self, timestamp: u64) -> Result<&Block<T>> {
        let mut candidate = Block {
            index: self.blocks.len() as u64,
            timestamp,
            transactions: std::mem::take(&mut self.pending),
            previous_hash: String::new(),
            nonce: 0,
            hash: String::new(),
        };
        if let Err(err) = self.link_and_mine(&mut candidate) {
            self.pending = candidate.transactions;
            return Err(err);
        }
        Ok(self.push(candidate))
    }

    pub fn is_valid(&self) -> bool {
        self.first_violation().is_none()
    }

    /// Scan from genesis upward and report the first broken invariant. Pure: no
    /// logging, no mutation.
    ///
    /// Genesis must be self-consistent and carry the sentinel previous hash.
    /// Every later block must be self-consistent and point at its predecessor.
    pub fn first_violation(&self) -> Option<Violation> {
        let genesis = self.blocks.first()?;
        if !genesis.is_self_consistent() {
            return Some(Violation::Content { index: 0 });
        }
        if genesis.previous_hash != GENESIS_PREVIOUS_HASH {
            return Some(Violation::Linkage { index: 0 });
        }

        for (i, pair) in self.blocks.windows(2).enumerate() {
            let (previous, current) = (&pair[0], &pair[1]);
            let index = i as u64 + 1;
            if !current.is_self_consistent() {
                return Some(Violation::Content { index });
            }
            if current.previous_hash != previous.hash {
                return Some(Violation::Linkage { index });
            }
        }
        None
    }

    /// Append `extra_payload` to a stored block and recompute only that block's
    /// hash. The following block keeps pointing at the old hash, which breaks
    /// the chain on purpose.
    pub fn tamper(&mut self, block_index: u64, extra_payload: T) -> Result<()> {
        let len = self.blocks.len();
        let block = usize::try_from(block_index)
            .ok()
            .and_then(|i| self.blocks.get_mut(i))
            .ok_or(LedgerError::BlockIndexOutOfRange {
                index: block_index,
                len,
            })?;
        block.transactions.push(extra_payload);
        block.hash = block.compute_hash()?;
        warn!(index = block_index, hash = %block.hash, "block tampered");
        Ok(())
    }

    /// Write every block and the difficulty to `store`.
    pub fn save_to<S: ChainStore>(&self, store: &S) -> anyhow::Result<()> {
        store.put_difficulty(self.config.difficulty)?;
        for block in &self.blocks {
            store
                .put_block(block)
                .with_context(|| format!("saving block {}", block.index))?;
        }
        debug!(len = self.blocks.len(), "chain saved");
        Ok(())
    }

    /// Load a saved chain, or `None` if the store holds no blocks.
    pub fn load_from<S: ChainStore>(store: &S) -> anyhow::Result<Option<Self>>
    where
        T: DeserializeOwned,
    {
        let Some(tip) = store.tip_height()? else {
            return Ok(None);
        };
        let difficulty = store
            .difficulty()?
            .context("store has blocks but no difficulty")?;

        // The tip is only a key on disk; a gap below it is rejected block by block.
        let mut blocks = Vec::new();
        for index in 0..=tip {
            match store.get_block::<T>(index)? {
                Some(block) => blocks.push(block),
                None => bail!("block {index} missing from store (tip {tip})"),
            }
        }
        let chain = Self::from_blocks(blocks, ChainConfig::new(difficulty)?)?;
        debug!(len = chain.len(), difficulty, "chain loaded");
        Ok(Some(chain))
    }

    /// Load the chain in `store`, or create and save a fresh one. Idempotent.
    pub fn open_or_init<S: ChainStore>(store: &S, config: ChainConfig) -> anyhow::Result<Self>
    where
        T: DeserializeOwned,
    {
        if let Some(chain) = Self::load_from(store)? {
            return Ok(chain);
        }
        let chain = Self::with_config(config)?;
        chain.save_to(store)?;
        Ok(chain)
    }
}

impl<T> Chain<T> {
    pub fn latest_block(&self) -> &Block<T> {
        self.blocks
            .last()
            .expect("chain always holds at least the genesis block")
    }

    pub fn blocks(&self) -> &[Block<T>] {
        &self.blocks
    }

    pub fn get(&self, index: u64) -> Option<&Block<T>> {
        usize::try_from(index).ok().and_then(|i| self.blocks.get(i))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn difficulty(&self) -> u32 {
        self.config.difficulty
    }

    pub fn config(&self) -> ChainConfig {
        self.config
    }

    pub fn set_parallel_mining(&mut self, parallel_mining: bool) {
        self.config.parallel_mining = parallel_mining;
    }

    pub fn pending(&self) -> &[T] {
        &self.pending
    }
}

/// Chain behind a reader-writer lock: mutations are serialized, reads may run
/// together but never alongside a mutation.
#[derive(Debug)]
pub struct SharedChain<T = String> {
    inner: Arc<RwLock<Chain<T>>>,
}

impl<T> Clone for SharedChain<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SharedChain<T> {
    pub fn new(chain: Chain<T>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(chain)),
        }
    }

    // A panic while holding the lock cannot leave a half-written block
    // behind, so a poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, Chain<T>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Chain<T>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn latest_hash(&self) -> String {
        self.read().latest_block().hash.clone()
    }

    pub fn snapshot(&self) -> Chain<T>
    where
        T: Clone,
    {
        self.read().clone()
    }
}

impl<T: Serialize> SharedChain<T> {
    /// Appends under the write lock and returns the new block's hash.
    pub fn append(&self, candidate: Block<T>) -> Result<String> {
        Ok(self.write().append(candidate)?.hash.clone())
    }

    pub fn tamper(&self, block_index: u64, extra_payload: T) -> Result<()> {
        self.write().tamper(block_index, extra_payload)
    }

    pub fn submit(&self, payload: T) {
        self.write().submit(payload)
    }

    pub fn is_valid(&self) -> bool {
        self.read().is_valid()
    }

    pub fn first_violation(&self) -> Option<Violation> {
        self.read().first_violation()
    }
}
