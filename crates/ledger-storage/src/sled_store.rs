use anyhow::{Context, Result};
use ledger_core::{Block, ChainStore};
use serde::{de::DeserializeOwned, Serialize};
use sled::{Db, IVec};
use std::path::Path;
use tracing::{debug, info};

const TREE_BLOCKS: &str = "blocks";
const KEY_DIFFICULTY: &[u8] = b"difficulty";

/// Blocks are stored bincode-encoded under their big-endian index, so the tree's
/// last key is always the tip.
#[derive(Clone)]
pub struct SledStore {
  db: Db,
  blocks: sled::Tree,
}

impl SledStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let path = path.as_ref();
    let db = sled::open(path).with_context(|| format!("opening sled db at {}", path.display()))?;
    let blocks = db.open_tree(TREE_BLOCKS)?;
    info!(path = %path.display(), "sled store opened");
    Ok(Self { db, blocks })
  }

  /// Remove every block and the stored difficulty.
  pub fn clear(&self) -> Result<()> {
    self.blocks.clear()?;
    self.db.remove(KEY_DIFFICULTY)?;
    self.db.flush()?;
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.blocks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blocks.is_empty()
  }
}

fn decode_index(key: &IVec) -> Result<u64> {
  let arr: [u8; 8] = key
    .as_ref()
    .try_into()
    .context("block key is not 8 bytes")?;
  Ok(u64::from_be_bytes(arr))
}

impl ChainStore for SledStore {
  fn put_block<T: Serialize>(&self, block: &Block<T>) -> Result<()> {
    let key = block.index.to_be_bytes();
    let bytes = bincode::serialize(block)?;
    self.blocks.insert(key, bytes)?;
    self.blocks.flush()?;
    debug!(index = block.index, "block stored");
    Ok(())
  }

  fn get_block<T: DeserializeOwned>(&self, index: u64) -> Result<Option<Block<T>>> {
    let key = index.to_be_bytes();
    match self.blocks.get(key)? {
      Some(ivec) => {
        let block = bincode::deserialize(&ivec)
          .with_context(|| format!("decoding block {index}"))?;
        Ok(Some(block))
      }
      None => Ok(None),
    }
  }

  fn tip_height(&self) -> Result<Option<u64>> {
    match self.blocks.last()? {
      Some((key, _)) => Ok(Some(decode_index(&key)?)),
      None => Ok(None),
    }
  }

  fn put_difficulty(&self, difficulty: u32) -> Result<()> {
    self.db.insert(KEY_DIFFICULTY, difficulty.to_be_bytes().to_vec())?;
    self.db.flush()?;
    Ok(())
  }

  fn difficulty(&self) -> Result<Option<u32>> {
    match self.db.get(KEY_DIFFICULTY)? {
      Some(v) => {
        let arr: [u8; 4] = v
          .as_ref()
          .try_into()
          .context("stored difficulty is not 4 bytes")?;
        Ok(Some(u32::from_be_bytes(arr)))
      }
      None => Ok(None),
    }
  }

  fn close(&self) -> Result<()> {
    self.db.flush()?;
    Ok(())
  }
}
