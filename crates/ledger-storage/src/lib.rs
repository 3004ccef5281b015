pub mod sled_store;

use anyhow::Result;
use ledger_core::{Chain, ChainConfig};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

pub use sled_store::SledStore;

/// Open the sled database at `path` and load its chain, creating a genesis-only
/// chain with `config` when the database is empty.
pub fn open_chain<T, P>(path: P, config: ChainConfig) -> Result<(SledStore, Chain<T>)>
where
    T: Serialize + DeserializeOwned,
    P: AsRef<Path>,
{
    let store = SledStore::open(path)?;
    let chain = Chain::open_or_init(&store, config)?;
    Ok((store, chain))
}
