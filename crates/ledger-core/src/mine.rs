use crate::{
    constants::PARALLEL_NONCE_BATCH,
    digest_with_nonce,
    error::{LedgerError, Result},
    pow::{check_difficulty, count_leading_zero_nibbles, Proof},
    BlockContent,
};
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Searches nonces in parallel, starting at `content.nonce`, until a hash has at
/// least `difficulty` leading zero hex characters.
///
/// The nonce space is walked in consecutive windows and each window returns its
/// lowest match, so the winning nonce is the same one the serial search finds.
/// Nothing is written to the block here; the caller stores the returned pair.
pub fn search_parallel<T: Serialize>(
    content: &BlockContent<'_, T>,
    difficulty: u32,
) -> Result<Proof> {
    check_difficulty(difficulty)?;
    let prefix = Sha256::new().chain_update(content.preimage_prefix()?);

    let window = PARALLEL_NONCE_BATCH.saturating_mul(rayon::current_num_threads().max(1) as u64);
    let mut low = content.nonce;
    loop {
        let high = low.saturating_add(window - 1);
        let found = (low..=high).into_par_iter().find_first(|nonce| {
            count_leading_zero_nibbles(&digest_with_nonce(&prefix, *nonce)) >= difficulty
        });

        if let Some(nonce) = found {
            let hash = hex::encode(digest_with_nonce(&prefix, nonce));
            return Ok(Proof { nonce, hash });
        }
        if high == u64::MAX {
            return Err(LedgerError::NonceSpaceExhausted {
                index: content.index,
            });
        }
        debug!(index = content.index, low, high, "no proof in nonce window");
        low = high + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pow, Block};

    fn candidate(txs: &[&str]) -> Block {
        Block::new(7, 1_700_000_000_000, txs.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn parallel_proof_meets_difficulty() {
        let block = candidate(&["alice->bob:5"]);
        let proof = search_parallel(&block.content(), 3).unwrap();
        assert!(proof.hash.starts_with("000"));

        let mut check = block.clone();
        check.nonce = proof.nonce;
        assert_eq!(check.compute_hash().unwrap(), proof.hash);
    }

    #[test]
    fn parallel_and_serial_agree() {
        let block = candidate(&["a", "b", "c"]);
        let serial = pow::search(&block.content(), 2).unwrap();
        let parallel = search_parallel(&block.content(), 2).unwrap();
        assert_eq!(serial, parallel);
    }

    #[test]
    fn parallel_zero_difficulty_is_immediate() {
        let block = candidate(&[]);
        let proof = search_parallel(&block.content(), 0).unwrap();
        assert_eq!(proof.nonce, 0);
        assert_eq!(proof.hash, block.hash);
    }

    #[test]
    fn parallel_rejects_out_of_range_difficulty() {
        let block = candidate(&["x"]);
        assert!(matches!(
            search_parallel(&block.content(), 100),
            Err(LedgerError::InvalidDifficulty { difficulty: 100, .. })
        ));
    }
}
