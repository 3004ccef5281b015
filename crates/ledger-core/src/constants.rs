pub const BYTE: usize = 8;
pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const NIBBLE_BITS: u32 = 4;
/// Difficulty is counted in leading zero hex characters, so it cannot exceed the digest length.
pub const MAX_DIFFICULTY: u32 = HASH_HEX_SIZE as u32;
pub const DEFAULT_DIFFICULTY: u32 = 4;
/// Nonces handed to each rayon job during a parallel search.
pub const PARALLEL_NONCE_BATCH: u64 = 4096;
