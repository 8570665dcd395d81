//! Deterministic channel-to-shard routing.
//!
//! A routing key is hashed with 32-bit FNV-1a and reduced modulo the shard
//! count. The hash is fixed and seedless, so a key lands on the same shard in
//! every process for as long as the shard count stays the same. Changing the
//! shard count re-routes every channel; re-sharding is not supported.

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over raw bytes.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Shard index for `key` among `shard_count` shards.
/// A single shard short-circuits without hashing.
pub fn shard_index(key: &str, shard_count: usize) -> usize {
    if shard_count <= 1 {
        return 0;
    }
    fnv1a_32(key.as_bytes()) as usize % shard_count
}

/// What a lookup is routed by.
///
/// Every message operation routes by channel so that one channel's messages
/// live on one shard. `User` is an alternate policy that nothing on the
/// message path uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingKey<'a> {
    Channel(&'a str),
    User(&'a str),
}

impl<'a> RoutingKey<'a> {
    pub fn as_str(&self) -> &'a str {
        match self {
            Self::Channel(id) | Self::User(id) => id,
        }
    }
}
