/// Number of isolation slots. Each non-terminal worker owns exactly one
/// slot, which doubles as its queue namespace index.
pub const POOL_SIZE: u8 = 16;

/// Lowest slot in `0..POOL_SIZE` not present in `used`, or `None` when the
/// pool is exhausted. Released slots are therefore reused first.
pub fn lowest_free_slot(used: &[u8]) -> Option<u8> {
    (0..POOL_SIZE).find(|slot| !used.contains(slot))
}
