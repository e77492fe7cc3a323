/// Compute a non-zero FNV-1a hash over an iterator of byte slices.
///
/// Used to derive `comm_id` values that all members of a split agree on
/// without exchanging them. Zero is reserved for the world communicator.
pub(crate) fn fnv1a_comm_id<I, S>(parts: I) -> u64
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut h = fnv1a(parts);
    if h == 0 {
        h = 1;
    }
    h
}

/// Plain 64-bit FNV-1a over the concatenated parts.
pub(crate) fn fnv1a<I, S>(parts: I) -> u64
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut h: u64 = 0xcbf29ce484222325; // offset basis
    for part in parts {
        for &b in part.as_ref() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
    }
    h
}
