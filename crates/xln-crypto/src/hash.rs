/// BLAKE3 hash of arbitrary bytes → 32-byte array. Used for non-consensus
/// content addressing (snapshot record checksums); consensus roots are
/// Keccak-256 and live in `xln-codec`.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}
