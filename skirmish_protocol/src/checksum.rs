// CRC32 state checksums exchanged in DONE actions.
//
// Every participant checksums its simulation state after each tick; DONE
// actions carry the checksum as uppercase hex without leading zeros, so two
// machines that stepped the same actions produce byte-identical strings.

/// Incremental CRC32 over simulation state.
#[derive(Clone, Default)]
pub struct StateHasher {
    inner: crc32fast::Hasher,
}

impl StateHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(bytes);
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.write(&value.to_le_bytes())
    }

    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.write(&value.to_le_bytes())
    }

    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.write(&value.to_bits().to_le_bytes())
    }

    pub fn finish(&self) -> u32 {
        self.inner.clone().finalize()
    }
}

/// Wire representation of a checksum.
pub fn checksum_to_string(checksum: u32) -> String {
    format!("{checksum:X}")
}

/// CRC32 of an arbitrary byte buffer (used for params files).
pub fn checksum_bytes(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_has_no_padding() {
        assert_eq!(checksum_to_string(0), "0");
        assert_eq!(checksum_to_string(0xBEEF), "BEEF");
        assert_eq!(checksum_to_string(0xDEAD_BEEF), "DEADBEEF");
    }

    #[test]
    fn hasher_matches_one_shot_crc() {
        let mut hasher = StateHasher::new();
        hasher.write(b"abc").write(b"def");
        assert_eq!(hasher.finish(), checksum_bytes(b"abcdef"));
    }

    #[test]
    fn field_order_matters() {
        let mut a = StateHasher::new();
        a.write_u64(1).write_u64(2);
        let mut b = StateHasher::new();
        b.write_u64(2).write_u64(1);
        assert_ne!(a.finish(), b.finish());
    }
}
