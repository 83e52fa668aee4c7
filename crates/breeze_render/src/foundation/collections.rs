//! Specialized collection types

pub use slotmap::{Key, SecondaryMap, SlotMap};

slotmap::new_key_type! {
    /// Stable key of an active perspective in a pipeline's perspective pool
    pub struct PerspectiveKey;

    /// Stable key of a renderable attached to a scenery
    pub struct RenderableKey;

    /// External handle to a water controller
    pub struct WaterHandle;
}

/// Handle-based map using slot map for stable references
pub type HandleMap<K, T> = SlotMap<K, T>;

/// Encode a slot map key as a plain integer, e.g. for storage in GPU-visible memory
pub fn key_to_bits<K: Key>(key: K) -> u64 {
    key.data().as_ffi()
}

/// Decode a key previously encoded with [`key_to_bits`]
pub fn key_from_bits<K: Key + From<slotmap::KeyData>>(bits: u64) -> K {
    K::from(slotmap::KeyData::from_ffi(bits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bits_round_trip() {
        let mut map: HandleMap<PerspectiveKey, u32> = HandleMap::with_key();
        let key = map.insert(7);
        let decoded: PerspectiveKey = key_from_bits(key_to_bits(key));
        assert_eq!(decoded, key);
        assert_eq!(map.get(decoded), Some(&7));
    }
}
