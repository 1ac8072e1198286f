use crate::page_store::PageId;
use std::collections::HashSet;
use std::hash::{BuildHasherDefault, Hasher};

// 64-bit FNV-1a. Used only to detect torn meta writes, so it does not need to resist tampering.
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub(crate) fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

// See "Computationally easy, spectrally good multipliers for congruential pseudorandom number generators" by Steele & Vigna
const K: u64 = 0xf135_7aea_2e62_a9c5;

pub(crate) type PageIdHashSet = HashSet<PageId, BuildHasherDefault<PageIdHasher>>;

// Hasher for sets keyed by a single page id
#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub(crate) struct PageIdHasher {
    hash: u64,
}

impl Hasher for PageIdHasher {
    fn finish(&self) -> u64 {
        #[cfg(target_pointer_width = "64")]
        const ROTATE: u32 = 26;
        #[cfg(target_pointer_width = "32")]
        const ROTATE: u32 = 15;

        self.hash.rotate_left(ROTATE)
    }

    fn write(&mut self, _bytes: &[u8]) {
        unreachable!("Only hashing page ids is supported");
    }

    fn write_u64(&mut self, x: u64) {
        debug_assert_eq!(self.hash, 0);
        self.hash = x.wrapping_mul(K);
    }
}

#[cfg(test)]
mod test {
    use crate::page_store::fast_hash::{fnv1a_64, PageIdHashSet};

    #[test]
    fn reference_vectors() {
        assert_eq!(fnv1a_64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv1a_64(b"foobar"), 0x8594_4171_f739_67e8);
    }

    #[test]
    fn order_sensitive() {
        assert_ne!(fnv1a_64(&[1, 2]), fnv1a_64(&[2, 1]));
    }

    #[test]
    fn page_id_set() {
        let mut set = PageIdHashSet::default();
        for id in 0..1000u64 {
            assert!(set.insert(id * 4096));
        }
        assert!(set.contains(&(999 * 4096)));
        assert!(!set.contains(&1));
        assert_eq!(set.len(), 1000);
    }
}
