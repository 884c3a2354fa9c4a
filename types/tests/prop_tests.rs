use proptest::prelude::*;

use shoal_types::{CycleRecord, Hash256, NetworkId, PublicKey, Timestamp};

proptest! {
    /// Hash256 hex roundtrip produces the identical hash.
    #[test]
    fn hash_hex_roundtrip(bytes in prop::array::uniform32(0u8..)) {
        let hash = Hash256::new(bytes);
        let parsed = Hash256::from_hex(&hash.to_hex()).unwrap();
        prop_assert_eq!(parsed, hash);
    }

    /// Hash256::is_zero is true only for all-zero bytes.
    #[test]
    fn hash_is_zero_correct(bytes in prop::array::uniform32(0u8..)) {
        prop_assert_eq!(Hash256::new(bytes).is_zero(), bytes == [0u8; 32]);
    }

    /// Hex ordering of public keys matches byte ordering.
    #[test]
    fn public_key_hex_order_matches_bytes(
        a in prop::array::uniform32(0u8..),
        b in prop::array::uniform32(0u8..),
    ) {
        let (ka, kb) = (PublicKey(a), PublicKey(b));
        prop_assert_eq!(ka.cmp(&kb), ka.to_hex().cmp(&kb.to_hex()));
    }

    /// Normalization is idempotent and order-insensitive.
    #[test]
    fn normalize_ignores_input_order(ids in prop::collection::vec(any::<u8>(), 0..20)) {
        let mut a = CycleRecord::skeleton(NetworkId::Dev, 1, Hash256::ZERO, 0, 60);
        a.removed = ids.iter().map(|b| Hash256::new([*b; 32])).collect();
        let mut b = a.clone();
        b.removed.reverse();

        a.normalize();
        b.normalize();
        prop_assert_eq!(&a, &b);
        prop_assert!(a.is_normalized());
    }

    /// has_expired is monotone in `now`.
    #[test]
    fn expiry_monotone(start in 0u64..1_000_000, dur in 0u64..1000, now in 0u64..2_000_000) {
        let t = Timestamp::new(start);
        if t.has_expired(dur, Timestamp::new(now)) {
            prop_assert!(t.has_expired(dur, Timestamp::new(now + 1)));
        }
    }
}
