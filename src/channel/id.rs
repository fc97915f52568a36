//! Channel identity: one id per unordered pair of parties.

use sha3::{Digest, Sha3_256};

use crate::{
    error::{ChannelError, Result},
    types::{ChannelId, PublicKey},
};

/// Domain separator so channel ids never collide with other values hashed
/// from the same keys.
pub const CHANNEL_ID_TAG: &[u8] = b"paychan/channel-id/v1";

/// Order two keys byte-lexicographically: `(party A, party B)`.
pub fn canonical_order(k1: PublicKey, k2: PublicKey) -> (PublicKey, PublicKey) {
    if k1 <= k2 {
        (k1, k2)
    } else {
        (k2, k1)
    }
}

/// Derive the channel id from two encoded public keys, in either order.
///
/// Equal keys derive an id like any other pair; rejecting self-channels is the
/// job of whoever opens the channel.
pub fn derive_channel_id(key1: &[u8], key2: &[u8]) -> Result<ChannelId> {
    let k1 = PublicKey::from_slice(key1).ok_or(ChannelError::InvalidKey(
        "public key has the wrong length",
    ))?;
    let k2 = PublicKey::from_slice(key2).ok_or(ChannelError::InvalidKey(
        "public key has the wrong length",
    ))?;
    Ok(ChannelId::derive(&k1, &k2))
}

impl ChannelId {
    pub fn derive(k1: &PublicKey, k2: &PublicKey) -> ChannelId {
        let (lower, higher) = canonical_order(*k1, *k2);

        let mut hasher = Sha3_256::new();
        hasher.update(CHANNEL_ID_TAG);
        hasher.update(lower.0);
        hasher.update(higher.0);
        ChannelId(hasher.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sig::PUBLIC_KEY_LEN;
    use proptest::prelude::*;

    fn key(byte: u8) -> PublicKey {
        PublicKey([byte; PUBLIC_KEY_LEN])
    }

    #[test]
    fn order_independent() {
        assert_eq!(ChannelId::derive(&key(1), &key(2)), ChannelId::derive(&key(2), &key(1)));
    }

    #[test]
    fn distinct_pairs_distinct_ids() {
        assert_ne!(ChannelId::derive(&key(1), &key(2)), ChannelId::derive(&key(1), &key(3)));
    }

    #[test]
    fn canonical_order_puts_smaller_first() {
        assert_eq!(canonical_order(key(9), key(3)), (key(3), key(9)));
        assert_eq!(canonical_order(key(3), key(9)), (key(3), key(9)));
    }

    #[test]
    fn tag_is_part_of_the_preimage() {
        let mut hasher = Sha3_256::new();
        hasher.update(key(1).0);
        hasher.update(key(2).0);
        let untagged = ChannelId(hasher.finalize().into());
        assert_ne!(untagged, ChannelId::derive(&key(1), &key(2)));
    }

    #[test]
    fn wrong_key_length_is_invalid_key() {
        let good = key(1);
        let err = derive_channel_id(&good.0, &good.0[1..]).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidKey(_)));
        assert!(derive_channel_id(&[], &good.0).is_err());
    }

    #[test]
    fn equal_keys_still_derive() {
        let k = key(5);
        assert!(derive_channel_id(&k.0, &k.0).is_ok());
    }

    proptest! {
        #[test]
        fn derive_is_symmetric(
            a in proptest::collection::vec(any::<u8>(), PUBLIC_KEY_LEN),
            b in proptest::collection::vec(any::<u8>(), PUBLIC_KEY_LEN),
        ) {
            prop_assert_eq!(derive_channel_id(&a, &b).unwrap(), derive_channel_id(&b, &a).unwrap());
        }
    }
}
