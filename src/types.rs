//! Fixed-size byte values shared by the channel, signature and wire layers.

use core::fmt::{Debug, Display};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::sig::{PUBLIC_KEY_LEN, SIGNATURE_LEN};

macro_rules! impl_hex_debug {
    ($T:ident) => {
        impl Debug for $T {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str("0x")?;
                for b in self.0 {
                    f.write_fmt(format_args!("{:02x}", b))?;
                }
                Ok(())
            }
        }

        impl Display for $T {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                for b in self.0 {
                    f.write_fmt(format_args!("{:02x}", b))?;
                }
                Ok(())
            }
        }
    };
}

macro_rules! bytes_n {
    ( $(#[$meta:meta])* $T:ident, $N:expr ) => {
        $(#[$meta])*
        #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone)]
        pub struct $T(pub [u8; $N]);

        impl $T {
            pub const LEN: usize = $N;

            /// Returns `None` if `bytes` does not have exactly [Self::LEN] bytes.
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                let arr: [u8; $N] = bytes.try_into().ok()?;
                Some(Self(arr))
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        // Serialized as lowercase hex so records stay readable in JSON/TOML.
        impl Serialize for $T {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&hex::encode(self.0))
            }
        }

        impl<'de> Deserialize<'de> for $T {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                let mut buf = [0u8; $N];
                hex::decode_to_slice(s.trim_start_matches("0x"), &mut buf)
                    .map_err(de::Error::custom)?;
                Ok(Self(buf))
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self([0; $N])
            }
        }

        impl_hex_debug!($T);
    };
}

bytes_n!(
    /// Canonical identifier of a two-party channel, see [crate::channel::derive_channel_id].
    ChannelId,
    32
);

impl ChannelId {
    /// The all-zero id never comes out of the derivation in practice and is
    /// used as the "missing" marker.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

bytes_n!(
    /// Verification key of a channel party, encoded by the active signature backend.
    PublicKey,
    PUBLIC_KEY_LEN
);

bytes_n!(
    /// Detached signature over a voucher's canonical message.
    Signature,
    SIGNATURE_LEN
);
