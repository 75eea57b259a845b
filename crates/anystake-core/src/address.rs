// crates/anystake-core/src/address.rs
//
// Account handles.
//
// Every participant (user, ledger, treasury, token, liquidity pair) is
// addressed by a 20-byte handle. Handles are rendered as 0x-prefixed hex
// and can be derived deterministically from a human label, which is how
// configuration files and tests name accounts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::AnyStakeError;

/// A 20-byte account handle.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The zero address. Marks "no price reference" on native pools.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Derive an address from a label: the first 20 bytes of SHA-256(label).
    ///
    /// # Example
    /// ```
    /// use anystake_core::Address;
    /// assert_eq!(Address::from_label("alice"), Address::from_label("alice"));
    /// assert_ne!(Address::from_label("alice"), Address::from_label("bob"));
    /// ```
    pub fn from_label(label: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(label.as_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[..20]);
        Address(out)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps test failure output readable.
        write!(f, "0x{}..", hex::encode(&self.0[..4]))
    }
}

impl FromStr for Address {
    type Err = AnyStakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)
            .map_err(|e| AnyStakeError::InvalidConfig(format!("bad address {}: {}", s, e)))?;
        let arr: [u8; 20] = bytes.try_into().map_err(|_| {
            AnyStakeError::InvalidConfig(format!("address {} must be 20 bytes", s))
        })?;
        Ok(Address(arr))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
