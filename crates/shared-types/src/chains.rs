// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Blockchain chain identifiers
//!
//! Providers are addressed by EIP-155 numeric chain id. Callers send that id in
//! either decimal (`137`) or hexadecimal (`0x89`) form; both normalise to the same
//! [`ChainId`] so that logically identical requests produce identical dedup keys.

use std::{fmt, num::NonZeroU64, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use utoipa::ToSchema;

/// EIP-155 chain identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ToSchema)]
#[schema(value_type = u64, example = 1)]
pub struct ChainId(NonZeroU64);

impl ChainId {
    /// Ethereum Mainnet - Chain ID: 1
    pub const ETHEREUM: Self = Self::from_const(1);
    /// Optimism - Chain ID: 10
    pub const OPTIMISM: Self = Self::from_const(10);
    /// BNB Smart Chain - Chain ID: 56
    pub const BSC: Self = Self::from_const(56);
    /// Polygon - Chain ID: 137
    pub const POLYGON: Self = Self::from_const(137);
    /// Base - Chain ID: 8453
    pub const BASE: Self = Self::from_const(8453);
    /// Arbitrum One - Chain ID: 42161
    pub const ARBITRUM: Self = Self::from_const(42161);
    /// Avalanche C-Chain - Chain ID: 43114
    pub const AVALANCHE: Self = Self::from_const(43114);
    /// Etherlink - Chain ID: 42793
    pub const ETHERLINK: Self = Self::from_const(42793);

    #[allow(clippy::panic)]
    const fn from_const(id: u64) -> Self {
        match NonZeroU64::new(id) {
            Some(id) => Self(id),
            None => panic!("chain id constants are non-zero"),
        }
    }

    /// Create a chain id, rejecting zero
    ///
    /// # Errors
    ///
    /// Returns [`ChainIdParseError::Zero`] for `0`, which is not a valid EIP-155 id
    pub const fn new(id: u64) -> Result<Self, ChainIdParseError> {
        match NonZeroU64::new(id) {
            Some(id) => Ok(Self(id)),
            None => Err(ChainIdParseError::Zero),
        }
    }

    /// Returns the numeric chain ID
    pub const fn value(self) -> u64 {
        self.0.get()
    }

    /// Returns the human-readable name of well-known chains
    pub const fn name(self) -> Option<&'static str> {
        match self.0.get() {
            1 => Some("Ethereum"),
            10 => Some("Optimism"),
            56 => Some("BNB Smart Chain"),
            137 => Some("Polygon"),
            8453 => Some("Base"),
            42161 => Some("Arbitrum"),
            42793 => Some("Etherlink"),
            43114 => Some("Avalanche"),
            _ => None,
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChainId {
    type Err = ChainIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = if let Some(hex) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            u64::from_str_radix(hex, 16)
        } else {
            trimmed.parse::<u64>()
        };

        let id = parsed.map_err(|_| ChainIdParseError::Invalid(s.to_string()))?;
        Self::new(id)
    }
}

impl TryFrom<u64> for ChainId {
    type Error = ChainIdParseError;

    fn try_from(id: u64) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<ChainId> for u64 {
    fn from(chain: ChainId) -> Self {
        chain.value()
    }
}

impl Serialize for ChainId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ChainIdVisitor;

        impl serde::de::Visitor<'_> for ChainIdVisitor {
            type Value = ChainId;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(
                    formatter,
                    "a positive chain ID as a number, a decimal string (\"137\") or a hex string (\"0x89\")"
                )
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                ChainId::new(value).map_err(|_| {
                    E::invalid_value(serde::de::Unexpected::Unsigned(value), &"a non-zero chain ID")
                })
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(value)
                    .ok()
                    .and_then(|value| ChainId::new(value).ok())
                    .ok_or_else(|| {
                        E::invalid_value(serde::de::Unexpected::Signed(value), &"a non-zero chain ID")
                    })
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                ChainId::from_str(value).map_err(|_| {
                    E::invalid_value(
                        serde::de::Unexpected::Str(value),
                        &"a decimal or 0x-prefixed hex chain ID",
                    )
                })
            }
        }

        deserializer.deserialize_any(ChainIdVisitor)
    }
}

/// Error type for chain ID parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainIdParseError {
    /// Chain id zero is reserved
    #[error("chain ID must be a natural number greater than 0")]
    Zero,
    /// Not a decimal or hex number
    #[error("invalid chain ID: {0}")]
    Invalid(String),
}
