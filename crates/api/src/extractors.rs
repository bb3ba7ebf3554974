// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Query string extractors with field-level validation
//!
//! Query parameters arrive as loose strings. Each endpoint declares a raw shape that
//! always deserializes and a validated shape built from it, so every rejection carries
//! a message naming the offending parameter instead of a generic decoding error.

use std::str::FromStr;

use alloy_primitives::Address;
use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use serde::{Deserialize, de::DeserializeOwned};
use shared_types::ChainId;

use crate::error::ServerError;

/// A query shape that can be checked and converted into typed parameters
pub trait ValidateQuery: Sized {
    /// Shape deserialized straight from the query string
    type Raw: DeserializeOwned + Send;

    /// Convert the raw parameters, naming the first invalid one
    fn validate(raw: Self::Raw) -> Result<Self, String>;
}

/// Extractor yielding validated query parameters or a 400 `{ "error": ... }`
#[derive(Debug)]
pub struct ValidatedQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ValidatedQuery<T>
where
    T: ValidateQuery,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(raw) = Query::<T::Raw>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ServerError::Validation(rejection.body_text()))?;
        T::validate(raw).map(ValidatedQuery).map_err(ServerError::Validation)
    }
}

/// Loose wallet/chain/contract/block parameters shared by the wallet endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWalletQuery {
    wallet_address: Option<String>,
    chain_id: Option<String>,
    contract_address: Option<String>,
    older_than_block_height: Option<String>,
}

/// `walletAddress` and `chainId`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletQuery {
    /// Account to look up
    pub wallet_address: Address,
    /// Chain to look on
    pub chain_id: ChainId,
}

impl ValidateQuery for WalletQuery {
    type Raw = RawWalletQuery;

    fn validate(raw: Self::Raw) -> Result<Self, String> {
        Ok(Self {
            wallet_address: required_address("walletAddress", raw.wallet_address)?,
            chain_id: required_chain("chainId", raw.chain_id)?,
        })
    }
}

/// `walletAddress` across every chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultichainQuery {
    /// Account to look up
    pub wallet_address: Address,
}

impl ValidateQuery for MultichainQuery {
    type Raw = RawWalletQuery;

    fn validate(raw: Self::Raw) -> Result<Self, String> {
        Ok(Self {
            wallet_address: required_address("walletAddress", raw.wallet_address)?,
        })
    }
}

/// Transactions page parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionsQuery {
    /// Chain to look on
    pub chain_id: ChainId,
    /// Account whose history is read
    pub wallet_address: Address,
    /// Token contract, or the native-currency slug
    pub contract_address: Option<String>,
    /// Only transfers in earlier blocks
    pub older_than_block_height: Option<u64>,
}

impl ValidateQuery for TransactionsQuery {
    type Raw = RawWalletQuery;

    fn validate(raw: Self::Raw) -> Result<Self, String> {
        let chain_id = required_chain("chainId", raw.chain_id)?;
        let wallet_address = required_address("walletAddress", raw.wallet_address)?;
        let contract_address = match raw.contract_address {
            Some(contract) if contract.is_empty() => {
                return Err("contractAddress must be at least 1 characters".to_string());
            }
            other => other,
        };
        let older_than_block_height = raw
            .older_than_block_height
            .map(|value| natural_number("olderThanBlockHeight", &value))
            .transpose()?;

        Ok(Self {
            chain_id,
            wallet_address,
            contract_address,
            older_than_block_height,
        })
    }
}

/// Loose exchange-rate parameters
#[derive(Debug, Default, Deserialize)]
pub struct RawRatesQuery {
    addresses: Option<String>,
}

/// Token addresses to price
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatesQuery {
    /// Lowercase token addresses, in request order
    pub addresses: Vec<String>,
}

impl ValidateQuery for RatesQuery {
    type Raw = RawRatesQuery;

    fn validate(raw: Self::Raw) -> Result<Self, String> {
        let list = raw
            .addresses
            .ok_or_else(|| "addresses is undefined".to_string())?;
        let addresses = list
            .split(',')
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .map(|address| {
                parse_address(address)
                    .map(|parsed| parsed.to_string().to_lowercase())
                    .ok_or_else(|| format!("Invalid address: {address}"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if addresses.is_empty() {
            return Err("addresses must contain at least one address".to_string());
        }
        Ok(Self { addresses })
    }
}

fn required_address(field: &str, value: Option<String>) -> Result<Address, String> {
    let value = value.ok_or_else(|| format!("{field} is undefined"))?;
    parse_address(&value).ok_or_else(|| "Invalid address".to_string())
}

fn required_chain(field: &str, value: Option<String>) -> Result<ChainId, String> {
    let value = value.ok_or_else(|| format!("{field} is undefined"))?;
    let id = natural_number(field, &value)?;
    ChainId::new(id).map_err(|e| format!("{field} {e}"))
}

/// Hex address; mixed-case input must carry a valid EIP-55 checksum
pub fn parse_address(value: &str) -> Option<Address> {
    let address = Address::from_str(value).ok()?;
    let digits = value.strip_prefix("0x").unwrap_or(value);
    let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
    if has_upper && has_lower {
        let checksummed = address.to_checksum(None);
        if checksummed.strip_prefix("0x") != Some(digits) {
            return None;
        }
    }
    Some(address)
}

/// Integer of at least 1, with messages distinguishing the failure
pub fn natural_number(field: &str, value: &str) -> Result<u64, String> {
    let trimmed = value.trim();
    if let Ok(number) = trimmed.parse::<u64>() {
        return if number >= 1 {
            Ok(number)
        } else {
            Err(format!("{field} must be greater than or equal to 1"))
        };
    }

    match trimmed.parse::<f64>() {
        Ok(number) if !number.is_finite() => Err(format!("{field} must be a number")),
        Ok(number) if number.fract() != 0.0 => Err(format!("{field} must be an integer")),
        Ok(number) if number < 1.0 => Err(format!("{field} must be greater than or equal to 1")),
        // integral and positive but beyond u64
        Ok(_) => Err(format!("{field} is too large")),
        Err(_) => Err(format!("{field} must be a number")),
    }
}
