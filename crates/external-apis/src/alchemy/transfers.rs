// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Asset transfers and the merging of outgoing and incoming pages
//!
//! An account's history is fetched as two capped, block-descending lists: transfers
//! sent by the account and transfers received by it. Each list only covers the blocks
//! down to its last entry, so after merging only the window both lists cover is
//! complete; everything older is dropped and picked up by the next page request.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Page size requested for each direction
pub const TRANSFERS_PAGE_LIMIT: usize = 50;

/// Categories of native-currency movements
pub const GAS_CATEGORIES: &[&str] = &["external", "internal"];

/// Categories of token movements
pub const ASSET_CATEGORIES: &[&str] = &["erc20", "erc721", "erc1155", "specialnft"];

/// One transfer as returned by `alchemy_getAssetTransfers`
///
/// Fields not needed for merging are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetTransfer {
    /// Hex block number
    pub block_num: String,
    /// Provider-unique transfer id
    pub unique_id: String,
    /// Transaction hash
    pub hash: String,
    /// Sender
    pub from: String,
    /// Recipient
    #[serde(default)]
    pub to: Option<String>,
    /// Transfer category
    pub category: String,
    /// Block metadata
    #[serde(default)]
    pub metadata: Option<TransferMetadata>,
    /// Remaining provider fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Block metadata of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetadata {
    /// ISO-8601 block timestamp
    pub block_timestamp: String,
}

impl AssetTransfer {
    /// Block number; unparseable values sort as block zero
    pub fn block_number(&self) -> u64 {
        parse_block_number(&self.block_num).unwrap_or(0)
    }

    /// Block timestamp, empty when unknown
    pub fn timestamp(&self) -> &str {
        self.metadata
            .as_ref()
            .map_or("", |metadata| metadata.block_timestamp.as_str())
    }

    /// Whether this moves the native currency
    pub fn is_gas_transfer(&self) -> bool {
        GAS_CATEGORIES.contains(&self.category.as_str())
    }
}

/// Parse a `0x`-prefixed hex or decimal block number
pub fn parse_block_number(value: &str) -> Option<u64> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Combine the outgoing and incoming lists into one page
///
/// The lists are merged down to the window both cover, sorted newest first, stripped
/// of a trailing transaction that may continue on the next page, and de-duplicated
/// (self-transfers appear in both lists).
pub fn combine(outgoing: Vec<AssetTransfer>, incoming: Vec<AssetTransfer>) -> Vec<AssetTransfer> {
    let mut merged = merge_capped(outgoing, incoming, TRANSFERS_PAGE_LIMIT);
    if merged.is_empty() {
        return merged;
    }

    sort_newest_first(&mut merged);
    let cut = trailing_same_hash_count(&merged);
    if cut < merged.len() {
        merged.truncate(merged.len() - cut);
    }
    dedupe_by_unique_id(merged)
}

/// Merge two block-descending lists that were each capped at `cap` entries
///
/// The order of the arguments does not matter.
pub fn merge_capped(
    mut first: Vec<AssetTransfer>,
    mut second: Vec<AssetTransfer>,
    cap: usize,
) -> Vec<AssetTransfer> {
    let (Some(first_last), Some(second_last)) = (
        first.last().map(AssetTransfer::block_number),
        second.last().map(AssetTransfer::block_number),
    ) else {
        return if first.is_empty() { second } else { first };
    };

    let first_capped = first.len() >= cap;
    let second_capped = second.len() >= cap;

    match (first_capped, second_capped) {
        (false, false) => {}
        // The uncapped list reached the start of history; the capped one must not
        // extend past it.
        (true, false) => first.retain(|t| t.block_number() >= second_last),
        (false, true) => second.retain(|t| t.block_number() >= first_last),
        (true, true) => {
            let first_head = first[0].block_number();
            let second_head = second[0].block_number();
            if first_last > second_head {
                return first;
            }
            if second_last > first_head {
                return second;
            }
            if first_last > second_last {
                second.retain(|t| t.block_number() >= first_last);
            } else {
                first.retain(|t| t.block_number() >= second_last);
            }
        }
    }

    first.append(&mut second);
    first
}

/// Stable sort by block timestamp, newest first
pub fn sort_newest_first(transfers: &mut [AssetTransfer]) {
    transfers.sort_by(|a, b| b.timestamp().cmp(a.timestamp()));
}

/// How many transfers at the end share the last transfer's hash
///
/// Returns the full length when the first and last share a hash. A two-element list
/// with different hashes counts one.
pub fn trailing_same_hash_count(transfers: &[AssetTransfer]) -> usize {
    let (Some(first), Some(last)) = (transfers.first(), transfers.last()) else {
        return 0;
    };
    if first.hash == last.hash {
        return transfers.len();
    }
    if transfers.len() == 2 {
        return 1;
    }

    transfers
        .iter()
        .rev()
        .take_while(|t| t.hash == last.hash)
        .count()
}

/// Keep the first occurrence of every unique id
pub fn dedupe_by_unique_id(transfers: Vec<AssetTransfer>) -> Vec<AssetTransfer> {
    let mut seen = HashSet::new();
    transfers
        .into_iter()
        .filter(|t| seen.insert(t.unique_id.clone()))
        .collect()
}
