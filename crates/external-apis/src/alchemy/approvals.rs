// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Approval logs and block-range planning
//!
//! Approvals are fetched with `eth_getLogs` over the blocks a transfer page spans.
//! Providers cap the block range of a single logs query; when the span is wider, the
//! span is either split into uniform chunks or, when that would take too many
//! requests, narrowed to windows around the account's own token sends, which is where
//! approvals matter to the user.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::transfers::AssetTransfer;

/// `Approval(address,address,uint256)`
pub const APPROVAL_TOPIC: &str = "0x8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925";

/// `ApprovalForAll(address,address,bool)`
pub const APPROVAL_FOR_ALL_TOPIC: &str =
    "0x17307eab39ab6107e8899845ad3d59bd9653f200f220920489ca2b5937696c31";

const BLOCK_RANGE_PATTERN: &str = r"You can make eth_getLogs requests with up to a (\d+) block range.";

/// One log entry as returned by `eth_getLogs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    /// Transaction that emitted the log
    pub transaction_hash: String,
    /// Position of the log in its block
    pub log_index: String,
    /// Remaining provider fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Recognises the provider's block-range limit error
#[derive(Debug, Clone)]
pub struct BlockRangeMatcher(Regex);

impl BlockRangeMatcher {
    /// Compile the matcher
    pub fn new() -> Result<Self, regex::Error> {
        Regex::new(BLOCK_RANGE_PATTERN).map(Self)
    }

    /// Whether `message` is a block-range error
    pub fn is_match(&self, message: &str) -> bool {
        self.0.is_match(message)
    }

    /// The allowed block range reported in `message`
    pub fn allowed_range(&self, message: &str) -> Option<u64> {
        self.0.captures(message)?.get(1)?.as_str().parse().ok()
    }
}

/// Inclusive block interval
pub type BlockSpan = (u64, u64);

/// Splits a block span that exceeds the provider's logs range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RangePlanner {
    /// Most outgoing token transfers to centre windows on
    pub max_requests: usize,
    /// Windows whose gap exceeds this many blocks are kept apart
    pub adjacency_gap: i64,
}

impl Default for RangePlanner {
    fn default() -> Self {
        Self {
            max_requests: 3,
            adjacency_gap: 1,
        }
    }
}

impl RangePlanner {
    /// Outgoing token transfers considered for windows, newest first
    pub fn send_blocks(&self, transfers: &[AssetTransfer], account: &str) -> Vec<u64> {
        transfers
            .iter()
            .filter(|t| t.from.eq_ignore_ascii_case(account) && !t.is_gas_transfer())
            .take(self.max_requests)
            .map(AssetTransfer::block_number)
            .collect()
    }

    /// Block spans to query for `[low, high]` given the allowed `range`
    ///
    /// `send_blocks` must be in descending order. Uniform chunks are used when they
    /// need no more requests than there are sends; otherwise one window of `range`
    /// blocks is centred on each send and clamped to `[low, high]`. A window overlapping
    /// the previous one is clipped below it, and adjacent windows merge while the result
    /// still fits in `range`. The result is in ascending order.
    pub fn plan(&self, low: u64, high: u64, range: u64, send_blocks: &[u64]) -> Vec<BlockSpan> {
        let range = range.max(1);
        let chunks = (high.saturating_sub(low) + 1).div_ceil(range);

        if chunks <= send_blocks.len() as u64 {
            return (low..=high)
                .step_by(usize::try_from(range).unwrap_or(usize::MAX))
                .map(|from| (from, from + range - 1))
                .collect();
        }

        let (low, high, range) = (to_signed(low), to_signed(high), to_signed(range));
        let half = range / 2;
        let mut windows: Vec<(i64, i64)> = Vec::new();

        for block in send_blocks.iter().map(|block| to_signed(*block)) {
            let from = (block - half + 1).max(low);
            let to = (block + half).min(high);

            let Some(last) = windows.last_mut() else {
                windows.push((from, to));
                continue;
            };

            let (last_from, last_to) = *last;
            let to = (last_from - 1).min(to);
            if from > to {
                continue;
            }

            if last_from - to > self.adjacency_gap || last_to - from + 1 > range {
                windows.push((from, to));
            } else {
                last.0 = from;
            }
        }

        windows
            .into_iter()
            .rev()
            .map(|(from, to)| (to_unsigned(from), to_unsigned(to)))
            .collect()
    }
}

fn to_signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_unsigned(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Flatten chunk results, keeping the first log per `(transactionHash, logIndex)`
pub fn dedupe_logs(chunks: impl IntoIterator<Item = Vec<Log>>) -> Vec<Log> {
    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .flatten()
        .filter(|log| seen.insert((log.transaction_hash.clone(), log.log_index.clone())))
        .collect()
}

/// Topic filter matching approvals granted by `account`
pub fn approval_topics(account: &str) -> Value {
    let owner = account.trim_start_matches("0x").to_lowercase();
    serde_json::json!([
        [APPROVAL_TOPIC, APPROVAL_FOR_ALL_TOPIC],
        format!("0x{owner:0>64}")
    ])
}
