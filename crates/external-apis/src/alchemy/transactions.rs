// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Account transaction history: transfers plus the approvals granted alongside them

use std::sync::Arc;

use alloy_primitives::Address;
use fetch_queue::{FetchError, FetchQueue, JobHandle, QueueConfig, RateLimitStore};
use serde::Serialize;
use shared_types::ChainId;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    AlchemyClient, AlchemyJob, AlchemyJobKind, AlchemyResponse, ApprovalsRequest, Direction,
    NATIVE_TOKEN_SLUG, TransfersRequest,
    approvals::{Log, RangePlanner, dedupe_logs},
    transfers::{AssetTransfer, combine},
};
use crate::transport::ProviderError;

/// One page of an account's history
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransactionsPage {
    /// Transfers, newest first
    pub transfers: Vec<AssetTransfer>,
    /// Approvals granted within the blocks the transfers span
    pub approvals: Vec<Log>,
}

/// Queued Alchemy access
#[derive(Debug)]
pub struct Alchemy {
    client: AlchemyClient,
    queue: FetchQueue<AlchemyJob>,
    planner: RangePlanner,
}

impl Alchemy {
    /// Start the Alchemy queue
    ///
    /// # Errors
    ///
    /// Returns an error if the queue configuration is inconsistent
    pub fn start<L: RateLimitStore>(
        client: AlchemyClient,
        config: QueueConfig<AlchemyJobKind>,
        planner: RangePlanner,
        store: Arc<L>,
        cancel: CancellationToken,
    ) -> Result<Self, ProviderError> {
        let queue = FetchQueue::start(config, client.clone(), store, cancel)?;
        Ok(Self {
            client,
            queue,
            planner,
        })
    }

    /// The underlying client
    pub fn client(&self) -> &AlchemyClient {
        &self.client
    }

    /// The dispatcher queue
    pub fn queue(&self) -> &FetchQueue<AlchemyJob> {
        &self.queue
    }

    /// Close the queue, letting running requests finish
    pub async fn shutdown(&self) -> usize {
        self.queue.shutdown().await
    }

    /// Transfers of `account` older than `older_than_block`, with matching approvals
    ///
    /// Approvals are skipped for native-currency history. When the provider refuses the
    /// approvals span as too wide, it is split according to the configured planner.
    pub async fn fetch_transactions(
        &self,
        chain: ChainId,
        account: Address,
        contract: Option<String>,
        older_than_block: Option<u64>,
    ) -> Result<TransactionsPage, FetchError> {
        let to_block = match older_than_block {
            Some(0) => return Ok(TransactionsPage::default()),
            Some(height) => Some(height - 1),
            None => None,
        };

        let transfers = self.fetch_transfers(chain, account, contract.as_deref(), to_block).await?;
        if transfers.is_empty() || contract.as_deref() == Some(NATIVE_TOKEN_SLUG) {
            return Ok(TransactionsPage {
                transfers,
                approvals: Vec::new(),
            });
        }

        let newest = transfers.first().map_or(0, AssetTransfer::block_number);
        let oldest = transfers.last().map_or(0, AssetTransfer::block_number);
        let (low, high) = (oldest.min(newest), oldest.max(newest));
        let approvals_job = |from_block, to_block| {
            AlchemyJob::Approvals(ApprovalsRequest {
                chain,
                account,
                contract: contract.clone(),
                from_block,
                to_block,
            })
        };

        let approvals = match self.queue.fetch(approvals_job(low, high)).await {
            Ok(response) => expect_logs(response)?,
            Err(FetchError::Upstream(error)) => {
                let Some(range) = self.client.block_range_matcher().allowed_range(error.message()) else {
                    return Err(FetchError::Upstream(error));
                };

                let account_lower = account.to_string().to_lowercase();
                let sends = self.planner.send_blocks(&transfers, &account_lower);
                let spans = self.planner.plan(low, high, range, &sends);
                info!(
                    %chain,
                    range,
                    requests = spans.len(),
                    "approvals span exceeds the provider block range, splitting"
                );

                let handles = spans
                    .into_iter()
                    .map(|(from, to)| self.queue.enqueue(approvals_job(from, to)))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut chunks = Vec::with_capacity(handles.len());
                for handle in handles {
                    chunks.push(expect_logs(handle.wait().await?)?);
                }
                dedupe_logs(chunks)
            }
            Err(error) => return Err(error),
        };

        Ok(TransactionsPage { transfers, approvals })
    }

    async fn fetch_transfers(
        &self,
        chain: ChainId,
        account: Address,
        contract: Option<&str>,
        to_block: Option<u64>,
    ) -> Result<Vec<AssetTransfer>, FetchError> {
        let request = |direction| {
            AlchemyJob::AssetTransfers(TransfersRequest {
                chain,
                account,
                contract: contract.map(str::to_string),
                direction,
                to_block,
            })
        };

        let outgoing = self.queue.enqueue(request(Direction::Outgoing))?;
        let incoming = self.queue.enqueue(request(Direction::Incoming))?;
        let (outgoing, incoming) = tokio::join!(wait_transfers(outgoing), wait_transfers(incoming));
        let (outgoing, incoming) = (outgoing?, incoming?);

        debug!(
            %chain,
            outgoing = outgoing.len(),
            incoming = incoming.len(),
            "merging transfer pages"
        );
        Ok(combine(outgoing, incoming))
    }
}

async fn wait_transfers(handle: JobHandle<AlchemyResponse>) -> Result<Vec<AssetTransfer>, FetchError> {
    match handle.wait().await? {
        AlchemyResponse::Transfers(transfers) => Ok(transfers),
        AlchemyResponse::Logs(_) => Err(mismatched("transfers")),
    }
}

fn expect_logs(response: AlchemyResponse) -> Result<Vec<Log>, FetchError> {
    match response {
        AlchemyResponse::Logs(logs) => Ok(logs),
        AlchemyResponse::Transfers(_) => Err(mismatched("logs")),
    }
}

fn mismatched(expected: &str) -> FetchError {
    FetchError::Upstream(api_client::CodedError::internal(format!(
        "Alchemy job produced an unexpected response, expected {expected}"
    )))
}
