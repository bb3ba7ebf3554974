// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Chain id to Alchemy network slug mapping

use shared_types::ChainId;

const NETWORKS: &[(u64, &str)] = &[
    (1, "eth-mainnet"),
    (5, "eth-goerli"),
    (10, "opt-mainnet"),
    (30, "rootstock-mainnet"),
    (31, "rootstock-testnet"),
    (56, "bnb-mainnet"),
    (97, "bnb-testnet"),
    (100, "gnosis-mainnet"),
    (137, "polygon-mainnet"),
    (204, "opbnb-mainnet"),
    (250, "fantom-mainnet"),
    (300, "zksync-sepolia"),
    (324, "zksync-mainnet"),
    (360, "shape-mainnet"),
    (420, "opt-goerli"),
    (480, "worldchain-mainnet"),
    (592, "astar-mainnet"),
    (1088, "metis-mainnet"),
    (1101, "polygonzkevm-mainnet"),
    (1442, "polygonzkevm-testnet"),
    (1946, "soneium-minato"),
    (2442, "polygonzkevm-cardona"),
    (4002, "fantom-testnet"),
    (4801, "worldchain-sepolia"),
    (5000, "mantle-mainnet"),
    (5003, "mantle-sepolia"),
    (5611, "opbnb-testnet"),
    (7000, "zetachain-mainnet"),
    (7001, "zetachain-testnet"),
    (8453, "base-mainnet"),
    (10200, "gnosis-chiado"),
    (11011, "shape-sepolia"),
    (42161, "arb-mainnet"),
    (42170, "arbnova-mainnet"),
    (42220, "celo-mainnet"),
    (43113, "avax-fuji"),
    (43114, "avax-mainnet"),
    (44787, "celo-alfajores"),
    (59141, "linea-sepolia"),
    (59144, "linea-mainnet"),
    (80001, "polygon-mumbai"),
    (80002, "polygon-amoy"),
    (80084, "berachain-bartio"),
    (81457, "blast-mainnet"),
    (84531, "base-goerli"),
    (84532, "base-sepolia"),
    (421_613, "arb-goerli"),
    (421_614, "arb-sepolia"),
    (534_351, "scroll-sepolia"),
    (534_352, "scroll-mainnet"),
    (11_155_111, "eth-sepolia"),
    (11_155_420, "opt-sepolia"),
    (168_587_773, "blast-sepolia"),
];

/// Networks that reject the `internal` transfer category
const WITHOUT_INTERNAL_TRANSFERS: &[&str] = &[
    "opt-mainnet",
    "opt-sepolia",
    "polygon-amoy",
    "bnb-mainnet",
    "bnb-testnet",
    "blast-mainnet",
    "blast-sepolia",
    "arb-mainnet",
    "arb-sepolia",
    "arbnova-mainnet",
    "scroll-mainnet",
    "scroll-sepolia",
    "base-mainnet",
    "base-sepolia",
    "linea-mainnet",
    "linea-sepolia",
    "avax-mainnet",
    "avax-fuji",
    "zksync-mainnet",
    "zksync-sepolia",
    "worldchain-mainnet",
    "worldchain-sepolia",
    "gnosis-mainnet",
    "gnosis-chiado",
    "soneium-minato",
    "zetachain-mainnet",
    "zetachain-testnet",
    "shape-mainnet",
    "shape-sepolia",
    "rootstock-mainnet",
    "rootstock-testnet",
];

/// Alchemy network slug for a chain
pub fn network_for(chain: ChainId) -> Option<&'static str> {
    NETWORKS
        .iter()
        .find(|(id, _)| *id == chain.value())
        .map(|(_, network)| *network)
}

/// Whether asset transfer queries may include internal transfers
pub fn supports_internal_transfers(network: &str) -> bool {
    !WITHOUT_INTERNAL_TRANSFERS.contains(&network)
}

/// Every chain with an Alchemy network
pub fn supported_chains() -> impl Iterator<Item = u64> {
    NETWORKS.iter().map(|(id, _)| *id)
}
