//! Maintains the denormalized address aggregate.

use alloy_primitives::U256;
use log::{debug, warn};
use std::sync::Arc;

use crate::domain::{is_valid_address, Block, ValidationError};
use crate::traits::{AddressWriter, BalanceReader, CodeReader};
use crate::SyncResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressSummary {
    /// (address, transaction) pairs seen for the first time
    pub new_memberships: usize,
    pub failed: usize,
}

pub struct AddressIndexer<N, A> {
    node: Arc<N>,
    addresses: Arc<A>,
}

impl<N, A> AddressIndexer<N, A>
where
    N: CodeReader + BalanceReader,
    A: AddressWriter,
{
    pub fn new(node: Arc<N>, addresses: Arc<A>) -> Self {
        Self { node, addresses }
    }

    /// Records sender and recipient membership for every transaction in the
    /// block. Safe to repeat: counts only move on first sight of a pair.
    pub async fn index_block_addresses(&self, block: &Block) -> AddressSummary {
        let mut summary = AddressSummary::default();
        for tx in &block.transactions {
            let mut participants = vec![(tx.from.as_str(), Some(tx.nonce.saturating_add(1)))];
            if let Some(to) = &tx.to {
                participants.push((to.as_str(), None));
            }

            for (address, nonce) in participants {
                match self
                    .addresses
                    .record_address_transaction(address, &tx.hash, nonce)
                    .await
                {
                    Ok(true) => summary.new_memberships += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Failed to record {} for address {}: {}", tx.hash, address, e);
                        summary.failed += 1;
                    }
                }
            }
        }
        debug!(
            "Block {}: {} new address memberships, {} failed",
            block.number, summary.new_memberships, summary.failed
        );
        summary
    }

    /// Fetches and stores the bytecode of a contract. Returns its length.
    pub async fn index_contract(&self, address: &str) -> SyncResult<usize> {
        if !is_valid_address(address) {
            return Err(ValidationError::InvalidAddress {
                field: "contract",
                value: address.to_string(),
            }
            .into());
        }
        let code = self.node.get_code(address).await?;
        self.addresses.save_contract_code(address, &code).await?;
        debug!("Stored {} bytes of code for contract {}", code.len(), address);
        Ok(code.len())
    }

    pub async fn refresh_balance(&self, address: &str) -> SyncResult<U256> {
        let balance = self.node.get_balance(address).await?;
        self.addresses.update_address_balance(address, balance).await?;
        Ok(balance)
    }
}
