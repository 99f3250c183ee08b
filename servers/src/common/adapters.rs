// Copyright 2019 The Kestrel Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Adapters connecting the blockchain and the transaction pool without
//! a direct reference cycle: the pool reaches the chain through a
//! read-only capability handle, and the chain's connect/disconnect
//! events are forwarded into the pool synchronously and in order.

use std::sync::{Arc, Weak};

use kestrel_chain as chain;
use kestrel_chain::{ChainAdapter, ChainEntry};
use kestrel_core::core::block::Block;
use kestrel_core::core::coin::Coin;
use kestrel_core::core::hash::Hash;
use kestrel_core::core::transaction::OutPoint;
use kestrel_pool as pool;
use kestrel_pool::{BlockChain, ChainInfo, PoolAdapter, PoolEntry, PoolError, RemovalReason};
use kestrel_store as store;
use kestrel_util::{OneTime, RwLock};

/// Key the fee estimator checkpoint is stored under in the node db.
pub const FEE_ESTIMATOR_KEY: &[u8] = b"F";

/// Blocks between fee estimator checkpoints.
const FEE_CHECKPOINT_INTERVAL: u64 = 100;

/// Read-only view of the chain handed to the pool. The chain reference
/// is bound late (after the chain is built) through a weak handle, so
/// neither side owns the other.
pub struct PoolToChainAdapter {
	chain: OneTime<Weak<chain::Chain>>,
}

impl PoolToChainAdapter {
	/// Create a new pool adapter, to be bound to the chain once it
	/// exists.
	pub fn new() -> PoolToChainAdapter {
		PoolToChainAdapter {
			chain: OneTime::new(),
		}
	}

	/// Bind the freshly built chain.
	pub fn set_chain(&self, chain: &Arc<chain::Chain>) {
		self.chain.init(Arc::downgrade(chain));
	}

	fn chain(&self) -> Result<Arc<chain::Chain>, PoolError> {
		self.chain
			.borrow()
			.upgrade()
			.ok_or_else(|| PoolError::Chain("chain is gone".to_owned()))
	}
}

fn chain_err(e: chain::Error) -> PoolError {
	PoolError::Chain(format!("{}", e))
}

impl BlockChain for PoolToChainAdapter {
	fn chain_info(&self) -> Result<ChainInfo, PoolError> {
		let chain = self.chain()?;
		let head = chain.head();
		let entry = chain.head_entry().map_err(chain_err)?;
		let median_time = chain.median_time_past(&entry).map_err(chain_err)?;
		let flags = chain.get_deployments(&entry).map_err(chain_err)?;
		Ok(ChainInfo {
			tip: head.tip,
			height: head.height,
			median_time,
			verify_flags: flags.verify,
			csv: flags.csv,
			segwit: flags.segwit,
		})
	}

	fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, PoolError> {
		self.chain()?.get_coin(outpoint).map_err(chain_err)
	}

	fn is_confirmed(&self, txid: &Hash) -> Result<bool, PoolError> {
		Ok(self.chain()?.get_tx_meta(txid).map_err(chain_err)?.is_some())
	}

	fn median_time_at(&self, height: u64) -> Result<i64, PoolError> {
		let chain = self.chain()?;
		match chain.get_entry_by_height(height).map_err(chain_err)? {
			Some(entry) => chain.median_time_past(&entry).map_err(chain_err),
			None => Ok(0),
		}
	}
}

/// Forwards chain events into the transaction pool: confirmed entries
/// leave the pool on connect, disconnected blocks feed their
/// transactions back through admission. Also checkpoints the fee
/// estimator at a fixed block cadence when handed the node db.
pub struct ChainToPoolAdapter {
	tx_pool: Arc<RwLock<pool::TransactionPool>>,
	node_db: Option<Arc<store::Store>>,
}

impl ChainToPoolAdapter {
	/// Wrap the shared pool handle.
	pub fn new(
		tx_pool: Arc<RwLock<pool::TransactionPool>>,
		node_db: Option<Arc<store::Store>>,
	) -> ChainToPoolAdapter {
		ChainToPoolAdapter { tx_pool, node_db }
	}

	fn checkpoint_estimator(&self, tx_pool: &pool::TransactionPool) {
		if let Some(db) = &self.node_db {
			let result = db
				.batch()
				.and_then(|batch| {
					batch.put_ser(FEE_ESTIMATOR_KEY, tx_pool.estimator())?;
					batch.commit()
				});
			if let Err(e) = result {
				error!("failed to checkpoint fee estimator: {}", e);
			}
		}
	}
}

impl ChainAdapter for ChainToPoolAdapter {
	fn block_connected(&self, block: &Block, entry: &ChainEntry) {
		let mut tx_pool = self.tx_pool.write();
		if let Err(e) = tx_pool.reconcile_block(block, entry.height) {
			error!("pool reconciliation failed at {}: {}", entry.height, e);
		}
		if entry.height % FEE_CHECKPOINT_INTERVAL == 0 {
			self.checkpoint_estimator(&tx_pool);
		}
	}

	fn block_disconnected(&self, block: &Block, entry: &ChainEntry) {
		debug!(
			"returning {} txs of disconnected block {} to the pool",
			block.txs.len().saturating_sub(1),
			entry.hash()
		);
		let mut tx_pool = self.tx_pool.write();
		tx_pool.reinstate_block(block);
	}

	fn chain_reset(&self, tip: &ChainEntry) {
		warn!("chain reset to {} at {}", tip.hash(), tip.height);
	}
}

/// Pool event sink logging admissions and removals. A relay layer would
/// hang off these same hooks.
pub struct PoolNotifier {}

impl PoolNotifier {
	/// A new do-little notifier.
	pub fn new() -> PoolNotifier {
		PoolNotifier {}
	}
}

impl PoolAdapter for PoolNotifier {
	fn tx_accepted(&self, entry: &PoolEntry) {
		debug!("pool accepted {} (rate {})", entry.hash, entry.fee_rate());
	}

	fn tx_removed(&self, entry: &PoolEntry, reason: RemovalReason) {
		debug!("pool removed {} ({:?})", entry.hash, reason);
	}
}
