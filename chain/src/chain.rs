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

//! Facade and handler for the rest of the blockchain implementation and
//! mostly the chain pipeline. Serializes all mutation under a single
//! chain lock, maintains the orphan pool, drives reorganizations and
//! destructive resets, and answers the read queries everything else is
//! built on.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use lmdb_zero as lmdb;
use lru_cache::LruCache;

use kestrel_core::core::block::Block;
use kestrel_core::core::bloom::BloomFilter;
use kestrel_core::core::hash::{Hash, Hashed};
use kestrel_core::core::transaction::{OutPoint, Transaction};
use kestrel_core::global;
use kestrel_util::{Mutex, MutexGuard, RwLock, StopState, Workers};

use crate::coins::{Coin, CoinView};
use crate::deployments::{DeploymentFlags, Deployments};
use crate::error::{Error, ErrorKind, VerifyError};
use crate::pipe;
use crate::store::ChainStore;
use crate::types::{BlockStatus, ChainAdapter, ChainEntry, ChainState, Options, TxMeta};

/// Bound on the orphan pool size.
const MAX_ORPHANS: usize = 100;

/// Number of chain entries kept in the in-memory cache.
const ENTRY_CACHE_SIZE: usize = 4096;

#[derive(Clone)]
struct Orphan {
	block: Block,
	opts: Options,
}

struct OrphanBlockPool {
	// blocks indexed by their hash
	orphans: RwLock<HashMap<Hash, Orphan>>,
	// additional index of previous -> hash so we can efficiently
	// identify a child block (ex-orphan) after processing a block
	prev_idx: RwLock<HashMap<Hash, Hash>>,
}

impl OrphanBlockPool {
	fn new() -> OrphanBlockPool {
		OrphanBlockPool {
			orphans: RwLock::new(HashMap::new()),
			prev_idx: RwLock::new(HashMap::new()),
		}
	}

	fn len(&self) -> usize {
		self.orphans.read().len()
	}

	fn add(&self, orphan: Orphan) {
		{
			let mut orphans = self.orphans.write();
			let mut prev_idx = self.prev_idx.write();
			prev_idx.insert(orphan.block.header.prev_hash, orphan.block.hash());
			orphans.insert(orphan.block.hash(), orphan);
		}

		if self.len() > MAX_ORPHANS {
			// evict the furthest-out orphan, it is the least likely to
			// connect any time soon
			let max = {
				let orphans = self.orphans.read();
				orphans
					.values()
					.max_by_key(|x| x.block.header.timestamp)
					.map(|x| x.block.hash())
			};
			if let Some(hash) = max {
				self.remove(&hash);
			}
		}
	}

	fn remove(&self, hash: &Hash) -> Option<Orphan> {
		let mut orphans = self.orphans.write();
		let mut prev_idx = self.prev_idx.write();
		let orphan = orphans.remove(hash);
		if let Some(ref x) = orphan {
			prev_idx.remove(&x.block.header.prev_hash);
		}
		orphan
	}

	/// Get an orphan from the pool indexed by the hash of its parent.
	fn get_by_previous(&self, hash: &Hash) -> Option<Orphan> {
		let orphans = self.orphans.read();
		let prev_idx = self.prev_idx.read();
		prev_idx.get(hash).and_then(|h| orphans.get(h).cloned())
	}

	fn contains(&self, hash: &Hash) -> bool {
		self.orphans.read().contains_key(hash)
	}
}

/// Facade to the blockchain block processing pipeline and storage.
/// Provides the current view of the UTXO set according to the chain
/// state. Also maintains locking for the pipeline to avoid conflicting
/// processing.
pub struct Chain {
	store: Arc<ChainStore>,
	adapter: Arc<dyn ChainAdapter + Send + Sync>,

	head: RwLock<ChainState>,
	orphans: OrphanBlockPool,
	deployments: RwLock<Deployments>,
	entry_cache: Mutex<LruCache<Hash, ChainEntry>>,

	// process-wide serialization of add/reset/scan/template snapshots
	lock: Mutex<()>,

	workers: Arc<Workers>,
	stop_state: Arc<StopState>,
	checkpoints: Vec<(u64, Hash)>,
	genesis_hash: Hash,
}

impl Chain {
	/// Initializes the blockchain and returns a new Chain instance.
	/// Does a check on the current chain head to make sure it exists and
	/// creates one based on the genesis block if necessary.
	pub fn init(
		db_env: Arc<lmdb::Environment>,
		adapter: Arc<dyn ChainAdapter + Send + Sync>,
		genesis: Block,
		workers: Arc<Workers>,
		stop_state: Arc<StopState>,
		checkpoints: Vec<(u64, Hash)>,
	) -> Result<Chain, Error> {
		let store = ChainStore::new(db_env)?;
		let genesis_hash = genesis.hash();

		let state = match store.state() {
			Ok(state) => state,
			Err(kestrel_store::Error::NotFoundErr(_)) => {
				let entry = ChainEntry::for_genesis(genesis.header);
				let state = ChainState::from_genesis(&entry);
				let batch = store.batch()?;
				batch.save_block(&genesis)?;
				batch.save_entry(&entry)?;
				batch.save_height(0, &genesis_hash)?;
				batch.save_state(&state)?;
				batch.commit()?;
				info!(
					"chain: initialized from genesis {} at {}",
					genesis_hash, genesis.header.timestamp
				);
				state
			}
			Err(e) => return Err(e.into()),
		};

		info!(
			"chain: init at {} (height {})",
			state.tip, state.height
		);

		Ok(Chain {
			store: Arc::new(store),
			adapter,
			head: RwLock::new(state),
			orphans: OrphanBlockPool::new(),
			deployments: RwLock::new(Deployments::new()),
			entry_cache: Mutex::new(LruCache::new(ENTRY_CACHE_SIZE)),
			lock: Mutex::new(()),
			workers,
			stop_state,
			checkpoints,
			genesis_hash,
		})
	}

	/// Acquire the chain lock for an externally coordinated critical
	/// section (template assembly snapshots its inputs under it).
	pub fn lock(&self) -> MutexGuard<'_, ()> {
		self.lock.lock()
	}

	/// Attempt to add a new block to the chain. Returns whether it
	/// extended the best chain, caused a reorganization onto its branch
	/// or was stored on a side branch.
	pub fn process_block(&self, block: Block, opts: Options) -> Result<BlockStatus, Error> {
		let _lock = self.lock.lock();
		let status = self.process_block_single(&block, opts)?;

		// the new block may be the missing parent of stored orphans
		let mut parent_hash = block.hash();
		while let Some(orphan) = self.orphans.get_by_previous(&parent_hash) {
			self.orphans.remove(&orphan.block.hash());
			let orphan_hash = orphan.block.hash();
			match self.process_block_single(&orphan.block, orphan.opts) {
				Ok(_) => parent_hash = orphan_hash,
				Err(e) => {
					debug!("chain: orphan {} rejected: {}", orphan_hash, e);
					break;
				}
			}
		}
		Ok(status)
	}

	fn process_block_single(&self, block: &Block, opts: Options) -> Result<BlockStatus, Error> {
		let hash = block.hash();

		block
			.check_sanity()
			.map_err(|reason| VerifyError::new(&reason, 100))?;

		if self.store.is_invalid(&hash)? {
			return Err(VerifyError::new("duplicate-invalid", 100).into());
		}
		if self.store.get_entry(&hash)?.is_some() {
			return Err(ErrorKind::DuplicateBlock.into());
		}

		let prev = match self.get_entry(&block.header.prev_hash)? {
			Some(prev) => prev,
			None => {
				if self.orphans.contains(&hash) {
					return Err(ErrorKind::DuplicateBlock.into());
				}
				debug!(
					"chain: orphan {} (missing parent {}), # orphans {}",
					hash,
					block.header.prev_hash,
					self.orphans.len() + 1,
				);
				self.orphans.add(Orphan {
					block: block.clone(),
					opts,
				});
				return Err(ErrorKind::Orphan.into());
			}
		};

		if self.store.is_invalid(&prev.hash())? {
			let batch = self.store.batch()?;
			batch.mark_invalid(&hash)?;
			batch.commit()?;
			return Err(VerifyError::new("bad-prevblk", 100).into());
		}

		let entry = ChainEntry::from_prev(block.header, &prev);

		// a configured checkpoint pins the only acceptable hash at its height
		for (cp_height, cp_hash) in &self.checkpoints {
			if entry.height == *cp_height && hash != *cp_hash {
				return Err(ErrorKind::Checkpoint(*cp_height).into());
			}
		}

		pipe::check_header(block, &prev, &self.store, opts)?;

		let head = self.head.read().clone();
		if entry.header.prev_hash == head.tip {
			self.connect_block(block, &entry, &prev, &head)?;
			if !opts.contains(Options::SYNC) {
				debug!(
					"chain: connected {} at {} ({} txs)",
					hash,
					entry.height,
					block.txs.len()
				);
			}
			return Ok(BlockStatus::Connected);
		}

		// store the block on its side branch, then compare work
		let batch = self.store.batch()?;
		batch.save_block(block)?;
		batch.save_entry(&entry)?;
		batch.commit()?;
		self.cache_entry(entry.clone());

		if entry.chainwork > head.chainwork {
			warn!(
				"chain: reorganizing to {} at {} (work {} > {})",
				hash,
				entry.height,
				kestrel_util::to_hex(entry.chainwork.to_vec()),
				kestrel_util::to_hex(head.chainwork.to_vec()),
			);
			self.reorganize(&entry)?;
			Ok(BlockStatus::Reorganized)
		} else {
			debug!("chain: stored side-chain block {} at {}", hash, entry.height);
			Ok(BlockStatus::SideChain)
		}
	}

	// Connect a block that extends the current best tip. On a scored
	// verification failure the block hash is marked invalid.
	fn connect_block(
		&self,
		block: &Block,
		entry: &ChainEntry,
		prev: &ChainEntry,
		head: &ChainState,
	) -> Result<(), Error> {
		// the deployments guard must not outlive validation: event
		// subscribers may query deployment state from other threads
		let checked = {
			let mut deployments = self.deployments.write();
			pipe::check_block_context(
				block,
				entry,
				prev,
				&self.store,
				&self.workers,
				&mut deployments,
			)
		};
		let verification = match checked {
			Ok(v) => v,
			Err(e) => {
				if e.is_bad_data() {
					let batch = self.store.batch()?;
					batch.mark_invalid(&entry.hash())?;
					batch.commit()?;
				}
				return Err(e);
			}
		};

		let state = head.with_tip(entry);
		let batch = self.store.batch()?;
		pipe::commit_block(block, entry, verification.view, &state, &batch)?;
		batch.commit()?;

		*self.head.write() = state;
		self.cache_entry(entry.clone());
		self.adapter.block_connected(block, entry);
		Ok(())
	}

	// Disconnect the current tip block, restoring its spent coins from
	// the undo record. Returns the block for event emission.
	fn disconnect_tip(&self) -> Result<(Block, ChainEntry), Error> {
		let head = self.head.read().clone();
		let entry = self.require_entry(&head.tip)?;
		let block = self
			.store
			.get_block(&head.tip)?
			.ok_or_else(|| ErrorKind::Other(format!("missing block {}", head.tip)))?;
		let undo = self
			.store
			.get_undo(&head.tip)?
			.ok_or_else(|| ErrorKind::Other(format!("missing undo data {}", head.tip)))?;
		let prev = self.require_entry(&entry.header.prev_hash)?;

		let state = head.with_tip(&prev);
		let batch = self.store.batch()?;
		pipe::disconnect_block(&block, &entry, &undo, &state, &batch)?;
		batch.commit()?;

		*self.head.write() = state;
		Ok((block, entry))
	}

	// Switch the best chain over to the branch ending in `new_tip`.
	// Every disconnect is emitted before any connect. A failure while
	// connecting the new branch restores the original chain.
	fn reorganize(&self, new_tip: &ChainEntry) -> Result<(), Error> {
		// collect the new branch back to the fork point
		let mut branch = vec![];
		let mut cursor = new_tip.clone();
		while !self.is_main_chain(&cursor)? {
			branch.push(cursor.clone());
			cursor = self.require_entry(&cursor.header.prev_hash)?;
		}
		let fork_height = cursor.height;
		branch.reverse();

		// disconnect the old branch, newest first
		let mut disconnected = vec![];
		while self.head.read().height > fork_height {
			let (block, entry) = self.disconnect_tip()?;
			self.adapter.block_disconnected(&block, &entry);
			disconnected.push(block);
		}

		// connect the new branch, oldest first
		for entry in &branch {
			let block = self
				.store
				.get_block(&entry.hash())?
				.ok_or_else(|| ErrorKind::Other(format!("missing block {}", entry.hash())))?;
			let prev = self.require_entry(&entry.header.prev_hash)?;
			let head = self.head.read().clone();
			if let Err(e) = self.connect_block(&block, entry, &prev, &head) {
				error!(
					"chain: reorg aborted, block {} at {} failed: {}",
					entry.hash(),
					entry.height,
					e
				);
				self.restore_chain(fork_height, disconnected)?;
				return Err(e);
			}
		}
		Ok(())
	}

	// Roll back whatever part of a failed reorg went through and
	// reconnect the previously disconnected blocks.
	fn restore_chain(&self, fork_height: u64, disconnected: Vec<Block>) -> Result<(), Error> {
		while self.head.read().height > fork_height {
			let (block, entry) = self.disconnect_tip()?;
			self.adapter.block_disconnected(&block, &entry);
		}
		for block in disconnected.into_iter().rev() {
			let prev = self.require_entry(&block.header.prev_hash)?;
			let entry = ChainEntry::from_prev(block.header, &prev);
			let head = self.head.read().clone();
			self.connect_block(&block, &entry, &prev, &head)?;
		}
		Ok(())
	}

	/// Destructively roll the chain back to the given height. Emits
	/// `chain_reset` with the new tip, then one disconnect per removed
	/// block, newest first. Removed blocks are deleted for good.
	pub fn reset(&self, height: u64) -> Result<(), Error> {
		let _lock = self.lock.lock();

		let head = self.head.read().clone();
		if height > head.height {
			return Err(ErrorKind::Unfit(format!(
				"cannot reset forward to {} from {}",
				height, head.height
			))
			.into());
		}

		let target_hash = self
			.store
			.get_hash_by_height(height)?
			.ok_or_else(|| ErrorKind::Other(format!("no main chain block at {}", height)))?;
		let target = self.require_entry(&target_hash)?;

		warn!("chain: reset to {} at {}", target_hash, height);
		self.adapter.chain_reset(&target);

		while self.head.read().height > height {
			let (block, entry) = self.disconnect_tip()?;
			let batch = self.store.batch()?;
			batch.delete_block(&entry.hash())?;
			batch.delete_entry(&entry.hash())?;
			batch.commit()?;
			self.entry_cache.lock().remove(&entry.hash());
			self.adapter.block_disconnected(&block, &entry);
		}
		Ok(())
	}

	/// Replay main-chain blocks from `start_hash` (or genesis) against a
	/// bloom filter, invoking `iterator` once per block containing a
	/// matching transaction, in height order. Honors the stop state and
	/// an optional unix-seconds deadline.
	pub fn scan<F>(
		&self,
		start_hash: Option<Hash>,
		filter: &mut BloomFilter,
		deadline: Option<i64>,
		iterator: &mut F,
	) -> Result<(), Error>
	where
		F: FnMut(&ChainEntry, Vec<Transaction>) -> Result<(), Error>,
	{
		let _lock = self.lock.lock();

		let start_height = match start_hash {
			Some(hash) => {
				let entry = self
					.get_entry(&hash)?
					.ok_or_else(|| ErrorKind::Other(format!("unknown scan start {}", hash)))?;
				if !self.is_main_chain(&entry)? {
					return Err(
						ErrorKind::Unfit("scan start not on main chain".to_owned()).into()
					);
				}
				entry.height
			}
			None => 0,
		};

		let tip_height = self.head.read().height;
		for height in start_height..=tip_height {
			if self.stop_state.is_stopped() {
				return Err(ErrorKind::Cancelled.into());
			}
			if let Some(deadline) = deadline {
				if Utc::now().timestamp() > deadline {
					return Err(ErrorKind::TimedOut.into());
				}
			}

			let hash = self
				.store
				.get_hash_by_height(height)?
				.ok_or_else(|| ErrorKind::Other(format!("missing height index {}", height)))?;
			let entry = self.require_entry(&hash)?;
			let block = self
				.store
				.get_block(&hash)?
				.ok_or_else(|| ErrorKind::Other(format!("missing block {}", hash)))?;

			let matched: Vec<Transaction> = block
				.txs
				.iter()
				.filter(|tx| filter.matches_tx(tx))
				.cloned()
				.collect();
			if !matched.is_empty() {
				iterator(&entry, matched)?;
			}
		}
		Ok(())
	}

	/// Run the full contextual validation against a locally assembled
	/// block without committing anything. Used by the miner's preverify.
	pub fn verify_block_template(&self, block: &Block) -> Result<(), Error> {
		block
			.check_sanity()
			.map_err(|reason| VerifyError::new(&reason, 100))?;
		let prev = self.require_entry(&block.header.prev_hash)?;
		let entry = ChainEntry::from_prev(block.header, &prev);
		pipe::check_header(block, &prev, &self.store, Options::SKIP_POW)?;
		let mut deployments = self.deployments.write();
		pipe::check_block_context(
			block,
			&entry,
			&prev,
			&self.store,
			&self.workers,
			&mut deployments,
		)?;
		Ok(())
	}

	/// Check if hash is for a known orphan.
	pub fn is_orphan(&self, hash: &Hash) -> bool {
		self.orphans.contains(hash)
	}

	/// Current chain state record.
	pub fn head(&self) -> ChainState {
		self.head.read().clone()
	}

	/// Entry of the current best tip.
	pub fn head_entry(&self) -> Result<ChainEntry, Error> {
		let tip = self.head.read().tip;
		self.require_entry(&tip)
	}

	/// Hash of the genesis block we were initialized with.
	pub fn genesis_hash(&self) -> Hash {
		self.genesis_hash
	}

	/// Gets a chain entry by block hash.
	pub fn get_entry(&self, hash: &Hash) -> Result<Option<ChainEntry>, Error> {
		{
			let mut cache = self.entry_cache.lock();
			if let Some(entry) = cache.get_mut(hash) {
				return Ok(Some(entry.clone()));
			}
		}
		let entry = self.store.get_entry(hash)?;
		if let Some(ref entry) = entry {
			self.cache_entry(entry.clone());
		}
		Ok(entry)
	}

	/// Gets the main-chain entry at the provided height.
	pub fn get_entry_by_height(&self, height: u64) -> Result<Option<ChainEntry>, Error> {
		match self.store.get_hash_by_height(height)? {
			Some(hash) => self.get_entry(&hash),
			None => Ok(None),
		}
	}

	/// Gets a full block by hash.
	pub fn get_block(&self, hash: &Hash) -> Result<Option<Block>, Error> {
		self.store.get_block(hash)
	}

	/// Gets the main-chain block at the provided height.
	pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>, Error> {
		match self.store.get_hash_by_height(height)? {
			Some(hash) => self.get_block(&hash),
			None => Ok(None),
		}
	}

	/// Gets an unspent coin from the best chain's UTXO set.
	pub fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, Error> {
		self.store.get_coin(outpoint)
	}

	/// A coin view preloaded with every coin the given transaction
	/// spends (those still unspent in the best chain).
	pub fn get_spent_view(&self, tx: &Transaction) -> Result<CoinView, Error> {
		let mut view = CoinView::new();
		for input in &tx.inputs {
			view.read(&self.store, &input.prevout)?;
		}
		Ok(view)
	}

	/// A confirmed transaction with its confirmation context.
	pub fn get_tx_meta(&self, txid: &Hash) -> Result<Option<TxMeta>, Error> {
		self.store.get_tx_meta(txid)
	}

	/// Unspent outpoints indexed under a script key.
	pub fn get_coins_by_script(&self, script_key: &[u8; 32]) -> Result<Vec<OutPoint>, Error> {
		self.store.get_coins_by_script(script_key)
	}

	/// Transaction ids indexed under a script key.
	pub fn get_txids_by_script(&self, script_key: &[u8; 32]) -> Result<Vec<Hash>, Error> {
		self.store.get_txids_by_script(script_key)
	}

	/// Median-time-past of the given entry.
	pub fn median_time_past(&self, entry: &ChainEntry) -> Result<i64, Error> {
		self.store.median_time_past(entry)
	}

	/// The version a new block on `prev` should carry, per the active
	/// and pending deployments.
	pub fn compute_block_version(&self, prev: &ChainEntry) -> Result<i32, Error> {
		self.deployments
			.write()
			.block_version(&self.store, Some(prev))
	}

	/// The compact target required of a block extending `prev`.
	pub fn next_target(&self, prev: &ChainEntry) -> Result<u32, Error> {
		pipe::next_target(&self.store, prev)
	}

	/// The rule set for a block extending `prev`.
	pub fn get_deployments(&self, prev: &ChainEntry) -> Result<DeploymentFlags, Error> {
		self.deployments.write().flags(&self.store, Some(prev))
	}

	/// Whether the given entry lies on the current best chain.
	pub fn is_main_chain(&self, entry: &ChainEntry) -> Result<bool, Error> {
		Ok(self.store.get_hash_by_height(entry.height)? == Some(entry.hash()))
	}

	fn require_entry(&self, hash: &Hash) -> Result<ChainEntry, Error> {
		self.get_entry(hash)?
			.ok_or_else(|| ErrorKind::Other(format!("missing chain entry {}", hash)).into())
	}

	fn cache_entry(&self, entry: ChainEntry) {
		self.entry_cache.lock().insert(entry.hash(), entry);
	}
}
