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

//! Builds a block to mine: takes a consistent snapshot of the chain tip
//! and the pool, selects entries by package fee rate (optionally after
//! a coin-age priority phase) under the weight and sigops budgets, and
//! assembles a candidate block around a fresh coinbase. Purely
//! functional over the snapshot: neither the chain nor the pool is
//! mutated.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use chrono::Utc;

use kestrel_chain as chain;
use kestrel_core::consensus;
use kestrel_core::core::block::Block;
use kestrel_core::core::hash::{Hash, ZERO_HASH};
use kestrel_core::core::script::Script;
use kestrel_core::core::transaction::{OutPoint, Transaction, TxIn, TxOut};
use kestrel_core::core::Address;
use kestrel_core::global;
use kestrel_pool as pool;
use kestrel_pool::PoolEntry;
use kestrel_util::RwLock;

use crate::common::types::{Error, MinerConfig};

/// A candidate block along with its assembly metadata.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
	/// The assembled block, nonce not yet ground.
	pub block: Block,
	/// Height the block is valid at.
	pub height: u64,
	/// Sum of the included transaction fees.
	pub fees: u64,
	/// Accumulated sigops cost, coinbase reservation included.
	pub sigops: usize,
	/// Accumulated weight, coinbase reservation included.
	pub weight: usize,
	/// Compact target the proof of work must meet.
	pub bits: u32,
}

// heap key: package rate first, coin-age priority breaking ties
#[derive(PartialEq, Eq)]
struct RateKey {
	rate: u64,
	priority: u64,
	hash: Hash,
}

impl Ord for RateKey {
	fn cmp(&self, other: &RateKey) -> Ordering {
		self.rate
			.cmp(&other.rate)
			.then(self.priority.cmp(&other.priority))
			.then(self.hash.cmp(&other.hash))
	}
}

impl PartialOrd for RateKey {
	fn partial_cmp(&self, other: &RateKey) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

// priority-phase key: coin-age priority first
#[derive(PartialEq, Eq)]
struct PriorityKey {
	priority: u64,
	rate: u64,
	hash: Hash,
}

impl Ord for PriorityKey {
	fn cmp(&self, other: &PriorityKey) -> Ordering {
		self.priority
			.cmp(&other.priority)
			.then(self.rate.cmp(&other.rate))
			.then(self.hash.cmp(&other.hash))
	}
}

impl PartialOrd for PriorityKey {
	fn partial_cmp(&self, other: &PriorityKey) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

/// Assembles candidate blocks out of the current chain tip and pool
/// contents.
pub struct BlockAssembler {
	chain: Arc<chain::Chain>,
	tx_pool: Arc<RwLock<pool::TransactionPool>>,
	config: MinerConfig,
}

impl BlockAssembler {
	/// A new assembler over the given chain and pool handles.
	pub fn new(
		chain: Arc<chain::Chain>,
		tx_pool: Arc<RwLock<pool::TransactionPool>>,
		config: MinerConfig,
	) -> BlockAssembler {
		BlockAssembler {
			chain,
			tx_pool,
			config,
		}
	}

	/// Build a candidate block paying out to `payout`.
	pub fn build_template(&self, payout: &Address) -> Result<BlockTemplate, Error> {
		// snapshot everything under the chain lock so the tip, the
		// deployment flags and the pool contents agree with each other
		let (tip, bits, version, median_time, flags, entries) = {
			let _guard = self.chain.lock();
			let tip = self.chain.head_entry()?;
			let bits = self.chain.next_target(&tip)?;
			let version = match self.config.block_version {
				Some(version) => version,
				None => self.chain.compute_block_version(&tip)?,
			};
			let median_time = self.chain.median_time_past(&tip)?;
			let flags = self.chain.get_deployments(&tip)?;
			let entries = self.tx_pool.read().prepare_mineable();
			(tip, bits, version, median_time, flags, entries)
		};

		let height = tip.height + 1;
		let mut timestamp = Utc::now().timestamp();
		if timestamp <= median_time {
			timestamp = median_time + 1;
		}
		let locktime_cutoff = if flags.csv { median_time } else { timestamp };

		let selected = self.select_entries(entries, height, locktime_cutoff, flags.segwit);

		let mut fees: u64 = 0;
		let mut weight = self.config.reserved_weight;
		let mut sigops = self.config.reserved_sigops;
		let mut txs: Vec<Transaction> = vec![];
		for entry in &selected {
			fees += entry.fee;
			weight += entry.weight;
			sigops += entry.sigops;
			txs.push(entry.tx.clone());
		}

		let witness = flags.segwit && txs.iter().any(|tx| tx.has_witness());
		let reward = consensus::block_subsidy(height, global::halving_interval()) + fees;
		let coinbase = self.build_coinbase(height, reward, payout, witness);

		let mut block_txs = vec![coinbase];
		block_txs.extend(txs);
		let mut block = Block::with_txs(tip.hash(), block_txs);
		block.header.version = version;
		block.header.timestamp = timestamp as u32;
		block.header.bits = bits;

		if witness {
			// commit to the witness tree through the coinbase
			let nonce = ZERO_HASH;
			let commitment = block.witness_commitment(&nonce);
			block.txs[0]
				.outputs
				.push(TxOut::new(0, Block::witness_commitment_script(&commitment)));
			let (root, _) = block.merkle_root();
			block.header.merkle_root = root;
		}

		if self.config.preverify {
			// an invalid template is a bug in the assembler itself
			if let Err(e) = self.chain.verify_block_template(&block) {
				error!("assembled an invalid block template: {}", e);
				return Err(Error::Other(format!("invalid template: {}", e)));
			}
		}

		debug!(
			"built template at {} with {} txs, {} fees, weight {}/{}",
			height,
			block.txs.len() - 1,
			fees,
			weight,
			self.config.max_weight,
		);

		Ok(BlockTemplate {
			block,
			height,
			fees,
			sigops,
			weight,
			bits,
		})
	}

	// Dependency-aware selection: entries become eligible once all of
	// their in-pool parents have been included. An optional priority
	// phase admits high coin-age entries first; the fee phase orders by
	// the better of own and descendant package rate.
	fn select_entries(
		&self,
		entries: Vec<PoolEntry>,
		height: u64,
		locktime_cutoff: i64,
		segwit: bool,
	) -> Vec<PoolEntry> {
		let mut pool_map: HashMap<Hash, PoolEntry> = HashMap::new();
		let mut dep_count: HashMap<Hash, usize> = HashMap::new();
		for entry in entries {
			dep_count.insert(entry.hash, entry.dep_count());
			pool_map.insert(entry.hash, entry);
		}

		let mut priority_heap: BinaryHeap<PriorityKey> = BinaryHeap::new();
		let mut rate_heap: BinaryHeap<RateKey> = BinaryHeap::new();
		let mut priority_phase = self.config.priority_weight > 0;

		for (hash, count) in &dep_count {
			if *count == 0 {
				let entry = &pool_map[hash];
				if priority_phase {
					priority_heap.push(priority_key(entry));
				} else {
					rate_heap.push(rate_key(entry));
				}
			}
		}

		let mut selected: Vec<PoolEntry> = vec![];
		let mut weight = self.config.reserved_weight;
		let mut sigops = self.config.reserved_sigops;
		let mut priority_used = 0;

		loop {
			if priority_phase {
				let done = match priority_heap.peek() {
					None => true,
					Some(top) => {
						priority_used >= self.config.priority_weight
							|| (top.priority as f64) < self.config.priority_threshold
					}
				};
				if done {
					// fee-rate phase takes over; re-key the leftovers
					priority_phase = false;
					for key in priority_heap.drain() {
						rate_heap.push(rate_key(&pool_map[&key.hash]));
					}
					continue;
				}
			}

			let hash = if priority_phase {
				match priority_heap.pop() {
					Some(key) => key.hash,
					None => break,
				}
			} else {
				match rate_heap.pop() {
					Some(key) => key.hash,
					None => break,
				}
			};
			let entry = &pool_map[&hash];

			if !entry.tx.is_final(height, locktime_cutoff) {
				continue;
			}
			if entry.tx.has_witness() && !segwit {
				continue;
			}
			if weight + entry.weight > self.config.max_weight {
				continue;
			}
			if sigops + entry.sigops > self.config.max_sigops {
				continue;
			}

			weight += entry.weight;
			sigops += entry.sigops;
			if priority_phase {
				priority_used += entry.weight;
			}
			selected.push(entry.clone());

			// release children whose parents are now all included
			for child in &entry.children {
				if let Some(count) = dep_count.get_mut(child) {
					*count -= 1;
					if *count == 0 {
						let child_entry = &pool_map[child];
						if priority_phase {
							priority_heap.push(priority_key(child_entry));
						} else {
							rate_heap.push(rate_key(child_entry));
						}
					}
				}
			}
		}
		selected
	}

	fn build_coinbase(
		&self,
		height: u64,
		reward: u64,
		payout: &Address,
		witness: bool,
	) -> Transaction {
		let mut script_sig = Script::new();
		script_sig.push_int(height as i64);
		script_sig.push_data(self.config.coinbase_flags.as_bytes());

		let mut input = TxIn::new(OutPoint::null());
		input.script_sig = script_sig;
		if witness {
			input.witness = vec![vec![0u8; 32]];
		}

		let mut tx = Transaction::new();
		tx.inputs.push(input);
		tx.outputs.push(TxOut::new(reward, payout.to_script()));
		tx
	}
}

fn rate_key(entry: &PoolEntry) -> RateKey {
	RateKey {
		rate: entry.fee_rate().max(entry.descendant_rate()),
		priority: entry.priority as u64,
		hash: entry.hash,
	}
}

fn priority_key(entry: &PoolEntry) -> PriorityKey {
	PriorityKey {
		priority: entry.priority as u64,
		rate: entry.fee_rate().max(entry.descendant_rate()),
		hash: entry.hash,
	}
}
