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

//! Top-level TransactionPool type and methods. Admission validates
//! against the chain's UTXO view augmented with pooled outputs, keeps
//! ancestor/descendant aggregates consistent with the transitive
//! closure, and maintains the secondary indexes used for double-spend
//! detection, address queries, eviction and expiry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;

use kestrel_core::core::coin::Coin;
use kestrel_core::core::hash::Hash;
use kestrel_core::core::interpreter::{self, TxChecker};
use kestrel_core::core::transaction::{OutPoint, Transaction};
use kestrel_core::core::Block;
use kestrel_core::global;

use crate::fees::FeeEstimator;
use crate::types::{
	rate_for, BlockChain, ChainInfo, PoolAdapter, PoolConfig, PoolEntry, PoolError, RemovalReason,
	TxSource, FREE_PRIORITY_THRESHOLD,
};

/// The decaying eviction floor halves this often, in seconds.
const FLOOR_HALFLIFE: i64 = 12 * 60 * 60;

/// Maximum weight of a standard transaction.
const MAX_STANDARD_WEIGHT: usize = 400_000;

/// Maximum size of a standard unlocking script.
const MAX_STANDARD_SCRIPT_SIG: usize = 1650;

/// Outputs below this value are considered dust under standardness.
const DUST_THRESHOLD: u64 = 546;

/// The pool itself. All mutation happens under the owner's write lock;
/// reads (snapshots, template assembly) take the read side.
pub struct TransactionPool {
	/// Pool configuration.
	pub config: PoolConfig,

	entries: HashMap<Hash, PoolEntry>,
	spents: HashMap<OutPoint, Hash>,
	by_script: HashMap<[u8; 32], HashSet<Hash>>,
	script_refs: HashMap<Hash, Vec<[u8; 32]>>,

	total_size: usize,
	rate_floor: u64,
	floor_time: i64,

	estimator: FeeEstimator,

	blockchain: Arc<dyn BlockChain>,
	adapter: Arc<dyn PoolAdapter>,
}

impl TransactionPool {
	/// Create a new transaction pool.
	pub fn new(
		config: PoolConfig,
		blockchain: Arc<dyn BlockChain>,
		adapter: Arc<dyn PoolAdapter>,
	) -> TransactionPool {
		TransactionPool {
			config,
			entries: HashMap::new(),
			spents: HashMap::new(),
			by_script: HashMap::new(),
			script_refs: HashMap::new(),
			total_size: 0,
			rate_floor: 0,
			floor_time: 0,
			estimator: FeeEstimator::new(),
			blockchain,
			adapter,
		}
	}

	/// Number of transactions in the pool.
	pub fn size(&self) -> usize {
		self.entries.len()
	}

	/// Total bytes of pooled transactions.
	pub fn total_size(&self) -> usize {
		self.total_size
	}

	/// Look up an entry by tx hash.
	pub fn get_entry(&self, hash: &Hash) -> Option<&PoolEntry> {
		self.entries.get(hash)
	}

	/// Whether the pool holds the given tx.
	pub fn contains(&self, hash: &Hash) -> bool {
		self.entries.contains_key(hash)
	}

	/// Whether the outpoint is spent by a pooled transaction.
	pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
		self.spents.contains_key(outpoint)
	}

	/// An unspent output created by a pooled transaction, materialized
	/// as a coin. Unconfirmed coins report the next block height.
	pub fn get_coin(&self, outpoint: &OutPoint) -> Option<Coin> {
		if self.spents.contains_key(outpoint) {
			return None;
		}
		let entry = self.entries.get(&outpoint.hash)?;
		let output = entry.tx.outputs.get(outpoint.index as usize)?;
		if output.script_pubkey.is_op_return() {
			return None;
		}
		Some(Coin {
			value: output.value,
			script_pubkey: output.script_pubkey.clone(),
			height: entry.height + 1,
			coinbase: false,
		})
	}

	/// Pool entries touching the given script key (outputs paying to it
	/// or inputs spending from it).
	pub fn get_hashes_by_script(&self, script_key: &[u8; 32]) -> Vec<Hash> {
		self.by_script
			.get(script_key)
			.map(|set| set.iter().cloned().collect())
			.unwrap_or_default()
	}

	/// Ordered snapshot of the pool: hashes by descendant fee rate,
	/// best first, arrival time breaking ties.
	pub fn get_snapshot(&self) -> Vec<Hash> {
		let mut hashes: Vec<&PoolEntry> = self.entries.values().collect();
		hashes.sort_by(|a, b| {
			b.descendant_rate()
				.cmp(&a.descendant_rate())
				.then(a.time.cmp(&b.time))
		});
		hashes.iter().map(|e| e.hash).collect()
	}

	/// Clone of every entry, for template assembly over a consistent
	/// read snapshot.
	pub fn prepare_mineable(&self) -> Vec<PoolEntry> {
		self.entries.values().cloned().collect()
	}

	/// The fee estimator fed by this pool's confirmations.
	pub fn estimator(&self) -> &FeeEstimator {
		&self.estimator
	}

	/// Replace the estimator wholesale, used when restoring a
	/// checkpoint at startup.
	pub fn set_estimator(&mut self, estimator: FeeEstimator) {
		self.estimator = estimator;
	}

	/// Estimate the fee rate to confirm within `target` blocks.
	pub fn estimate_fee(&self, target: usize) -> u64 {
		self.estimator
			.estimate_fee(target)
			.max(self.config.min_relay_rate)
	}

	/// The effective minimum relay rate: the configured floor or the
	/// decaying remnant of the last eviction, whichever is higher.
	pub fn min_rate(&self) -> u64 {
		if self.rate_floor == 0 {
			return self.config.min_relay_rate;
		}
		let elapsed = Utc::now().timestamp() - self.floor_time;
		let halvings = (elapsed / FLOOR_HALFLIFE).max(0) as u32;
		let decayed = if halvings >= 64 {
			0
		} else {
			self.rate_floor >> halvings
		};
		decayed.max(self.config.min_relay_rate)
	}

	/// Attempt to add a transaction to the pool. On success the entry is
	/// indexed, linked to its in-pool relatives and announced through
	/// the adapter. Conflicts are evaluated before missing parents are
	/// reported, so a double spend never masquerades as an orphan.
	pub fn add_to_pool(&mut self, src: TxSource, tx: Transaction) -> Result<(), PoolError> {
		let hash = tx.hash();

		tx.check_sanity().map_err(PoolError::Verify)?;
		if tx.is_coinbase() {
			return Err(PoolError::Verify("coinbase".to_owned()));
		}
		if self.entries.contains_key(&hash) {
			return Err(PoolError::Duplicate(hash));
		}
		if self.blockchain.is_confirmed(&hash)? {
			return Err(PoolError::Duplicate(hash));
		}

		let info = self.blockchain.chain_info()?;

		if self.config.require_standard {
			self.check_standard(&tx, &info)?;
		}

		// Resolve every input against the pool, then the chain. Inputs
		// already spent in the pool become the conflict set.
		let mut conflicts: HashSet<Hash> = HashSet::new();
		let mut missing: Vec<Hash> = vec![];
		let mut parents: HashSet<Hash> = HashSet::new();
		let mut spent_coins: HashMap<OutPoint, Coin> = HashMap::new();

		for input in &tx.inputs {
			if let Some(spender) = self.spents.get(&input.prevout) {
				conflicts.insert(*spender);
				continue;
			}
			if let Some(coin) = self.get_coin(&input.prevout) {
				parents.insert(input.prevout.hash);
				spent_coins.insert(input.prevout, coin);
				continue;
			}
			match self.blockchain.get_coin(&input.prevout)? {
				Some(coin) => {
					spent_coins.insert(input.prevout, coin);
				}
				None => {
					if self.blockchain.is_confirmed(&input.prevout.hash)? {
						return Err(PoolError::Verify(
							"bad-txns-inputs-missingorspent".to_owned(),
						));
					}
					missing.push(input.prevout.hash);
				}
			}
		}

		if !conflicts.is_empty() && !self.config.replace_by_fee {
			let outpoint = tx
				.inputs
				.iter()
				.find(|i| self.spents.contains_key(&i.prevout))
				.map(|i| i.prevout)
				.unwrap_or_else(OutPoint::null);
			return Err(PoolError::DoubleSpend(outpoint));
		}
		if !missing.is_empty() {
			missing.sort();
			missing.dedup();
			return Err(PoolError::Orphan(missing));
		}

		// economic context
		let mut input_value: u64 = 0;
		let mut priority: f64 = 0.0;
		let next_height = info.height + 1;
		for input in &tx.inputs {
			// a conflict-set input's coin is locked up by the
			// conflicting entry, resolve it through the chain
			if !spent_coins.contains_key(&input.prevout) {
				match self.blockchain.get_coin(&input.prevout)? {
					Some(coin) => {
						spent_coins.insert(input.prevout, coin);
					}
					None => {
						return Err(PoolError::Verify(
							"bad-txns-inputs-missingorspent".to_owned(),
						));
					}
				}
			}
			let coin = &spent_coins[&input.prevout];
			if coin.coinbase && next_height < coin.height + global::coinbase_maturity() {
				return Err(PoolError::Verify(
					"bad-txns-premature-spend-of-coinbase".to_owned(),
				));
			}
			input_value = input_value
				.checked_add(coin.value)
				.ok_or_else(|| PoolError::Verify("bad-txns-inputvalues-outofrange".to_owned()))?;
			let age = next_height.saturating_sub(coin.height);
			priority += coin.value as f64 * age as f64;
		}

		let output_value = tx.output_value();
		if output_value > input_value {
			return Err(PoolError::Verify("bad-txns-in-belowout".to_owned()));
		}
		let fee = input_value - output_value;
		let weight = tx.weight();
		let size = tx.total_size();
		let vsize = ((weight + 3) / 4).max(1);
		priority /= vsize as f64;
		let rate = rate_for(fee, weight);

		if !tx.is_final(next_height, info.median_time) {
			return Err(PoolError::Policy("non-final".to_owned()));
		}
		if info.csv && tx.version >= 2 {
			self.check_sequence_locks(&tx, &spent_coins, &info)?;
		}
		if !info.segwit && tx.has_witness() {
			return Err(PoolError::Policy("no-witness-yet".to_owned()));
		}

		let minimum = self.min_rate();
		if rate < minimum && priority < FREE_PRIORITY_THRESHOLD {
			return Err(PoolError::LowFee { rate, minimum });
		}

		// replacement: strictly better rate than the combined conflicts
		// and absolute fee covering everything evicted plus the bump
		if !conflicts.is_empty() {
			self.check_replacement(&conflicts, fee, weight, vsize)?;
		}

		// in-pool package limits, computed before linking anything
		let ancestors = self.ancestors_of(&parents);
		if ancestors.len() + 1 > self.config.max_ancestors {
			return Err(PoolError::Policy("too-long-mempool-chain".to_owned()));
		}
		for ancestor in &ancestors {
			if self.entries[ancestor].descendant_count + 1 > self.config.max_descendants {
				return Err(PoolError::Policy("too-many-descendants".to_owned()));
			}
		}

		// script validation, within the admission budget
		if tx.inputs.len() > self.config.max_script_checks {
			return Err(PoolError::Timeout);
		}
		for (index, input) in tx.inputs.iter().enumerate() {
			let coin = &spent_coins[&input.prevout];
			let checker = TxChecker::new(&tx, index, coin.value);
			interpreter::verify(
				&input.script_sig,
				&coin.script_pubkey,
				&input.witness,
				&checker,
				info.verify_flags,
			)
			.map_err(|e| PoolError::Verify(format!("input {}: {}", index, e)))?;
		}

		let sigops = tx.sigops_cost(
			&|outpoint| spent_coins.get(outpoint).map(|c| c.script_pubkey.clone()),
			info.verify_flags,
		);

		// all checks passed: evict any replaced conflicts, then insert
		if !conflicts.is_empty() {
			for conflict in conflicts.iter() {
				self.remove_recursive(conflict, RemovalReason::Replaced);
			}
			self.recompute_aggregates();
		}

		let mut entry = PoolEntry {
			tx,
			hash,
			fee,
			weight,
			size,
			sigops,
			height: info.height,
			time: Utc::now().timestamp(),
			priority,
			parents: parents.clone(),
			children: HashSet::new(),
			ancestor_fee: fee,
			ancestor_weight: weight,
			ancestor_sigops: sigops,
			ancestor_count: 1,
			descendant_fee: fee,
			descendant_weight: weight,
			descendant_count: 1,
		};

		// fold ancestors into the entry and the entry into every
		// ancestor's descendant aggregates
		for ancestor in &ancestors {
			let anc = self.entries.get_mut(ancestor).unwrap();
			anc.descendant_fee += fee;
			anc.descendant_weight += weight;
			anc.descendant_count += 1;
			entry.ancestor_fee += anc.fee;
			entry.ancestor_weight += anc.weight;
			entry.ancestor_sigops += anc.sigops;
			entry.ancestor_count += 1;
		}
		for parent in &parents {
			self.entries.get_mut(parent).unwrap().children.insert(hash);
		}

		let mut script_keys = vec![];
		for output in &entry.tx.outputs {
			script_keys.push(output.script_pubkey.index_key());
		}
		for input in &entry.tx.inputs {
			self.spents.insert(input.prevout, hash);
			if let Some(coin) = spent_coins.get(&input.prevout) {
				script_keys.push(coin.script_pubkey.index_key());
			}
		}
		for key in &script_keys {
			self.by_script.entry(*key).or_default().insert(hash);
		}
		self.script_refs.insert(hash, script_keys);

		self.total_size += entry.size;
		debug!(
			"pool: accepted {} from {} (fee {}, rate {}, {} in pool)",
			hash,
			src.debug_name,
			fee,
			rate,
			self.entries.len() + 1,
		);
		self.adapter.tx_accepted(&entry);
		self.entries.insert(hash, entry);

		self.limit_size();
		Ok(())
	}

	/// Remove an entry (and everything depending on it) on request.
	pub fn remove_entry(&mut self, hash: &Hash) -> Option<PoolEntry> {
		let entry = self.entries.get(hash).cloned();
		if entry.is_some() {
			self.remove_recursive(hash, RemovalReason::Manual);
			self.recompute_aggregates();
		}
		entry
	}

	/// Reconcile the pool with a freshly connected block: confirmed
	/// transactions leave the pool, transactions in conflict with the
	/// block leave with their descendants, expired and newly non-final
	/// transactions are dropped, and the fee estimator is fed.
	pub fn reconcile_block(&mut self, block: &Block, height: u64) -> Result<(), PoolError> {
		let mut confirmed = vec![];
		for tx in block.txs.iter().skip(1) {
			let hash = tx.hash();
			if self.entries.contains_key(&hash) {
				if let Some(entry) = self.remove_single(&hash, RemovalReason::Confirmed) {
					confirmed.push(entry);
				}
			}
			// anything else spending the same outpoints is now invalid
			for input in &tx.inputs {
				if let Some(spender) = self.spents.get(&input.prevout).cloned() {
					self.remove_recursive(&spender, RemovalReason::BlockConflict);
				}
			}
		}

		self.estimator.process_block(height, confirmed.iter());

		// expiry and finality under the new tip
		let info = self.blockchain.chain_info()?;
		let cutoff = Utc::now().timestamp() - self.config.expiry_secs;
		let stale: Vec<Hash> = self
			.entries
			.values()
			.filter(|e| e.time < cutoff)
			.map(|e| e.hash)
			.collect();
		for hash in stale {
			self.remove_recursive(&hash, RemovalReason::Expired);
		}
		let non_final: Vec<Hash> = self
			.entries
			.values()
			.filter(|e| !e.tx.is_final(info.height + 1, info.median_time))
			.map(|e| e.hash)
			.collect();
		for hash in non_final {
			self.remove_recursive(&hash, RemovalReason::Invalid);
		}

		self.recompute_aggregates();
		Ok(())
	}

	/// Return the transactions of a disconnected block to the pool,
	/// subject to the normal admission path under the new (older) tip.
	pub fn reinstate_block(&mut self, block: &Block) {
		for tx in block.txs.iter().skip(1) {
			let hash = tx.hash();
			if let Err(e) = self.add_to_pool(TxSource::internal(), tx.clone()) {
				debug!("pool: could not reinstate {}: {}", hash, e);
			}
		}
	}

	// Size-budget enforcement: repeatedly drop the cheapest package
	// root (by descendant rate) with its descendants, remembering the
	// evicted rate as a decaying admission floor.
	fn limit_size(&mut self) {
		let mut evicted = false;
		while self.total_size > self.config.max_size {
			let victim = self
				.entries
				.values()
				.filter(|e| e.parents.is_empty())
				.min_by(|a, b| {
					a.descendant_rate()
						.cmp(&b.descendant_rate())
						.then(b.time.cmp(&a.time))
				})
				.map(|e| (e.hash, e.descendant_rate()));
			let (hash, rate) = match victim {
				Some(v) => v,
				None => break,
			};
			self.rate_floor = self
				.rate_floor
				.max(rate.saturating_add(self.config.relay_bump_rate));
			self.floor_time = Utc::now().timestamp();
			info!(
				"pool: evicting {} and descendants (rate {}), floor now {}",
				hash, rate, self.rate_floor
			);
			self.remove_recursive(&hash, RemovalReason::Evicted);
			evicted = true;
		}
		if evicted {
			self.recompute_aggregates();
		}
	}

	// Remove an entry together with its descendant set.
	fn remove_recursive(&mut self, hash: &Hash, reason: RemovalReason) {
		let mut to_remove = self.descendants_of(hash);
		to_remove.push(*hash);
		// children before parents so each removal unlinks cleanly
		to_remove.reverse();
		for h in to_remove {
			self.remove_single(&h, reason);
		}
	}

	// Unlink and drop a single entry, leaving relatives in place.
	fn remove_single(&mut self, hash: &Hash, reason: RemovalReason) -> Option<PoolEntry> {
		let entry = self.entries.remove(hash)?;

		for parent in &entry.parents {
			if let Some(p) = self.entries.get_mut(parent) {
				p.children.remove(hash);
			}
		}
		for child in &entry.children {
			if let Some(c) = self.entries.get_mut(child) {
				c.parents.remove(hash);
			}
		}
		for input in &entry.tx.inputs {
			if self.spents.get(&input.prevout) == Some(hash) {
				self.spents.remove(&input.prevout);
			}
		}
		if let Some(keys) = self.script_refs.remove(hash) {
			for key in keys {
				if let Some(set) = self.by_script.get_mut(&key) {
					set.remove(hash);
					if set.is_empty() {
						self.by_script.remove(&key);
					}
				}
			}
		}
		self.total_size -= entry.size;
		self.adapter.tx_removed(&entry, reason);
		Some(entry)
	}

	// The full in-pool ancestor closure reachable from a set of direct
	// parents.
	fn ancestors_of(&self, parents: &HashSet<Hash>) -> HashSet<Hash> {
		let mut out = HashSet::new();
		let mut queue: Vec<Hash> = parents.iter().cloned().collect();
		while let Some(hash) = queue.pop() {
			if !out.insert(hash) {
				continue;
			}
			if let Some(entry) = self.entries.get(&hash) {
				queue.extend(entry.parents.iter().cloned());
			}
		}
		out
	}

	// The descendant closure of an entry, in breadth-first order,
	// excluding the entry itself.
	fn descendants_of(&self, hash: &Hash) -> Vec<Hash> {
		let mut seen = HashSet::new();
		let mut order = vec![];
		let mut queue: Vec<Hash> = match self.entries.get(hash) {
			Some(entry) => entry.children.iter().cloned().collect(),
			None => return order,
		};
		while let Some(h) = queue.pop() {
			if !seen.insert(h) {
				continue;
			}
			order.push(h);
			if let Some(entry) = self.entries.get(&h) {
				queue.extend(entry.children.iter().cloned());
			}
		}
		order
	}

	// Recompute ancestor/descendant aggregates for every entry from the
	// link structure. Called after any removal batch; insertion updates
	// incrementally.
	fn recompute_aggregates(&mut self) {
		let hashes: Vec<Hash> = self.entries.keys().cloned().collect();
		for hash in &hashes {
			let entry = self.entries.get_mut(hash).unwrap();
			entry.ancestor_fee = entry.fee;
			entry.ancestor_weight = entry.weight;
			entry.ancestor_sigops = entry.sigops;
			entry.ancestor_count = 1;
			entry.descendant_fee = entry.fee;
			entry.descendant_weight = entry.weight;
			entry.descendant_count = 1;
		}
		for hash in &hashes {
			let (parents, fee, weight, sigops) = {
				let e = &self.entries[hash];
				(e.parents.clone(), e.fee, e.weight, e.sigops)
			};
			let ancestors = self.ancestors_of(&parents);
			for ancestor in &ancestors {
				let anc = self.entries.get_mut(ancestor).unwrap();
				anc.descendant_fee += fee;
				anc.descendant_weight += weight;
				anc.descendant_count += 1;
			}
			let mut anc_fee = fee;
			let mut anc_weight = weight;
			let mut anc_sigops = sigops;
			let mut anc_count = 1;
			for ancestor in &ancestors {
				let anc = &self.entries[ancestor];
				anc_fee += anc.fee;
				anc_weight += anc.weight;
				anc_sigops += anc.sigops;
				anc_count += 1;
			}
			let entry = self.entries.get_mut(hash).unwrap();
			entry.ancestor_fee = anc_fee;
			entry.ancestor_weight = anc_weight;
			entry.ancestor_sigops = anc_sigops;
			entry.ancestor_count = anc_count;
		}
	}

	// BIP125-style replacement evaluation against the direct conflicts
	// and everything that would be evicted with them.
	fn check_replacement(
		&self,
		conflicts: &HashSet<Hash>,
		fee: u64,
		weight: usize,
		vsize: usize,
	) -> Result<(), PoolError> {
		let mut evicted_fee: u64 = 0;
		let mut direct_fee: u64 = 0;
		let mut direct_weight: usize = 0;
		let mut evicted: HashSet<Hash> = HashSet::new();
		for conflict in conflicts {
			let entry = self
				.entries
				.get(conflict)
				.ok_or_else(|| PoolError::Other("conflict entry missing".to_owned()))?;
			direct_fee += entry.fee;
			direct_weight += entry.weight;
			if evicted.insert(*conflict) {
				evicted_fee += entry.fee;
			}
			for desc in self.descendants_of(conflict) {
				if evicted.insert(desc) {
					evicted_fee += self.entries[&desc].fee;
				}
			}
		}

		let new_rate = rate_for(fee, weight);
		let old_rate = rate_for(direct_fee, direct_weight);
		if new_rate <= old_rate {
			return Err(PoolError::LowFee {
				rate: new_rate,
				minimum: old_rate + 1,
			});
		}
		let bump = self.config.relay_bump_rate * vsize as u64 / 1000;
		if fee < evicted_fee.saturating_add(bump) {
			return Err(PoolError::LowFee {
				rate: new_rate,
				minimum: rate_for(evicted_fee + bump, weight),
			});
		}
		Ok(())
	}

	fn check_sequence_locks(
		&self,
		tx: &Transaction,
		spent_coins: &HashMap<OutPoint, Coin>,
		info: &ChainInfo,
	) -> Result<(), PoolError> {
		use kestrel_core::consensus::{
			SEQUENCE_DISABLE_FLAG, SEQUENCE_GRANULARITY, SEQUENCE_MASK, SEQUENCE_TYPE_FLAG,
		};
		let next_height = info.height + 1;
		for input in &tx.inputs {
			if input.sequence & SEQUENCE_DISABLE_FLAG != 0 {
				continue;
			}
			let coin = match spent_coins.get(&input.prevout) {
				Some(coin) => coin,
				None => continue,
			};
			let locked = (input.sequence & SEQUENCE_MASK) as u64;
			if input.sequence & SEQUENCE_TYPE_FLAG != 0 {
				let base_time = if coin.height > info.height {
					// unconfirmed parent, the clock hasn't started
					info.median_time
				} else {
					self.blockchain
						.median_time_at(coin.height.saturating_sub(1))?
				};
				if base_time + ((locked << SEQUENCE_GRANULARITY) as i64) > info.median_time {
					return Err(PoolError::Policy("non-BIP68-final".to_owned()));
				}
			} else if coin.height + locked > next_height {
				return Err(PoolError::Policy("non-BIP68-final".to_owned()));
			}
		}
		Ok(())
	}

	fn check_standard(&self, tx: &Transaction, info: &ChainInfo) -> Result<(), PoolError> {
		if tx.version < 1 || tx.version > 2 {
			return Err(PoolError::Policy("version".to_owned()));
		}
		if tx.weight() > MAX_STANDARD_WEIGHT {
			return Err(PoolError::Policy("tx-size".to_owned()));
		}
		for input in &tx.inputs {
			if input.script_sig.len() > MAX_STANDARD_SCRIPT_SIG {
				return Err(PoolError::Policy("scriptsig-size".to_owned()));
			}
			if !input.script_sig.is_push_only() {
				return Err(PoolError::Policy("scriptsig-not-pushonly".to_owned()));
			}
		}
		let mut data_outputs = 0;
		for output in &tx.outputs {
			let script = &output.script_pubkey;
			if script.is_op_return() {
				data_outputs += 1;
				if script.len() > 83 {
					return Err(PoolError::Policy("data-carrier-size".to_owned()));
				}
				continue;
			}
			let standard = script.is_p2pkh()
				|| script.is_p2sh()
				|| (info.segwit && script.witness_program().is_some());
			if !standard {
				return Err(PoolError::Policy("scriptpubkey".to_owned()));
			}
			if output.value < DUST_THRESHOLD {
				return Err(PoolError::Policy("dust".to_owned()));
			}
		}
		if data_outputs > 1 {
			return Err(PoolError::Policy("multi-op-return".to_owned()));
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn rate_is_per_kilo_vsize() {
		// 400 weight units = 100 vbytes; 1000 sats over 100 vbytes is
		// 10000 sats per kvB
		assert_eq!(rate_for(1000, 400), 10_000);
		assert_eq!(rate_for(0, 400), 0);
		// rounding stays sane on tiny weights
		assert_eq!(rate_for(1000, 1), 1_000_000);
	}
}
