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

//! Base types for the transaction pool implementation.

use std::collections::HashSet;

use kestrel_core::core::coin::Coin;
use kestrel_core::core::hash::Hash;
use kestrel_core::core::script::VerifyFlags;
use kestrel_core::core::transaction::{OutPoint, Transaction};

/// Transactions paying less than this rate per kilo-vsize but carrying
/// enough coin-age priority are still relayed.
pub const FREE_PRIORITY_THRESHOLD: f64 = 57_600_000.0;

/// Configuration for the transaction pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
	/// Maximum total size of pooled transactions, in bytes.
	pub max_size: usize,
	/// Minimum relay fee rate, in atomic units per kilo-vsize.
	pub min_relay_rate: u64,
	/// Rate added on top of replaced fees for a replacement to qualify,
	/// per kilo-vsize.
	pub relay_bump_rate: u64,
	/// Whether conflicting transactions may replace each other by fee.
	pub replace_by_fee: bool,
	/// Maximum in-pool ancestor set size, the new transaction included.
	pub max_ancestors: usize,
	/// Maximum in-pool descendant set size of any unconfirmed parent.
	pub max_descendants: usize,
	/// Entries older than this many seconds expire at the next block.
	pub expiry_secs: i64,
	/// Enforce standardness policy on top of consensus checks.
	pub require_standard: bool,
	/// Admission budget: reject transactions needing more script checks.
	pub max_script_checks: usize,
}

impl Default for PoolConfig {
	fn default() -> PoolConfig {
		PoolConfig {
			max_size: 100 * 1024 * 1024,
			min_relay_rate: 1000,
			relay_bump_rate: 1000,
			replace_by_fee: false,
			max_ancestors: 25,
			max_descendants: 25,
			expiry_secs: 72 * 60 * 60,
			require_standard: true,
			max_script_checks: 2500,
		}
	}
}

/// Where we heard about a tx from.
#[derive(Debug, Clone)]
pub struct TxSource {
	/// Human-readable name used for logging and errors.
	pub debug_name: String,
	/// Unique identifier used to distinguish this peer from others.
	pub identifier: String,
}

impl TxSource {
	/// A source for transactions the node generated or re-admitted
	/// itself.
	pub fn internal() -> TxSource {
		TxSource {
			debug_name: "internal".to_owned(),
			identifier: "0.0.0.0".to_owned(),
		}
	}
}

/// A transaction in the pool with all of its computed context: fees,
/// sizes, the in-pool dependency links and the aggregates over its
/// ancestor and descendant sets.
#[derive(Debug, Clone)]
pub struct PoolEntry {
	/// The transaction itself.
	pub tx: Transaction,
	/// Cached tx hash.
	pub hash: Hash,
	/// Absolute fee paid, in atomic units.
	pub fee: u64,
	/// Consensus weight.
	pub weight: usize,
	/// Full serialized size in bytes (pool budget accounting).
	pub size: usize,
	/// Signature operation cost.
	pub sigops: usize,
	/// Chain height when the entry was admitted.
	pub height: u64,
	/// Arrival time, unix seconds.
	pub time: i64,
	/// Coin-age priority at admission: sum of value times input age,
	/// per vsize.
	pub priority: f64,
	/// In-pool parents still unconfirmed.
	pub parents: HashSet<Hash>,
	/// In-pool children spending this entry's outputs.
	pub children: HashSet<Hash>,
	/// Fee of the entry plus all in-pool ancestors.
	pub ancestor_fee: u64,
	/// Weight of the entry plus all in-pool ancestors.
	pub ancestor_weight: usize,
	/// Sigops of the entry plus all in-pool ancestors.
	pub ancestor_sigops: usize,
	/// Number of in-pool ancestors, the entry included.
	pub ancestor_count: usize,
	/// Fee of the entry plus all in-pool descendants.
	pub descendant_fee: u64,
	/// Weight of the entry plus all in-pool descendants.
	pub descendant_weight: usize,
	/// Number of in-pool descendants, the entry included.
	pub descendant_count: usize,
}

impl PoolEntry {
	/// Virtual size derived from the weight, rounded up.
	pub fn vsize(&self) -> usize {
		(self.weight + 3) / 4
	}

	/// Own fee rate, atomic units per kilo-vsize.
	pub fn fee_rate(&self) -> u64 {
		rate_for(self.fee, self.weight)
	}

	/// Fee rate of the entry's descendant package.
	pub fn descendant_rate(&self) -> u64 {
		rate_for(self.descendant_fee, self.descendant_weight)
	}

	/// Fee rate of the entry's ancestor package.
	pub fn ancestor_rate(&self) -> u64 {
		rate_for(self.ancestor_fee, self.ancestor_weight)
	}

	/// Number of still-unconfirmed in-pool parents.
	pub fn dep_count(&self) -> usize {
		self.parents.len()
	}
}

/// Fee rate in atomic units per kilo-vsize for the given fee and weight.
pub fn rate_for(fee: u64, weight: usize) -> u64 {
	let vsize = ((weight + 3) / 4).max(1);
	fee.saturating_mul(1000) / vsize as u64
}

/// Why an entry left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
	/// Confirmed in a connected block.
	Confirmed,
	/// Conflicted with a connected block.
	BlockConflict,
	/// Replaced by a higher-paying conflicting transaction.
	Replaced,
	/// Evicted to keep the pool under its size budget.
	Evicted,
	/// Sat unconfirmed past the expiry time.
	Expired,
	/// Became invalid under the new tip.
	Invalid,
	/// Removed on explicit request.
	Manual,
}

/// Pool admission and maintenance failures.
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum PoolError {
	/// The transaction violates local policy (never a consensus verdict)
	#[fail(display = "transaction violates policy: {}", _0)]
	Policy(String),
	/// The transaction fails consensus validation
	#[fail(display = "invalid transaction: {}", _0)]
	Verify(String),
	/// An outpoint is already spent by another pooled transaction
	#[fail(display = "double spend of {}", _0)]
	DoubleSpend(OutPoint),
	/// Inputs reference transactions we know nothing about
	#[fail(display = "missing parents: {:?}", _0)]
	Orphan(Vec<Hash>),
	/// Already in the pool
	#[fail(display = "duplicate transaction {}", _0)]
	Duplicate(Hash),
	/// Fee rate below the effective minimum
	#[fail(display = "fee rate {} below minimum {}", rate, minimum)]
	LowFee {
		/// Offered rate.
		rate: u64,
		/// Current effective minimum.
		minimum: u64,
	},
	/// Admission exceeded its verification budget
	#[fail(display = "verification budget exhausted")]
	Timeout,
	/// The chain could not answer a query
	#[fail(display = "chain error: {}", _0)]
	Chain(String),
	/// Anything else
	#[fail(display = "pool error: {}", _0)]
	Other(String),
}

/// A snapshot of the chain facts admission needs, taken through the
/// capability handle in one call so it is internally consistent.
#[derive(Debug, Clone)]
pub struct ChainInfo {
	/// Best tip hash.
	pub tip: Hash,
	/// Best tip height.
	pub height: u64,
	/// Median-time-past of the tip.
	pub median_time: i64,
	/// Script verification flags for the next block.
	pub verify_flags: VerifyFlags,
	/// Relative locktime rules in force.
	pub csv: bool,
	/// Segregated witness rules in force.
	pub segwit: bool,
}

/// Read-only capability handle onto the chain. The pool never holds the
/// chain itself, breaking the reference cycle; the node facade wires an
/// adapter in.
pub trait BlockChain: Send + Sync {
	/// Consistent snapshot of the facts admission depends on.
	fn chain_info(&self) -> Result<ChainInfo, PoolError>;

	/// An unspent coin from the best chain, if present.
	fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, PoolError>;

	/// Whether the chain (not the pool) already spent the outpoint is
	/// unknowable cheaply, but a confirmed transaction by this id means
	/// the whole tx is already mined.
	fn is_confirmed(&self, txid: &Hash) -> Result<bool, PoolError>;

	/// Median-time-past of the main-chain block at the given height,
	/// for relative locktime evaluation.
	fn median_time_at(&self, height: u64) -> Result<i64, PoolError>;
}

/// Bridge between the pool and the outside world, notified of
/// admissions and removals synchronously and in order.
pub trait PoolAdapter: Send + Sync {
	/// A transaction entered the pool.
	fn tx_accepted(&self, entry: &PoolEntry);
	/// A transaction left the pool.
	fn tx_removed(&self, entry: &PoolEntry, reason: RemovalReason);
}

/// Dummy adapter used as a placeholder for real implementations, tests
/// and tools.
pub struct NoopPoolAdapter {}

impl PoolAdapter for NoopPoolAdapter {
	fn tx_accepted(&self, _: &PoolEntry) {}
	fn tx_removed(&self, _: &PoolEntry, _: RemovalReason) {}
}
