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

//! Implementation of the chain block acceptance (or refusal) pipeline.
//! Checks are arranged by cost: header context first, then block
//! structure, then the full spend-and-script validation against a coin
//! view, with script checks fanned out to the worker pool. Nothing here
//! writes to the store until `commit_block`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use kestrel_core::consensus::{
	self, MAX_BLOCK_SIGOPS_COST, MAX_FUTURE_DRIFT, RETARGET_INTERVAL, SEQUENCE_DISABLE_FLAG,
	SEQUENCE_GRANULARITY, SEQUENCE_MASK, SEQUENCE_TYPE_FLAG,
};
use kestrel_core::core::block::Block;
use kestrel_core::core::hash::Hashed;
use kestrel_core::core::interpreter::{self, TxChecker};
use kestrel_core::core::script::{decode_script_num, Instruction, Script, VerifyFlags};
use kestrel_core::core::transaction::{OutPoint, Transaction};
use kestrel_core::global;
use kestrel_util::Workers;

use crate::coins::{Coin, CoinView, UndoBlock};
use crate::deployments::{DeploymentFlags, Deployments};
use crate::error::{Error, ErrorKind, VerifyError};
use crate::store::{ChainBatch, ChainStore};
use crate::types::{ChainEntry, ChainState, Options, TxMeta};

/// Result of fully validating a block against its parent: the coin view
/// holding every spend and creation, and the accumulated totals.
pub struct BlockVerification {
	/// The mutated view, ready to be committed.
	pub view: CoinView,
	/// Total fees paid by the block's transactions.
	pub fees: u64,
	/// Total signature-operation cost.
	pub sigops: usize,
	/// The rules the block was validated under.
	pub flags: DeploymentFlags,
}

/// Compute the compact target required for the block following `prev`.
pub fn next_target(store: &ChainStore, prev: &ChainEntry) -> Result<u32, Error> {
	let limit_bits = global::pow_limit_bits();
	if global::no_retargeting() {
		return Ok(limit_bits);
	}
	let next_height = prev.height + 1;
	if next_height % RETARGET_INTERVAL != 0 {
		return Ok(prev.header.bits);
	}
	// walk back to the first block of the closing window
	let mut first = prev.clone();
	for _ in 0..RETARGET_INTERVAL - 1 {
		first = store
			.get_entry(&first.header.prev_hash)?
			.ok_or_else(|| Error::from(ErrorKind::Other("missing retarget entry".to_owned())))?;
	}
	Ok(consensus::retarget(
		prev.header.bits,
		first.header.timestamp as i64,
		prev.header.timestamp as i64,
		limit_bits,
	))
}

/// First level of validation, done on the header against its parent
/// entry before the block body is even considered.
pub fn check_header(
	block: &Block,
	prev: &ChainEntry,
	store: &ChainStore,
	opts: Options,
) -> Result<(), Error> {
	let header = &block.header;

	let target = match consensus::target_from_compact(header.bits) {
		Some(t) => t,
		None => return Err(VerifyError::new("bad-diffbits", 100).into()),
	};

	if !opts.contains(Options::SKIP_POW) {
		if header.hash().cmp_target(&target) == Ordering::Greater {
			return Err(VerifyError::new("high-hash", 100).into());
		}
		let expected = next_target(store, prev)?;
		if header.bits != expected {
			return Err(VerifyError::new("bad-diffbits", 100).into());
		}
	}

	let median_time = store.median_time_past(prev)?;
	if (header.timestamp as i64) <= median_time {
		return Err(VerifyError::new("time-too-old", 100).into());
	}
	if (header.timestamp as i64) > Utc::now().timestamp() + MAX_FUTURE_DRIFT {
		// too far in the future is transient, the peer's clock may
		// simply be off
		return Err(VerifyError::new("time-too-new", 10).into());
	}
	Ok(())
}

/// Full contextual validation of a block extending `prev`. Returns the
/// coin view and totals without writing anything.
pub fn check_block_context(
	block: &Block,
	entry: &ChainEntry,
	prev: &ChainEntry,
	store: &ChainStore,
	workers: &Workers,
	deployments: &mut Deployments,
) -> Result<BlockVerification, Error> {
	let height = entry.height;
	let flags = deployments.flags(store, Some(prev))?;

	check_witness_commitment(block, &flags)?;
	check_coinbase_height(block, height)?;

	// under BIP113 time locks are measured against the median time past
	let locktime_cutoff = if flags.csv {
		store.median_time_past(prev)?
	} else {
		block.header.timestamp as i64
	};

	let mut view = CoinView::new();
	let mut fees: u64 = 0;
	let mut sigops: usize = 0;
	let mut script_jobs: Vec<Box<dyn FnOnce() -> Result<(), String> + Send>> = vec![];

	for (tx_index, tx) in block.txs.iter().enumerate() {
		if tx_index == 0 {
			sigops += tx.sigops_cost(&|_| None, flags.verify);
			if sigops > MAX_BLOCK_SIGOPS_COST {
				return Err(VerifyError::new("bad-blk-sigops", 100).into());
			}
			continue;
		}

		if !tx.is_final(height, locktime_cutoff) {
			return Err(VerifyError::new("bad-txns-nonfinal", 10).into());
		}

		// resolve and spend every input against the view
		let mut spent: HashMap<OutPoint, Coin> = HashMap::new();
		let mut input_value: u64 = 0;
		for input in &tx.inputs {
			let coin = match view.spend(store, &input.prevout)? {
				Some(coin) => coin,
				None => {
					return Err(VerifyError::new("bad-txns-inputs-missingorspent", 100).into());
				}
			};
			if coin.coinbase && height < coin.height + global::coinbase_maturity() {
				return Err(
					VerifyError::new("bad-txns-premature-spend-of-coinbase", 100).into()
				);
			}
			input_value = input_value
				.checked_add(coin.value)
				.ok_or_else(|| VerifyError::new("bad-txns-inputvalues-outofrange", 100))?;
			spent.insert(input.prevout, coin);
		}

		let output_value = tx.output_value();
		if output_value > input_value {
			return Err(VerifyError::new("bad-txns-in-belowout", 100).into());
		}
		fees = fees
			.checked_add(input_value - output_value)
			.ok_or_else(|| VerifyError::new("bad-txns-fee-outofrange", 100))?;

		if flags.csv && tx.version >= 2 {
			check_sequence_locks(tx, &spent, prev, store)?;
		}

		let spent_for_sigops = spent.clone();
		sigops += tx.sigops_cost(
			&move |outpoint| spent_for_sigops.get(outpoint).map(|c| c.script_pubkey.clone()),
			flags.verify,
		);
		if sigops > MAX_BLOCK_SIGOPS_COST {
			return Err(VerifyError::new("bad-blk-sigops", 100).into());
		}

		// queue per-input script verification for the worker pool
		let tx_arc = Arc::new(tx.clone());
		for (input_index, input) in tx.inputs.iter().enumerate() {
			let coin = &spent[&input.prevout];
			let script_pubkey = coin.script_pubkey.clone();
			let value = coin.value;
			let verify_flags = flags.verify;
			let tx_arc = tx_arc.clone();
			script_jobs.push(Box::new(move || {
				let checker = TxChecker::new(&tx_arc, input_index, value);
				interpreter::verify(
					&tx_arc.inputs[input_index].script_sig,
					&script_pubkey,
					&tx_arc.inputs[input_index].witness,
					&checker,
					verify_flags,
				)
				.map_err(|e| format!("input {}: {}", input_index, e))
			}));
		}

		view.add_tx(tx, height);
	}

	// coinbase value must not exceed subsidy plus collected fees
	let reward = consensus::block_subsidy(height, global::halving_interval())
		.checked_add(fees)
		.ok_or_else(|| VerifyError::new("bad-cb-amount", 100))?;
	if block.txs[0].output_value() > reward {
		return Err(VerifyError::new("bad-cb-amount", 100).into());
	}
	view.add_tx(&block.txs[0], height);

	if !script_jobs.is_empty() {
		let results = workers.run_batch(script_jobs);
		for result in results {
			if let Err(reason) = result {
				return Err(VerifyError::new(
					&format!("mandatory-script-verify-flag-failed ({})", reason),
					100,
				)
				.into());
			}
		}
	}

	Ok(BlockVerification {
		view,
		fees,
		sigops,
		flags,
	})
}

fn check_witness_commitment(block: &Block, flags: &DeploymentFlags) -> Result<(), Error> {
	if !flags.segwit {
		if block.has_witness() {
			return Err(VerifyError::new("unexpected-witness", 100).into());
		}
		return Ok(());
	}
	if !block.has_witness() {
		return Ok(());
	}

	let coinbase = &block.txs[0];
	let nonce = match coinbase.inputs[0].witness.as_slice() {
		[nonce] if nonce.len() == 32 => kestrel_core::core::hash::Hash::from_vec(nonce),
		_ => return Err(VerifyError::new("bad-witness-nonce-size", 100).into()),
	};
	let committed = match block.committed_witness() {
		Some(c) => c,
		None => return Err(VerifyError::new("bad-witness-commitment-missing", 100).into()),
	};
	if committed != block.witness_commitment(&nonce) {
		return Err(VerifyError::new("bad-witness-merkle-match", 100).into());
	}
	Ok(())
}

fn check_coinbase_height(block: &Block, height: u64) -> Result<(), Error> {
	if height < global::height_in_coinbase_from() {
		return Ok(());
	}
	let script_sig = &block.txs[0].inputs[0].script_sig;
	let committed = match script_sig.instructions().next() {
		Some(Ok(Instruction::Push(data))) => decode_script_num(&data, 8),
		_ => None,
	};
	match committed {
		Some(h) if h >= 0 && h as u64 == height => Ok(()),
		_ => Err(VerifyError::new("bad-cb-height", 100).into()),
	}
}

// BIP68: each input may require a minimum age, in blocks or in median
// time, relative to the block that created the coin it spends.
fn check_sequence_locks(
	tx: &Transaction,
	spent: &HashMap<OutPoint, Coin>,
	prev: &ChainEntry,
	store: &ChainStore,
) -> Result<(), Error> {
	let next_height = prev.height + 1;
	let next_median_time = store.median_time_past(prev)?;

	for input in &tx.inputs {
		if input.sequence & SEQUENCE_DISABLE_FLAG != 0 {
			continue;
		}
		let coin = &spent[&input.prevout];
		let locked_value = (input.sequence & SEQUENCE_MASK) as u64;

		if input.sequence & SEQUENCE_TYPE_FLAG != 0 {
			// time-based: measured from the median time of the block
			// preceding the coin's block
			let coin_time = match coin_prev_entry(store, coin)? {
				Some(entry) => store.median_time_past(&entry)?,
				None => 0,
			};
			let required = coin_time + ((locked_value << SEQUENCE_GRANULARITY) as i64);
			if required > next_median_time {
				return Err(VerifyError::new("bad-txns-nonfinal", 10).into());
			}
		} else {
			// height-based
			if coin.height + locked_value > next_height {
				return Err(VerifyError::new("bad-txns-nonfinal", 10).into());
			}
		}
	}
	Ok(())
}

fn coin_prev_entry(store: &ChainStore, coin: &Coin) -> Result<Option<ChainEntry>, Error> {
	if coin.height == 0 {
		return Ok(None);
	}
	match store.get_hash_by_height(coin.height - 1)? {
		Some(hash) => store.get_entry(&hash),
		None => Ok(None),
	}
}

/// Write a fully validated block and every index side effect into the
/// batch: the block record, its entry, the height index, coin
/// adds/removes, the undo record, the tx/address indexes and the new
/// chain state.
pub fn commit_block(
	block: &Block,
	entry: &ChainEntry,
	view: CoinView,
	state: &ChainState,
	batch: &ChainBatch<'_>,
) -> Result<UndoBlock, Error> {
	let block_hash = entry.hash();

	batch.save_block(block)?;
	batch.save_entry(entry)?;
	batch.save_height(entry.height, &block_hash)?;

	// coin overlay: creations and spends
	for (outpoint, coin) in view.entries() {
		match coin {
			Some(coin) => {
				batch.save_coin(outpoint, coin)?;
				batch.save_addr_coin(&coin.script_pubkey.index_key(), outpoint)?;
			}
			None => batch.delete_coin(outpoint)?,
		}
	}
	for undo in view.undo() {
		batch.delete_addr_coin(&undo.coin.script_pubkey.index_key(), &undo.outpoint)?;
	}

	// transaction and address history indexes
	let spent_scripts: HashMap<OutPoint, Script> = view
		.undo()
		.iter()
		.map(|u| (u.outpoint, u.coin.script_pubkey.clone()))
		.collect();
	for (index, tx) in block.txs.iter().enumerate() {
		let txid = tx.hash();
		batch.save_tx_meta(
			&txid,
			&TxMeta {
				tx: tx.clone(),
				block_hash,
				height: entry.height,
				index: index as u32,
				time: block.header.timestamp,
			},
		)?;
		for output in &tx.outputs {
			if !output.script_pubkey.is_op_return() {
				batch.save_addr_tx(&output.script_pubkey.index_key(), &txid)?;
			}
		}
		for input in &tx.inputs {
			if let Some(script) = spent_scripts.get(&input.prevout) {
				batch.save_addr_tx(&script.index_key(), &txid)?;
			}
		}
	}

	let undo = view.into_undo();
	batch.save_undo(&block_hash, &undo)?;
	batch.save_state(state)?;
	Ok(undo)
}

/// Reverse a connected block out of the store: per transaction in
/// reverse order, remove its created coins and restore the coins it
/// spent from the undo record. The block and entry records themselves
/// are left in place (the branch may win again later).
pub fn disconnect_block(
	block: &Block,
	entry: &ChainEntry,
	undo: &UndoBlock,
	state: &ChainState,
	batch: &ChainBatch<'_>,
) -> Result<(), Error> {
	let block_hash = entry.hash();
	let mut undo_stack = undo.spent.clone();

	for tx in block.txs.iter().rev() {
		let txid = tx.hash();

		// remove created coins and their index entries
		for (index, output) in tx.outputs.iter().enumerate() {
			let outpoint = OutPoint::new(txid, index as u32);
			batch.delete_coin(&outpoint)?;
			if !output.script_pubkey.is_op_return() {
				batch.delete_addr_coin(&output.script_pubkey.index_key(), &outpoint)?;
				batch.delete_addr_tx(&output.script_pubkey.index_key(), &txid)?;
			}
		}

		// restore spent coins, newest spend first
		if !tx.is_coinbase() {
			for _ in 0..tx.inputs.len() {
				let restored = undo_stack
					.pop()
					.ok_or_else(|| ErrorKind::Other("undo record too short".to_owned()))?;
				batch.save_coin(&restored.outpoint, &restored.coin)?;
				batch.save_addr_coin(
					&restored.coin.script_pubkey.index_key(),
					&restored.outpoint,
				)?;
				batch.delete_addr_tx(&restored.coin.script_pubkey.index_key(), &txid)?;
			}
		}

		batch.delete_tx_meta(&txid)?;
	}

	batch.delete_undo(&block_hash)?;
	batch.delete_height(entry.height)?;
	batch.save_state(state)?;
	Ok(())
}
