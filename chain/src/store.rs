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

//! Implements storage primitives required by the chain: block records,
//! entries, the height index, the UTXO set, undo data, the transaction
//! and address indexes, and the chain state record.

use std::sync::Arc;

use lmdb_zero as lmdb;

use kestrel_core::consensus::MEDIAN_TIME_SPAN;
use kestrel_core::core::block::Block;
use kestrel_core::core::hash::{Hash, Hashed};
use kestrel_core::core::transaction::OutPoint;
use kestrel_core::ser::ser_vec;
use kestrel_store::{self as store, option_to_not_found};

use crate::coins::{Coin, UndoBlock};
use crate::error::Error;
use crate::types::{ChainEntry, ChainState, TxMeta};

const BLOCK_PREFIX: u8 = b'b';
const ENTRY_PREFIX: u8 = b'e';
const HEIGHT_PREFIX: u8 = b'H';
const COIN_PREFIX: u8 = b'c';
const UNDO_PREFIX: u8 = b'u';
const TX_PREFIX: u8 = b't';
const ADDR_TX_PREFIX: u8 = b'T';
const ADDR_COIN_PREFIX: u8 = b'C';
const INVALID_PREFIX: u8 = b'I';
const STATE_KEY: &[u8] = b"S";

fn to_key(prefix: u8, k: &[u8]) -> Vec<u8> {
	let mut key = Vec::with_capacity(k.len() + 1);
	key.push(prefix);
	key.extend_from_slice(k);
	key
}

fn height_key(height: u64) -> Vec<u8> {
	to_key(HEIGHT_PREFIX, &height.to_be_bytes())
}

fn coin_key(outpoint: &OutPoint) -> Vec<u8> {
	to_key(COIN_PREFIX, &ser_vec(outpoint).unwrap())
}

fn addr_coin_key(script_key: &[u8; 32], outpoint: &OutPoint) -> Vec<u8> {
	let mut key = to_key(ADDR_COIN_PREFIX, script_key);
	key.extend_from_slice(&ser_vec(outpoint).unwrap());
	key
}

fn addr_tx_key(script_key: &[u8; 32], txid: &Hash) -> Vec<u8> {
	let mut key = to_key(ADDR_TX_PREFIX, script_key);
	key.extend_from_slice(txid.as_bytes());
	key
}

/// An implementation of the chain's persistence needs on top of the
/// key-value store. Writes go through a `ChainBatch` so that a block is
/// committed with all of its side effects or not at all.
pub struct ChainStore {
	db: store::Store,
}

impl ChainStore {
	/// Open (or create) the chain database inside the given environment.
	pub fn new(env: Arc<lmdb::Environment>) -> Result<ChainStore, Error> {
		let db = store::Store::open(env, "chain")?;
		Ok(ChainStore { db })
	}

	/// The persisted chain state record.
	pub fn state(&self) -> Result<ChainState, store::Error> {
		option_to_not_found(self.db.get_ser(STATE_KEY), "chain state")
	}

	/// Fetch a full block by hash.
	pub fn get_block(&self, hash: &Hash) -> Result<Option<Block>, Error> {
		self.db
			.get_ser(&to_key(BLOCK_PREFIX, hash.as_bytes()))
			.map_err(From::from)
	}

	/// Fetch a chain entry by block hash.
	pub fn get_entry(&self, hash: &Hash) -> Result<Option<ChainEntry>, Error> {
		self.db
			.get_ser(&to_key(ENTRY_PREFIX, hash.as_bytes()))
			.map_err(From::from)
	}

	/// Hash of the main-chain block at the given height.
	pub fn get_hash_by_height(&self, height: u64) -> Result<Option<Hash>, Error> {
		self.db.get_ser(&height_key(height)).map_err(From::from)
	}

	/// Fetch an unspent coin by outpoint.
	pub fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, Error> {
		self.db.get_ser(&coin_key(outpoint)).map_err(From::from)
	}

	/// Fetch the undo record of a connected block.
	pub fn get_undo(&self, hash: &Hash) -> Result<Option<UndoBlock>, Error> {
		self.db
			.get_ser(&to_key(UNDO_PREFIX, hash.as_bytes()))
			.map_err(From::from)
	}

	/// Fetch an indexed transaction with its confirmation context.
	pub fn get_tx_meta(&self, txid: &Hash) -> Result<Option<TxMeta>, Error> {
		self.db
			.get_ser(&to_key(TX_PREFIX, txid.as_bytes()))
			.map_err(From::from)
	}

	/// Whether the given block hash was marked invalid.
	pub fn is_invalid(&self, hash: &Hash) -> Result<bool, Error> {
		self.db
			.exists(&to_key(INVALID_PREFIX, hash.as_bytes()))
			.map_err(From::from)
	}

	/// All unspent outpoints currently indexed for a script key.
	pub fn get_coins_by_script(&self, script_key: &[u8; 32]) -> Result<Vec<OutPoint>, Error> {
		let prefix = to_key(ADDR_COIN_PREFIX, script_key);
		let mut outpoints = vec![];
		for (key, ()) in self.db.iter::<()>(&prefix)? {
			let raw = &key[prefix.len()..];
			let outpoint = kestrel_core::ser::deserialize(&mut &raw[..])?;
			outpoints.push(outpoint);
		}
		Ok(outpoints)
	}

	/// All transaction ids ever indexed for a script key.
	pub fn get_txids_by_script(&self, script_key: &[u8; 32]) -> Result<Vec<Hash>, Error> {
		let prefix = to_key(ADDR_TX_PREFIX, script_key);
		let mut txids = vec![];
		for (key, ()) in self.db.iter::<()>(&prefix)? {
			let raw = &key[prefix.len()..];
			txids.push(Hash::from_vec(raw));
		}
		Ok(txids)
	}

	/// Median of the previous `MEDIAN_TIME_SPAN` block timestamps,
	/// starting from (and including) the given entry.
	pub fn median_time_past(&self, entry: &ChainEntry) -> Result<i64, Error> {
		let mut timestamps = vec![];
		let mut current = Some(entry.clone());
		while let Some(entry) = current {
			timestamps.push(entry.header.timestamp as i64);
			if timestamps.len() >= MEDIAN_TIME_SPAN || entry.height == 0 {
				break;
			}
			current = self.get_entry(&entry.header.prev_hash)?;
		}
		timestamps.sort();
		Ok(timestamps[timestamps.len() / 2])
	}

	/// Build a batch for atomic writes against this store.
	pub fn batch(&self) -> Result<ChainBatch<'_>, Error> {
		Ok(ChainBatch {
			db: self.db.batch()?,
		})
	}
}

/// An atomic set of chain writes. The batch is committed whole; dropping
/// it abandons every staged write.
pub struct ChainBatch<'a> {
	db: store::Batch<'a>,
}

impl<'a> ChainBatch<'a> {
	/// Save a full block record.
	pub fn save_block(&self, block: &Block) -> Result<(), Error> {
		self.db
			.put_ser(&to_key(BLOCK_PREFIX, block.hash().as_bytes()), block)
			.map_err(From::from)
	}

	/// Delete a block record.
	pub fn delete_block(&self, hash: &Hash) -> Result<(), Error> {
		self.db
			.delete(&to_key(BLOCK_PREFIX, hash.as_bytes()))
			.map_err(From::from)
	}

	/// Save a chain entry.
	pub fn save_entry(&self, entry: &ChainEntry) -> Result<(), Error> {
		self.db
			.put_ser(&to_key(ENTRY_PREFIX, entry.hash().as_bytes()), entry)
			.map_err(From::from)
	}

	/// Delete a chain entry.
	pub fn delete_entry(&self, hash: &Hash) -> Result<(), Error> {
		self.db
			.delete(&to_key(ENTRY_PREFIX, hash.as_bytes()))
			.map_err(From::from)
	}

	/// Point the height index at a main-chain block.
	pub fn save_height(&self, height: u64, hash: &Hash) -> Result<(), Error> {
		self.db.put_ser(&height_key(height), hash).map_err(From::from)
	}

	/// Remove a height from the height index.
	pub fn delete_height(&self, height: u64) -> Result<(), Error> {
		self.db.delete(&height_key(height)).map_err(From::from)
	}

	/// Save an unspent coin.
	pub fn save_coin(&self, outpoint: &OutPoint, coin: &Coin) -> Result<(), Error> {
		self.db.put_ser(&coin_key(outpoint), coin).map_err(From::from)
	}

	/// Remove a (spent) coin.
	pub fn delete_coin(&self, outpoint: &OutPoint) -> Result<(), Error> {
		self.db.delete(&coin_key(outpoint)).map_err(From::from)
	}

	/// Save the undo record of a freshly connected block.
	pub fn save_undo(&self, hash: &Hash, undo: &UndoBlock) -> Result<(), Error> {
		self.db
			.put_ser(&to_key(UNDO_PREFIX, hash.as_bytes()), undo)
			.map_err(From::from)
	}

	/// Remove a block's undo record.
	pub fn delete_undo(&self, hash: &Hash) -> Result<(), Error> {
		self.db
			.delete(&to_key(UNDO_PREFIX, hash.as_bytes()))
			.map_err(From::from)
	}

	/// Index a confirmed transaction.
	pub fn save_tx_meta(&self, txid: &Hash, meta: &TxMeta) -> Result<(), Error> {
		self.db
			.put_ser(&to_key(TX_PREFIX, txid.as_bytes()), meta)
			.map_err(From::from)
	}

	/// Remove a transaction from the index.
	pub fn delete_tx_meta(&self, txid: &Hash) -> Result<(), Error> {
		self.db
			.delete(&to_key(TX_PREFIX, txid.as_bytes()))
			.map_err(From::from)
	}

	/// Index an unspent outpoint under its script key.
	pub fn save_addr_coin(&self, script_key: &[u8; 32], outpoint: &OutPoint) -> Result<(), Error> {
		self.db
			.put(&addr_coin_key(script_key, outpoint), &[])
			.map_err(From::from)
	}

	/// Remove an outpoint from the address index.
	pub fn delete_addr_coin(
		&self,
		script_key: &[u8; 32],
		outpoint: &OutPoint,
	) -> Result<(), Error> {
		self.db
			.delete(&addr_coin_key(script_key, outpoint))
			.map_err(From::from)
	}

	/// Index a transaction id under a script key it touches.
	pub fn save_addr_tx(&self, script_key: &[u8; 32], txid: &Hash) -> Result<(), Error> {
		self.db
			.put(&addr_tx_key(script_key, txid), &[])
			.map_err(From::from)
	}

	/// Remove a transaction id from the address index.
	pub fn delete_addr_tx(&self, script_key: &[u8; 32], txid: &Hash) -> Result<(), Error> {
		self.db
			.delete(&addr_tx_key(script_key, txid))
			.map_err(From::from)
	}

	/// Mark a block hash as invalid so its branch is never reconsidered.
	pub fn mark_invalid(&self, hash: &Hash) -> Result<(), Error> {
		self.db
			.put(&to_key(INVALID_PREFIX, hash.as_bytes()), &[])
			.map_err(From::from)
	}

	/// Save the chain state record.
	pub fn save_state(&self, state: &ChainState) -> Result<(), Error> {
		self.db.put_ser(STATE_KEY, state).map_err(From::from)
	}

	/// Commit every staged write atomically.
	pub fn commit(self) -> Result<(), Error> {
		self.db.commit().map_err(From::from)
	}
}
