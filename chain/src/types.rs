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

//! Base types that the block chain pipeline requires.

use kestrel_core::consensus;
use kestrel_core::core::block::{Block, BlockHeader};
use kestrel_core::core::hash::{DefaultHashable, Hash, Hashed, ZERO_HASH};
use kestrel_core::core::transaction::Transaction;
use kestrel_core::ser::{self, Readable, Reader, Writeable, Writer};

bitflags! {
	/// Options for block processing.
	pub struct Options: u32 {
		/// No flags
		const NONE = 0b0000_0001;
		/// Runs without checking the proof of work, mostly to make testing easier.
		const SKIP_POW = 0b0000_0010;
		/// Block being processed as part of initial sync, events are not
		/// individually interesting.
		const SYNC = 0b0000_0100;
		/// Block was assembled locally by the miner.
		const MINE = 0b0000_1000;
	}
}

/// Outcome of processing a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
	/// The block extended the best chain.
	Connected,
	/// The block landed on a side branch with less work than the best chain.
	SideChain,
	/// The block caused a reorganization onto its branch.
	Reorganized,
}

/// A header with its contextual derivations, as stored and used
/// throughout the pipeline. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
	/// The block header itself.
	pub header: BlockHeader,
	/// Height of this block in its chain.
	pub height: u64,
	/// Cumulative chain work up to and including this block, as a
	/// 256-bit big-endian integer.
	pub chainwork: [u8; 32],
}

impl ChainEntry {
	/// Derive the entry for `header` extending `prev`.
	pub fn from_prev(header: BlockHeader, prev: &ChainEntry) -> ChainEntry {
		let work = consensus::block_work(header.bits);
		ChainEntry {
			header,
			height: prev.height + 1,
			chainwork: consensus::work_add(&prev.chainwork, &work),
		}
	}

	/// The entry for a genesis block.
	pub fn for_genesis(header: BlockHeader) -> ChainEntry {
		ChainEntry {
			header,
			height: 0,
			chainwork: consensus::block_work(header.bits),
		}
	}

	/// The hash identifying this entry.
	pub fn hash(&self) -> Hash {
		self.header.hash()
	}
}

impl Writeable for ChainEntry {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.header.write(writer)?;
		writer.write_u64(self.height)?;
		writer.write_fixed_bytes(&self.chainwork)
	}
}

impl Readable for ChainEntry {
	fn read(reader: &mut dyn Reader) -> Result<ChainEntry, ser::Error> {
		let header = BlockHeader::read(reader)?;
		let height = reader.read_u64()?;
		let work_bytes = reader.read_fixed_bytes(32)?;
		let mut chainwork = [0u8; 32];
		chainwork.copy_from_slice(&work_bytes);
		Ok(ChainEntry {
			header,
			height,
			chainwork,
		})
	}
}

impl DefaultHashable for ChainEntry {}

/// The persisted chain state record: where the best chain currently
/// ends, where syncing started, and whether we have seen a confirmation
/// of interest since the start block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainState {
	/// Best tip hash.
	pub tip: Hash,
	/// Best tip height.
	pub height: u64,
	/// Total work of the best chain.
	pub chainwork: [u8; 32],
	/// Block the current sync started from.
	pub start_hash: Hash,
	/// Height of the sync start block.
	pub start_height: u64,
	/// Whether a relevant confirmation was observed since the start
	/// block (consumed by subscribers that track first-use).
	pub marked: bool,
}

impl ChainState {
	/// Fresh state rooted at the given genesis entry.
	pub fn from_genesis(entry: &ChainEntry) -> ChainState {
		ChainState {
			tip: entry.hash(),
			height: entry.height,
			chainwork: entry.chainwork,
			start_hash: entry.hash(),
			start_height: entry.height,
			marked: false,
		}
	}

	/// State moved to a new tip entry.
	pub fn with_tip(&self, entry: &ChainEntry) -> ChainState {
		ChainState {
			tip: entry.hash(),
			height: entry.height,
			chainwork: entry.chainwork,
			start_hash: self.start_hash,
			start_height: self.start_height,
			marked: self.marked || entry.height > 0,
		}
	}
}

impl Default for ChainState {
	fn default() -> ChainState {
		ChainState {
			tip: ZERO_HASH,
			height: 0,
			chainwork: [0; 32],
			start_hash: ZERO_HASH,
			start_height: 0,
			marked: false,
		}
	}
}

impl Writeable for ChainState {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.tip.write(writer)?;
		writer.write_u64(self.height)?;
		writer.write_fixed_bytes(&self.chainwork)?;
		self.start_hash.write(writer)?;
		writer.write_u64(self.start_height)?;
		writer.write_u8(self.marked as u8)
	}
}

impl Readable for ChainState {
	fn read(reader: &mut dyn Reader) -> Result<ChainState, ser::Error> {
		let tip = Hash::read(reader)?;
		let height = reader.read_u64()?;
		let work_bytes = reader.read_fixed_bytes(32)?;
		let mut chainwork = [0u8; 32];
		chainwork.copy_from_slice(&work_bytes);
		let start_hash = Hash::read(reader)?;
		let start_height = reader.read_u64()?;
		let marked = reader.read_u8()? != 0;
		Ok(ChainState {
			tip,
			height,
			chainwork,
			start_hash,
			start_height,
			marked,
		})
	}
}

/// A transaction with the context of its confirmation, as kept in the
/// transaction index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxMeta {
	/// The transaction itself.
	pub tx: Transaction,
	/// The block it confirmed in.
	pub block_hash: Hash,
	/// Height of the confirming block.
	pub height: u64,
	/// Position within the block.
	pub index: u32,
	/// Timestamp of the confirming block.
	pub time: u32,
}

impl Writeable for TxMeta {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.tx.write(writer)?;
		self.block_hash.write(writer)?;
		writer.write_u64(self.height)?;
		writer.write_u32(self.index)?;
		writer.write_u32(self.time)
	}
}

impl Readable for TxMeta {
	fn read(reader: &mut dyn Reader) -> Result<TxMeta, ser::Error> {
		let tx = Transaction::read(reader)?;
		let block_hash = Hash::read(reader)?;
		let height = reader.read_u64()?;
		let index = reader.read_u32()?;
		let time = reader.read_u32()?;
		Ok(TxMeta {
			tx,
			block_hash,
			height,
			index,
			time,
		})
	}
}

/// Bridge between the chain and the outside world: implementations get
/// notified synchronously and in order as blocks connect, disconnect or
/// the chain resets. The chain waits for each callback to return before
/// emitting the next event.
pub trait ChainAdapter {
	/// A block was appended to the best chain.
	fn block_connected(&self, block: &Block, entry: &ChainEntry);

	/// A block was removed from the best chain (reorg or reset),
	/// newest first.
	fn block_disconnected(&self, block: &Block, entry: &ChainEntry);

	/// The chain was destructively rolled back to the given tip.
	fn chain_reset(&self, tip: &ChainEntry);
}

/// Adapter that ignores everything, for tests and tools.
pub struct NoopAdapter {}

impl ChainAdapter for NoopAdapter {
	fn block_connected(&self, _: &Block, _: &ChainEntry) {}
	fn block_disconnected(&self, _: &Block, _: &ChainEntry) {}
	fn chain_reset(&self, _: &ChainEntry) {}
}

#[cfg(test)]
mod test {
	use super::*;
	use kestrel_core::genesis;

	#[test]
	fn entry_accumulates_work() {
		let genesis = genesis::genesis_dev();
		let entry = ChainEntry::for_genesis(genesis.header);
		let next = ChainEntry::from_prev(
			BlockHeader {
				prev_hash: entry.hash(),
				bits: genesis.header.bits,
				..genesis.header
			},
			&entry,
		);
		assert_eq!(next.height, 1);
		assert!(next.chainwork > entry.chainwork);
	}

	#[test]
	fn state_marks_on_first_block() {
		let genesis = genesis::genesis_dev();
		let entry = ChainEntry::for_genesis(genesis.header);
		let state = ChainState::from_genesis(&entry);
		assert!(!state.marked);

		let next_entry = ChainEntry::from_prev(
			BlockHeader {
				prev_hash: entry.hash(),
				..genesis.header
			},
			&entry,
		);
		assert!(state.with_tip(&next_entry).marked);
	}
}
