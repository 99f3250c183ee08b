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

//! Blocks and block headers. Carries the merkle tree construction, the
//! witness commitment and the block-level structural checks.

use chrono::{TimeZone, Utc};
use std::fmt;

use crate::consensus::MAX_BLOCK_WEIGHT;
use crate::core::hash::{sha256, DefaultHashable, Hash, Hashed, ZERO_HASH};
use crate::core::script::Script;
use crate::core::transaction::Transaction;
use crate::ser::{self, Readable, Reader, Writeable, Writer};

/// Magic prefix of the witness commitment output script.
pub const WITNESS_COMMITMENT_HEADER: [u8; 4] = [0xaa, 0x21, 0xa9, 0xed];

/// A block header, the 80 bytes the proof of work commits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
	/// Version, carries soft-fork signaling bits.
	pub version: i32,
	/// Hash of the previous block in the chain.
	pub prev_hash: Hash,
	/// Root of the transaction merkle tree.
	pub merkle_root: Hash,
	/// Timestamp claimed by the miner.
	pub timestamp: u32,
	/// Compact encoding of the target this header's hash must meet.
	pub bits: u32,
	/// Proof-of-work nonce.
	pub nonce: u32,
}

impl Default for BlockHeader {
	fn default() -> BlockHeader {
		BlockHeader {
			version: 1,
			prev_hash: ZERO_HASH,
			merkle_root: ZERO_HASH,
			timestamp: 0,
			bits: 0,
			nonce: 0,
		}
	}
}

impl DefaultHashable for BlockHeader {}

impl Writeable for BlockHeader {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_i32(self.version)?;
		self.prev_hash.write(writer)?;
		self.merkle_root.write(writer)?;
		writer.write_u32(self.timestamp)?;
		writer.write_u32(self.bits)?;
		writer.write_u32(self.nonce)
	}
}

impl Readable for BlockHeader {
	fn read(reader: &mut dyn Reader) -> Result<BlockHeader, ser::Error> {
		let version = reader.read_i32()?;
		let prev_hash = Hash::read(reader)?;
		let merkle_root = Hash::read(reader)?;
		let timestamp = reader.read_u32()?;
		let bits = reader.read_u32()?;
		let nonce = reader.read_u32()?;
		Ok(BlockHeader {
			version,
			prev_hash,
			merkle_root,
			timestamp,
			bits,
			nonce,
		})
	}
}

impl fmt::Display for BlockHeader {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{} (prev {}, {})",
			self.hash(),
			self.prev_hash,
			Utc.timestamp(self.timestamp as i64, 0)
		)
	}
}

/// A full block: a header and the transactions it commits to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
	/// The block header.
	pub header: BlockHeader,
	/// The transactions, coinbase first.
	pub txs: Vec<Transaction>,
}

impl Writeable for Block {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.header.write(writer)?;
		writer.write_varint(self.txs.len() as u64)?;
		for tx in &self.txs {
			tx.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for Block {
	fn read(reader: &mut dyn Reader) -> Result<Block, ser::Error> {
		let header = BlockHeader::read(reader)?;
		let count = reader.read_varint()?;
		if count > 1_000_000 {
			return Err(ser::Error::TooLargeReadErr(count));
		}
		let mut txs = Vec::with_capacity(count as usize);
		for _ in 0..count {
			txs.push(Transaction::read(reader)?);
		}
		Ok(Block { header, txs })
	}
}

impl Hashed for Block {
	fn hash(&self) -> Hash {
		self.header.hash()
	}
}

impl Block {
	/// A new block on top of `prev_hash` carrying the given transactions.
	/// The merkle root is computed, everything else is up to the caller.
	pub fn with_txs(prev_hash: Hash, txs: Vec<Transaction>) -> Block {
		let mut block = Block {
			header: BlockHeader {
				prev_hash,
				..Default::default()
			},
			txs,
		};
		let (root, _) = block.merkle_root();
		block.header.merkle_root = root;
		block
	}

	/// Compute the merkle root over the transaction ids, and whether the
	/// tree is in the malleated form (identical hashes paired up), which
	/// must be rejected.
	pub fn merkle_root(&self) -> (Hash, bool) {
		let hashes = self.txs.iter().map(|tx| tx.hash()).collect::<Vec<_>>();
		merkle_root(hashes)
	}

	/// Compute the witness merkle root: like the merkle root but over
	/// witness tx ids, with the coinbase pinned to the zero hash.
	pub fn witness_root(&self) -> Hash {
		let mut hashes = vec![ZERO_HASH];
		hashes.extend(self.txs.iter().skip(1).map(|tx| tx.witness_hash()));
		merkle_root(hashes).0
	}

	/// Compute the witness commitment for this block's transactions with
	/// the given nonce (the coinbase's single witness element).
	pub fn witness_commitment(&self, nonce: &Hash) -> Hash {
		let root = self.witness_root();
		let mut data = root.to_vec();
		data.extend_from_slice(nonce.as_bytes());
		Hash(sha256(&sha256(&data)))
	}

	/// Find the witness commitment carried in the coinbase, if any.
	/// The last matching output wins.
	pub fn committed_witness(&self) -> Option<Hash> {
		let coinbase = self.txs.first()?;
		for output in coinbase.outputs.iter().rev() {
			let bytes = output.script_pubkey.as_bytes();
			if bytes.len() >= 38
				&& bytes[0] == crate::core::script::OP_RETURN
				&& bytes[1] == 0x24
				&& bytes[2..6] == WITNESS_COMMITMENT_HEADER
			{
				return Some(Hash::from_vec(&bytes[6..38]));
			}
		}
		None
	}

	/// Build the witness commitment output script.
	pub fn witness_commitment_script(commitment: &Hash) -> Script {
		let mut data = WITNESS_COMMITMENT_HEADER.to_vec();
		data.extend_from_slice(commitment.as_bytes());
		Script::null_data(&data)
	}

	/// Whether any transaction in the block carries witness data.
	pub fn has_witness(&self) -> bool {
		self.txs.iter().any(|tx| tx.has_witness())
	}

	/// Total block weight.
	pub fn weight(&self) -> usize {
		let header_weight = 80 * crate::consensus::WITNESS_SCALE_FACTOR;
		let count_weight = compact_size_len(self.txs.len() as u64) * crate::consensus::WITNESS_SCALE_FACTOR;
		header_weight + count_weight + self.txs.iter().map(|tx| tx.weight()).sum::<usize>()
	}

	/// Structural validity: merkle commitment, weight limit, exactly one
	/// leading coinbase, valid transactions. Returns a reason string on
	/// failure.
	pub fn check_sanity(&self) -> Result<(), String> {
		if self.txs.is_empty() {
			return Err("block has no transactions".to_owned());
		}
		if !self.txs[0].is_coinbase() {
			return Err("first transaction is not a coinbase".to_owned());
		}
		for tx in self.txs.iter().skip(1) {
			if tx.is_coinbase() {
				return Err("more than one coinbase".to_owned());
			}
		}
		if self.weight() > MAX_BLOCK_WEIGHT {
			return Err("block exceeds maximum weight".to_owned());
		}

		let (root, mutated) = self.merkle_root();
		if mutated {
			return Err("malleated merkle tree".to_owned());
		}
		if root != self.header.merkle_root {
			return Err("merkle root mismatch".to_owned());
		}

		let mut seen = std::collections::HashSet::new();
		for tx in &self.txs {
			if !seen.insert(tx.hash()) {
				return Err("duplicate transaction".to_owned());
			}
			tx.check_sanity()
				.map_err(|e| format!("invalid transaction: {}", e))?;
		}
		Ok(())
	}
}

/// Pairwise double-SHA256 merkle tree over the given leaf hashes,
/// duplicating the last node at odd levels. Also reports whether the
/// malleated (duplicate-pair) form was encountered.
pub fn merkle_root(mut hashes: Vec<Hash>) -> (Hash, bool) {
	if hashes.is_empty() {
		return (ZERO_HASH, false);
	}
	let mut mutated = false;
	while hashes.len() > 1 {
		// genuine malleation shows as identical adjacent nodes among the
		// existing ones; an unpaired tail is legitimate and checked
		// before it gets duplicated below
		for pair in hashes.chunks_exact(2) {
			if pair[0] == pair[1] {
				mutated = true;
			}
		}
		if hashes.len() % 2 != 0 {
			let last = *hashes.last().unwrap();
			hashes.push(last);
		}
		let mut next = Vec::with_capacity(hashes.len() / 2);
		for pair in hashes.chunks(2) {
			let mut data = pair[0].to_vec();
			data.extend_from_slice(pair[1].as_bytes());
			next.push(Hash(sha256(&sha256(&data))));
		}
		hashes = next;
	}
	(hashes[0], mutated)
}

fn compact_size_len(n: u64) -> usize {
	match n {
		0..=0xfc => 1,
		0xfd..=0xffff => 3,
		0x1_0000..=0xffff_ffff => 5,
		_ => 9,
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::hash::sha256d;
	use crate::core::transaction::{OutPoint, TxIn, TxOut};

	fn coinbase(height: u64) -> Transaction {
		let mut tx = Transaction::new();
		let mut input = TxIn::new(OutPoint::null());
		input.script_sig.push_int(height as i64).push_int(0);
		tx.inputs.push(input);
		tx.outputs.push(TxOut::new(
			50 * crate::consensus::COIN,
			Script::p2pkh(&[1u8; 20]),
		));
		tx
	}

	fn spender(prev: Hash) -> Transaction {
		let mut tx = Transaction::new();
		tx.inputs.push(TxIn::new(OutPoint::new(prev, 0)));
		tx.outputs.push(TxOut::new(10, Script::p2pkh(&[2u8; 20])));
		tx
	}

	#[test]
	fn merkle_single_tx_is_txid() {
		let block = Block::with_txs(ZERO_HASH, vec![coinbase(1)]);
		assert_eq!(block.header.merkle_root, block.txs[0].hash());
	}

	#[test]
	fn merkle_detects_duplicate_pairing() {
		let a = sha256d(b"a");
		let b = sha256d(b"b");
		let c = sha256d(b"c");

		let (_, mutated) = merkle_root(vec![a, a]);
		assert!(mutated);
		let (_, mutated) = merkle_root(vec![a, b]);
		assert!(!mutated);

		// odd leaf counts pad the tail, which is not malleation
		let (root3, mutated) = merkle_root(vec![a, b, c]);
		assert!(!mutated);
		let (_, mutated) = merkle_root(vec![a, b, c, sha256d(b"d"), sha256d(b"e")]);
		assert!(!mutated);

		// an explicit duplicate of the tail computes the same root and
		// is the malleated form that must be flagged
		let (root4, mutated) = merkle_root(vec![a, b, c, c]);
		assert!(mutated);
		assert_eq!(root3, root4);
	}

	#[test]
	fn sanity_checks() {
		let cb = coinbase(1);
		let tx = spender(cb.hash());

		let good = Block::with_txs(ZERO_HASH, vec![cb.clone(), tx.clone()]);
		good.check_sanity().unwrap();

		// an odd transaction count is fine (padded merkle tail)
		let chained = spender(tx.hash());
		let odd = Block::with_txs(ZERO_HASH, vec![cb.clone(), tx.clone(), chained]);
		odd.check_sanity().unwrap();

		// no coinbase
		let bad = Block::with_txs(ZERO_HASH, vec![tx.clone()]);
		assert!(bad.check_sanity().is_err());

		// two coinbases
		let bad = Block::with_txs(ZERO_HASH, vec![cb.clone(), coinbase(2)]);
		assert!(bad.check_sanity().is_err());

		// tampered merkle root
		let mut bad = good.clone();
		bad.header.merkle_root = ZERO_HASH;
		assert!(bad.check_sanity().is_err());
	}

	#[test]
	fn witness_commitment_roundtrip() {
		let cb = coinbase(1);
		let mut tx = spender(cb.hash());
		tx.inputs[0].witness = vec![vec![1, 2, 3]];
		let block = Block::with_txs(ZERO_HASH, vec![cb, tx]);

		let nonce = ZERO_HASH;
		let commitment = block.witness_commitment(&nonce);
		let script = Block::witness_commitment_script(&commitment);

		let mut with_commit = block.clone();
		with_commit.txs[0].outputs.push(TxOut::new(0, script));
		assert_eq!(with_commit.committed_witness(), Some(commitment));

		// changing a witness changes the commitment
		let mut altered = block.clone();
		altered.txs[1].inputs[0].witness = vec![vec![9]];
		assert_ne!(altered.witness_commitment(&nonce), commitment);
	}

	#[test]
	fn header_roundtrip() {
		let header = BlockHeader {
			version: 0x2000_0000,
			prev_hash: sha256d(b"prev"),
			merkle_root: sha256d(b"root"),
			timestamp: 1_500_000_000,
			bits: 0x207f_ffff,
			nonce: 42,
		};
		let bytes = crate::ser::ser_vec(&header).unwrap();
		assert_eq!(bytes.len(), 80);
		let decoded: BlockHeader = crate::ser::deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(decoded, header);
	}
}
