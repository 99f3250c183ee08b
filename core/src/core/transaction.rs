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

//! Transactions: inputs spending prior outpoints, outputs locking value
//! under scripts, the witness section, the various size metrics and the
//! two signature-hash algorithms (legacy and version-0 witness).

use std::fmt;

use crate::consensus::{
	LOCKTIME_THRESHOLD, MAX_BLOCK_BASE_SIZE, MAX_MONEY, WITNESS_SCALE_FACTOR,
};
use crate::core::hash::{Hash, HashWriter, Hashed, ZERO_HASH};
use crate::core::interpreter::is_sighash_single_bug;
use crate::core::script::{Instruction, Script, VerifyFlags};
use crate::ser::{self, ser_size, Readable, Reader, Writeable, Writer};

/// Sign all outputs.
pub const SIGHASH_ALL: u32 = 0x01;
/// Sign no outputs.
pub const SIGHASH_NONE: u32 = 0x02;
/// Sign only the output paired with the signed input.
pub const SIGHASH_SINGLE: u32 = 0x03;
/// Modifier: sign only this input.
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;
/// Mask extracting the base sighash type.
pub const SIGHASH_MASK: u32 = 0x1f;

/// A reference to an output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutPoint {
	/// The hash of the referenced transaction.
	pub hash: Hash,
	/// The index of the referenced output in its transaction's vout.
	pub index: u32,
}

impl OutPoint {
	/// A new outpoint for the given transaction output.
	pub fn new(hash: Hash, index: u32) -> OutPoint {
		OutPoint { hash, index }
	}

	/// The coinbase "null" outpoint.
	pub fn null() -> OutPoint {
		OutPoint {
			hash: ZERO_HASH,
			index: u32::max_value(),
		}
	}

	/// Whether this is the coinbase null outpoint.
	pub fn is_null(&self) -> bool {
		self.hash.is_zero() && self.index == u32::max_value()
	}
}

impl fmt::Display for OutPoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.hash, self.index)
	}
}

impl Writeable for OutPoint {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.hash.write(writer)?;
		writer.write_u32(self.index)
	}
}

impl Readable for OutPoint {
	fn read(reader: &mut dyn Reader) -> Result<OutPoint, ser::Error> {
		let hash = Hash::read(reader)?;
		let index = reader.read_u32()?;
		Ok(OutPoint { hash, index })
	}
}

/// A transaction input: the outpoint it spends, the unlocking script,
/// the witness stack and the sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
	/// Outpoint being spent.
	pub prevout: OutPoint,
	/// Legacy unlocking script.
	pub script_sig: Script,
	/// Sequence number, doubling as the relative locktime field.
	pub sequence: u32,
	/// Segregated witness stack.
	pub witness: Vec<Vec<u8>>,
}

impl TxIn {
	/// An input spending the given outpoint with an empty script and a
	/// final sequence.
	pub fn new(prevout: OutPoint) -> TxIn {
		TxIn {
			prevout,
			script_sig: Script::new(),
			sequence: 0xffff_ffff,
			witness: vec![],
		}
	}

	/// Whether this input carries any witness data.
	pub fn has_witness(&self) -> bool {
		!self.witness.is_empty()
	}
}

/// A transaction output: a value locked under a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
	/// Value in atomic units.
	pub value: u64,
	/// The locking script.
	pub script_pubkey: Script,
}

impl TxOut {
	/// A new output of `value` locked by `script_pubkey`.
	pub fn new(value: u64, script_pubkey: Script) -> TxOut {
		TxOut {
			value,
			script_pubkey,
		}
	}
}

impl Writeable for TxOut {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.value)?;
		self.script_pubkey.write(writer)
	}
}

impl Readable for TxOut {
	fn read(reader: &mut dyn Reader) -> Result<TxOut, ser::Error> {
		let value = reader.read_u64()?;
		let script_pubkey = Script::read(reader)?;
		Ok(TxOut {
			value,
			script_pubkey,
		})
	}
}

/// A full transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
	/// Version, gating BIP68 semantics.
	pub version: i32,
	/// The inputs being spent.
	pub inputs: Vec<TxIn>,
	/// The outputs being created.
	pub outputs: Vec<TxOut>,
	/// Absolute locktime: a height below the threshold, a timestamp
	/// at or above it.
	pub lock_time: u32,
}

/// Adapter serializing a transaction without its witness section, for
/// txid computation and base-size measurement.
struct NonWitnessTx<'a>(&'a Transaction);

impl<'a> Writeable for NonWitnessTx<'a> {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.0.write_inner(writer, false)
	}
}

impl Transaction {
	/// A new empty transaction, version 1.
	pub fn new() -> Transaction {
		Transaction {
			version: 1,
			inputs: vec![],
			outputs: vec![],
			lock_time: 0,
		}
	}

	fn write_inner<W: Writer>(&self, writer: &mut W, include_witness: bool) -> Result<(), ser::Error> {
		let include_witness = include_witness && self.has_witness();
		writer.write_i32(self.version)?;
		if include_witness {
			// segwit marker and flag
			writer.write_u8(0x00)?;
			writer.write_u8(0x01)?;
		}
		writer.write_varint(self.inputs.len() as u64)?;
		for input in &self.inputs {
			input.prevout.write(writer)?;
			input.script_sig.write(writer)?;
			writer.write_u32(input.sequence)?;
		}
		writer.write_varint(self.outputs.len() as u64)?;
		for output in &self.outputs {
			output.write(writer)?;
		}
		if include_witness {
			for input in &self.inputs {
				writer.write_varint(input.witness.len() as u64)?;
				for item in &input.witness {
					writer.write_bytes(item)?;
				}
			}
		}
		writer.write_u32(self.lock_time)
	}

	/// The transaction id: hash of the serialization without witness data.
	pub fn hash(&self) -> Hash {
		let mut hasher = HashWriter::default();
		self.write_inner(&mut hasher, false).unwrap();
		hasher.finalize()
	}

	/// The witness transaction id: hash of the full serialization.
	pub fn witness_hash(&self) -> Hash {
		let mut hasher = HashWriter::default();
		self.write_inner(&mut hasher, true).unwrap();
		hasher.finalize()
	}

	/// Whether any input carries witness data.
	pub fn has_witness(&self) -> bool {
		self.inputs.iter().any(|i| i.has_witness())
	}

	/// Whether this is a coinbase transaction (single null-prevout input).
	pub fn is_coinbase(&self) -> bool {
		self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
	}

	/// Serialized size without witness data.
	pub fn base_size(&self) -> usize {
		ser_size(&NonWitnessTx(self))
	}

	/// Full serialized size, witness included.
	pub fn total_size(&self) -> usize {
		ser_size(self)
	}

	/// Consensus weight: base size scaled plus the witness bytes.
	pub fn weight(&self) -> usize {
		self.base_size() * (WITNESS_SCALE_FACTOR - 1) + self.total_size()
	}

	/// Virtual size: weight normalized back to scale-factor units,
	/// rounded up.
	pub fn vsize(&self) -> usize {
		(self.weight() + WITNESS_SCALE_FACTOR - 1) / WITNESS_SCALE_FACTOR
	}

	/// Sum of all output values.
	pub fn output_value(&self) -> u64 {
		self.outputs.iter().map(|o| o.value).sum()
	}

	/// Whether the transaction is final at the given height and
	/// median-time-past.
	pub fn is_final(&self, height: u64, median_time: i64) -> bool {
		if self.lock_time == 0 {
			return true;
		}
		let lock = self.lock_time as u64;
		let cutoff = if self.lock_time < LOCKTIME_THRESHOLD {
			height
		} else {
			median_time as u64
		};
		if lock < cutoff {
			return true;
		}
		// locktime is still in the future but finalized sequences
		// override it
		self.inputs.iter().all(|i| i.sequence == 0xffff_ffff)
	}

	/// Accumulated signature-operation cost of the transaction, in
	/// weight-scaled units. Needs access to the spent output scripts for
	/// the pay-to-script-hash and witness components.
	pub fn sigops_cost(
		&self,
		spent_script: &dyn Fn(&OutPoint) -> Option<Script>,
		flags: VerifyFlags,
	) -> usize {
		let mut cost = self.legacy_sigops() * WITNESS_SCALE_FACTOR;
		if self.is_coinbase() {
			return cost;
		}
		for input in &self.inputs {
			let prev_script = match spent_script(&input.prevout) {
				Some(s) => s,
				None => continue,
			};
			if flags.contains(VerifyFlags::P2SH) && prev_script.is_p2sh() {
				// the redeem script is the last push of the scriptsig
				if let Some(Ok(Instruction::Push(redeem))) =
					input.script_sig.instructions().last()
				{
					cost += Script::from_bytes(redeem).sigops(true) * WITNESS_SCALE_FACTOR;
				}
			}
			if flags.contains(VerifyFlags::WITNESS) {
				let program = prev_script.witness_program().or_else(|| {
					// p2sh-wrapped program
					if prev_script.is_p2sh() {
						match input.script_sig.instructions().last() {
							Some(Ok(Instruction::Push(redeem))) => {
								Script::from_bytes(redeem).witness_program()
							}
							_ => None,
						}
					} else {
						None
					}
				});
				if let Some((0, program)) = program {
					if program.len() == 20 {
						cost += 1;
					} else if program.len() == 32 {
						if let Some(script_bytes) = input.witness.last() {
							cost += Script::from_bytes(script_bytes.clone()).sigops(true);
						}
					}
				}
			}
		}
		cost
	}

	fn legacy_sigops(&self) -> usize {
		let mut count = 0;
		for input in &self.inputs {
			count += input.script_sig.sigops(false);
		}
		for output in &self.outputs {
			count += output.script_pubkey.sigops(false);
		}
		count
	}

	/// Structural validity checks that need no chain context. Returns a
	/// reason string on failure, suitable for scoring by the caller.
	pub fn check_sanity(&self) -> Result<(), String> {
		if self.inputs.is_empty() {
			return Err("transaction has no inputs".to_owned());
		}
		if self.outputs.is_empty() {
			return Err("transaction has no outputs".to_owned());
		}
		if self.base_size() > MAX_BLOCK_BASE_SIZE {
			return Err("transaction exceeds maximum size".to_owned());
		}
		let mut total: u64 = 0;
		for output in &self.outputs {
			if output.value > MAX_MONEY {
				return Err("output value out of range".to_owned());
			}
			total = total
				.checked_add(output.value)
				.filter(|t| *t <= MAX_MONEY)
				.ok_or_else(|| "total output value out of range".to_owned())?;
		}
		let mut seen = std::collections::HashSet::new();
		for input in &self.inputs {
			if !seen.insert(input.prevout) {
				return Err("duplicate inputs".to_owned());
			}
		}
		if self.is_coinbase() {
			let len = self.inputs[0].script_sig.len();
			if len < 2 || len > 100 {
				return Err("bad coinbase script length".to_owned());
			}
		} else {
			for input in &self.inputs {
				if input.prevout.is_null() {
					return Err("null prevout on non-coinbase input".to_owned());
				}
			}
		}
		Ok(())
	}

	/// Legacy signature hash for input `index` with the given script code
	/// and sighash type.
	pub fn signature_hash(&self, index: usize, script_code: &Script, hashtype: u32) -> Hash {
		if is_sighash_single_bug(hashtype, index, self.outputs.len()) {
			// historical quirk: hashing resolves to the constant one
			return Hash::from_vec(&[1]);
		}

		let anyone = hashtype & SIGHASH_ANYONECANPAY != 0;
		let base = hashtype & SIGHASH_MASK;

		let mut hasher = HashWriter::default();
		hasher.write_i32(self.version).unwrap();

		// inputs
		if anyone {
			hasher.write_varint(1).unwrap();
			self.inputs[index].prevout.write(&mut hasher).unwrap();
			script_code.write(&mut hasher).unwrap();
			hasher.write_u32(self.inputs[index].sequence).unwrap();
		} else {
			hasher.write_varint(self.inputs.len() as u64).unwrap();
			for (i, input) in self.inputs.iter().enumerate() {
				input.prevout.write(&mut hasher).unwrap();
				if i == index {
					script_code.write(&mut hasher).unwrap();
				} else {
					Script::new().write(&mut hasher).unwrap();
				}
				let sequence = if i != index && (base == SIGHASH_NONE || base == SIGHASH_SINGLE) {
					0
				} else {
					input.sequence
				};
				hasher.write_u32(sequence).unwrap();
			}
		}

		// outputs
		match base {
			SIGHASH_NONE => hasher.write_varint(0).unwrap(),
			SIGHASH_SINGLE => {
				hasher.write_varint(index as u64 + 1).unwrap();
				for (i, output) in self.outputs.iter().take(index + 1).enumerate() {
					if i == index {
						output.write(&mut hasher).unwrap();
					} else {
						// "null" output placeholder
						hasher.write_u64(u64::max_value()).unwrap();
						Script::new().write(&mut hasher).unwrap();
					}
				}
			}
			_ => {
				hasher.write_varint(self.outputs.len() as u64).unwrap();
				for output in &self.outputs {
					output.write(&mut hasher).unwrap();
				}
			}
		}

		hasher.write_u32(self.lock_time).unwrap();
		hasher.write_u32(hashtype).unwrap();
		hasher.finalize()
	}

	/// BIP143 signature hash for version-0 witness spends of input
	/// `index` with the given spent value.
	pub fn witness_signature_hash(
		&self,
		index: usize,
		script_code: &Script,
		value: u64,
		hashtype: u32,
	) -> Hash {
		let anyone = hashtype & SIGHASH_ANYONECANPAY != 0;
		let base = hashtype & SIGHASH_MASK;

		let hash_prevouts = if anyone {
			ZERO_HASH
		} else {
			let mut hasher = HashWriter::default();
			for input in &self.inputs {
				input.prevout.write(&mut hasher).unwrap();
			}
			hasher.finalize()
		};

		let hash_sequences = if anyone || base == SIGHASH_NONE || base == SIGHASH_SINGLE {
			ZERO_HASH
		} else {
			let mut hasher = HashWriter::default();
			for input in &self.inputs {
				hasher.write_u32(input.sequence).unwrap();
			}
			hasher.finalize()
		};

		let hash_outputs = match base {
			SIGHASH_NONE => ZERO_HASH,
			SIGHASH_SINGLE => {
				if index < self.outputs.len() {
					let mut hasher = HashWriter::default();
					self.outputs[index].write(&mut hasher).unwrap();
					hasher.finalize()
				} else {
					ZERO_HASH
				}
			}
			_ => {
				let mut hasher = HashWriter::default();
				for output in &self.outputs {
					output.write(&mut hasher).unwrap();
				}
				hasher.finalize()
			}
		};

		let mut hasher = HashWriter::default();
		hasher.write_i32(self.version).unwrap();
		hash_prevouts.write(&mut hasher).unwrap();
		hash_sequences.write(&mut hasher).unwrap();
		self.inputs[index].prevout.write(&mut hasher).unwrap();
		script_code.write(&mut hasher).unwrap();
		hasher.write_u64(value).unwrap();
		hasher.write_u32(self.inputs[index].sequence).unwrap();
		hash_outputs.write(&mut hasher).unwrap();
		hasher.write_u32(self.lock_time).unwrap();
		hasher.write_u32(hashtype).unwrap();
		hasher.finalize()
	}
}

impl Writeable for Transaction {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.write_inner(writer, true)
	}
}

impl Readable for Transaction {
	fn read(reader: &mut dyn Reader) -> Result<Transaction, ser::Error> {
		let version = reader.read_i32()?;
		let mut input_count = reader.read_varint()?;

		// a zero "input count" is the segwit marker, followed by the
		// flag byte and the real count
		let segwit = input_count == 0;
		if segwit {
			reader.expect_u8(0x01)?;
			input_count = reader.read_varint()?;
		}
		if input_count > 100_000 {
			return Err(ser::Error::TooLargeReadErr(input_count));
		}

		let mut inputs = Vec::with_capacity(input_count as usize);
		for _ in 0..input_count {
			let prevout = OutPoint::read(reader)?;
			let script_sig = Script::read(reader)?;
			let sequence = reader.read_u32()?;
			inputs.push(TxIn {
				prevout,
				script_sig,
				sequence,
				witness: vec![],
			});
		}

		let output_count = reader.read_varint()?;
		if output_count > 100_000 {
			return Err(ser::Error::TooLargeReadErr(output_count));
		}
		let mut outputs = Vec::with_capacity(output_count as usize);
		for _ in 0..output_count {
			outputs.push(TxOut::read(reader)?);
		}

		if segwit {
			for input in inputs.iter_mut() {
				let item_count = reader.read_varint()?;
				if item_count > 10_000 {
					return Err(ser::Error::TooLargeReadErr(item_count));
				}
				let mut witness = Vec::with_capacity(item_count as usize);
				for _ in 0..item_count {
					witness.push(reader.read_bytes()?);
				}
				input.witness = witness;
			}
		}

		let lock_time = reader.read_u32()?;
		Ok(Transaction {
			version,
			inputs,
			outputs,
			lock_time,
		})
	}
}

impl Hashed for Transaction {
	fn hash(&self) -> Hash {
		Transaction::hash(self)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::ser::{deserialize, ser_vec};

	fn sample_tx() -> Transaction {
		let mut tx = Transaction::new();
		tx.inputs.push(TxIn::new(OutPoint::new(
			crate::core::hash::sha256d(b"prev"),
			1,
		)));
		tx.outputs
			.push(TxOut::new(40_000, Script::p2pkh(&[7u8; 20])));
		tx
	}

	#[test]
	fn serialization_roundtrip() {
		let tx = sample_tx();
		let bytes = ser_vec(&tx).unwrap();
		let decoded: Transaction = deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(decoded, tx);
	}

	#[test]
	fn witness_changes_wtxid_not_txid() {
		let mut tx = sample_tx();
		let txid = tx.hash();
		let wtxid = tx.witness_hash();
		assert_eq!(txid, wtxid);

		tx.inputs[0].witness = vec![vec![1, 2, 3]];
		assert_eq!(tx.hash(), txid);
		assert_ne!(tx.witness_hash(), wtxid);

		// witness serialization roundtrips too
		let bytes = ser_vec(&tx).unwrap();
		let decoded: Transaction = deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(decoded, tx);
	}

	#[test]
	fn weight_accounts_for_witness_discount() {
		let mut tx = sample_tx();
		let base_weight = tx.weight();
		assert_eq!(base_weight, tx.base_size() * 4);

		tx.inputs[0].witness = vec![vec![0u8; 72]];
		// witness bytes count once, non-witness bytes four times
		assert_eq!(tx.weight(), tx.base_size() * 3 + tx.total_size());
		assert!(tx.weight() < base_weight + 4 * 80);
	}

	#[test]
	fn finality_rules() {
		let mut tx = sample_tx();
		assert!(tx.is_final(100, 0));

		tx.lock_time = 101;
		tx.inputs[0].sequence = 0;
		assert!(!tx.is_final(100, 0));
		assert!(tx.is_final(102, 0));

		// final sequences override the locktime
		tx.inputs[0].sequence = 0xffff_ffff;
		assert!(tx.is_final(100, 0));

		// time-based locktime compares against median time
		tx.lock_time = LOCKTIME_THRESHOLD + 50;
		tx.inputs[0].sequence = 0;
		assert!(!tx.is_final(100, LOCKTIME_THRESHOLD as i64));
		assert!(tx.is_final(100, (LOCKTIME_THRESHOLD + 51) as i64));
	}

	#[test]
	fn sanity_rejects_garbage() {
		let mut tx = Transaction::new();
		assert!(tx.check_sanity().is_err());

		tx = sample_tx();
		assert!(tx.check_sanity().is_ok());

		// duplicate input
		let dup = tx.inputs[0].clone();
		tx.inputs.push(dup);
		assert!(tx.check_sanity().is_err());

		// output above the money supply
		tx = sample_tx();
		tx.outputs[0].value = MAX_MONEY + 1;
		assert!(tx.check_sanity().is_err());
	}

	#[test]
	fn sighash_single_bug_constant() {
		let tx = sample_tx();
		let h = tx.signature_hash(5, &Script::new(), SIGHASH_SINGLE);
		assert_eq!(h, Hash::from_vec(&[1]));
	}

	#[test]
	fn sighash_depends_on_type() {
		let tx = sample_tx();
		let code = Script::p2pkh(&[7u8; 20]);
		let all = tx.signature_hash(0, &code, SIGHASH_ALL);
		let none = tx.signature_hash(0, &code, SIGHASH_NONE);
		let anyone = tx.signature_hash(0, &code, SIGHASH_ALL | SIGHASH_ANYONECANPAY);
		assert_ne!(all, none);
		assert_ne!(all, anyone);

		let witness_all = tx.witness_signature_hash(0, &code, 40_000, SIGHASH_ALL);
		assert_ne!(witness_all, all);
		let witness_other_value = tx.witness_signature_hash(0, &code, 41_000, SIGHASH_ALL);
		assert_ne!(witness_all, witness_other_value);
	}
}
