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

//! Probabilistic transaction filter in the classic murmur3 bloom form,
//! used by the chain rescan to pick out blocks relevant to a set of
//! scripts and outpoints.

use crate::core::transaction::{OutPoint, Transaction};
use crate::ser::{self, ser_vec, Readable, Reader, Writeable, Writer};

/// Largest filter size in bytes.
pub const MAX_BLOOM_FILTER_SIZE: usize = 36_000;

/// Largest number of hash functions.
pub const MAX_HASH_FUNCS: u32 = 50;

const LN2_SQUARED: f64 = 0.480_453_013_918_201_4;
const LN2: f64 = 0.693_147_180_559_945_3;

/// A bloom filter over arbitrary byte elements.
#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilter {
	data: Vec<u8>,
	n_hash_funcs: u32,
	tweak: u32,
}

impl BloomFilter {
	/// Size a filter for the expected number of elements and false
	/// positive rate.
	pub fn new(elements: usize, fp_rate: f64, tweak: u32) -> BloomFilter {
		let elements = elements.max(1) as f64;
		let size = (-1.0 / LN2_SQUARED * elements * fp_rate.ln() / 8.0) as usize;
		let size = size.max(1).min(MAX_BLOOM_FILTER_SIZE);
		let n_hash_funcs = ((size * 8) as f64 / elements * LN2) as u32;
		let n_hash_funcs = n_hash_funcs.max(1).min(MAX_HASH_FUNCS);
		BloomFilter {
			data: vec![0; size],
			n_hash_funcs,
			tweak,
		}
	}

	fn bit_index(&self, n: u32, data: &[u8]) -> usize {
		let seed = n
			.wrapping_mul(0xfba4_c795)
			.wrapping_add(self.tweak);
		(murmur3(seed, data) as usize) % (self.data.len() * 8)
	}

	/// Add an element to the filter.
	pub fn insert(&mut self, data: &[u8]) {
		for n in 0..self.n_hash_funcs {
			let idx = self.bit_index(n, data);
			self.data[idx >> 3] |= 1 << (idx & 7);
		}
	}

	/// Whether the element is (probably) in the filter.
	pub fn contains(&self, data: &[u8]) -> bool {
		for n in 0..self.n_hash_funcs {
			let idx = self.bit_index(n, data);
			if self.data[idx >> 3] & (1 << (idx & 7)) == 0 {
				return false;
			}
		}
		true
	}

	/// Add an outpoint, in its serialized form.
	pub fn insert_outpoint(&mut self, outpoint: &OutPoint) {
		let bytes = ser_vec(outpoint).unwrap();
		self.insert(&bytes);
	}

	/// Whether the serialized outpoint is (probably) in the filter.
	pub fn contains_outpoint(&self, outpoint: &OutPoint) -> bool {
		let bytes = ser_vec(outpoint).unwrap();
		self.contains(&bytes)
	}

	/// Test a transaction against the filter: its id, the data pushes of
	/// its output scripts, its spent outpoints and the pushes of its
	/// input scripts. On an output match, the created outpoint is added
	/// to the filter so later blocks spending it keep matching.
	pub fn matches_tx(&mut self, tx: &Transaction) -> bool {
		let mut matched = self.contains(tx.hash().as_bytes());

		for (index, output) in tx.outputs.iter().enumerate() {
			for push in output.script_pubkey.data_pushes() {
				if self.contains(&push) {
					matched = true;
					self.insert_outpoint(&OutPoint::new(tx.hash(), index as u32));
					break;
				}
			}
		}
		if matched {
			return true;
		}

		for input in &tx.inputs {
			if self.contains_outpoint(&input.prevout) {
				return true;
			}
			for push in input.script_sig.data_pushes() {
				if self.contains(&push) {
					return true;
				}
			}
		}
		false
	}
}

impl Writeable for BloomFilter {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_bytes(&self.data)?;
		writer.write_u32(self.n_hash_funcs)?;
		writer.write_u32(self.tweak)
	}
}

impl Readable for BloomFilter {
	fn read(reader: &mut dyn Reader) -> Result<BloomFilter, ser::Error> {
		let data = reader.read_bytes()?;
		if data.is_empty() || data.len() > MAX_BLOOM_FILTER_SIZE {
			return Err(ser::Error::CorruptedData);
		}
		let n_hash_funcs = reader.read_u32()?;
		if n_hash_funcs == 0 || n_hash_funcs > MAX_HASH_FUNCS {
			return Err(ser::Error::CorruptedData);
		}
		let tweak = reader.read_u32()?;
		Ok(BloomFilter {
			data,
			n_hash_funcs,
			tweak,
		})
	}
}

/// 32-bit murmur3, the hash the filter format prescribes.
pub fn murmur3(seed: u32, data: &[u8]) -> u32 {
	const C1: u32 = 0xcc9e_2d51;
	const C2: u32 = 0x1b87_3593;

	let mut h1 = seed;
	let chunks = data.chunks_exact(4);
	let tail = chunks.remainder();

	for chunk in chunks {
		let mut k1 = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
		k1 = k1.wrapping_mul(C1);
		k1 = k1.rotate_left(15);
		k1 = k1.wrapping_mul(C2);
		h1 ^= k1;
		h1 = h1.rotate_left(13);
		h1 = h1.wrapping_mul(5).wrapping_add(0xe654_6b64);
	}

	let mut k1: u32 = 0;
	for (i, b) in tail.iter().enumerate() {
		k1 ^= (*b as u32) << (8 * i);
	}
	if !tail.is_empty() {
		k1 = k1.wrapping_mul(C1);
		k1 = k1.rotate_left(15);
		k1 = k1.wrapping_mul(C2);
		h1 ^= k1;
	}

	h1 ^= data.len() as u32;
	h1 ^= h1 >> 16;
	h1 = h1.wrapping_mul(0x85eb_ca6b);
	h1 ^= h1 >> 13;
	h1 = h1.wrapping_mul(0xc2b2_ae35);
	h1 ^= h1 >> 16;
	h1
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::hash::sha256d;
	use crate::core::script::Script;
	use crate::core::transaction::{TxIn, TxOut};

	#[test]
	fn murmur3_vectors() {
		// reference vectors for the x86 32-bit variant
		assert_eq!(murmur3(0x0000_0000, b""), 0x0000_0000);
		assert_eq!(murmur3(0x0000_0001, b""), 0x514e_28b7);
		assert_eq!(murmur3(0xffff_ffff, b""), 0x81f1_6f39);
		assert_eq!(murmur3(0x0000_0000, &[0xff, 0xff, 0xff, 0xff]), 0x7629_3b50);
	}

	#[test]
	fn insert_and_contains() {
		let mut filter = BloomFilter::new(10, 0.0001, 0);
		filter.insert(b"element one");
		filter.insert(b"element two");
		assert!(filter.contains(b"element one"));
		assert!(filter.contains(b"element two"));
		assert!(!filter.contains(b"element three"));
	}

	#[test]
	fn matches_tx_by_output_and_then_by_spend() {
		let payload = [0x42u8; 20];
		let mut filter = BloomFilter::new(10, 0.0001, 12345);
		filter.insert(&payload);

		let mut funding = Transaction::new();
		funding
			.inputs
			.push(TxIn::new(OutPoint::new(sha256d(b"x"), 0)));
		funding
			.outputs
			.push(TxOut::new(1000, Script::p2pkh(&payload)));

		assert!(filter.matches_tx(&funding));

		// the outpoint created above was auto-inserted, so a spend of it
		// matches even though it carries no filtered data itself
		let mut spend = Transaction::new();
		spend
			.inputs
			.push(TxIn::new(OutPoint::new(funding.hash(), 0)));
		spend.outputs.push(TxOut::new(900, Script::p2pkh(&[9u8; 20])));
		assert!(filter.matches_tx(&spend));

		// an unrelated tx does not match
		let mut other = Transaction::new();
		other
			.inputs
			.push(TxIn::new(OutPoint::new(sha256d(b"y"), 1)));
		other.outputs.push(TxOut::new(5, Script::p2pkh(&[8u8; 20])));
		assert!(!filter.matches_tx(&other));
	}

	#[test]
	fn serialization_roundtrip() {
		let mut filter = BloomFilter::new(100, 0.001, 99);
		filter.insert(b"data");
		let bytes = ser_vec(&filter).unwrap();
		let decoded: BloomFilter = crate::ser::deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(decoded, filter);
	}
}
