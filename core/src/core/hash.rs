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

//! Hash Function
//!
//! Double-SHA256 as the ubiquitous hash primitive, with a convenience
//! writer to hash anything implementing the serialization traits. Hashes
//! are displayed in the customary reversed hex notation.

use ripemd160::Ripemd160;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::{fmt, ops};

use crate::ser::{self, Readable, Reader, Writeable, Writer};
use kestrel_util as util;

/// A hash consisting of all zeroes, used as a sentinel. No known preimage.
pub const ZERO_HASH: Hash = Hash([0; 32]);

/// A hash to uniquely (or close enough) identify one of the system's
/// blocks, transactions or scripts.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash(pub [u8; 32]);

impl fmt::Debug for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_hex())
	}
}

impl fmt::Display for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_hex())
	}
}

impl Hash {
	/// Builds a Hash from a byte vector. If the vector is too short, it will be
	/// completed by zeroes. If it's too long, it will be truncated.
	pub fn from_vec(v: &[u8]) -> Hash {
		let mut h = [0; 32];
		let copy_size = v.len().min(32);
		h[..copy_size].copy_from_slice(&v[..copy_size]);
		Hash(h)
	}

	/// Converts the hash to a byte vector
	pub fn to_vec(&self) -> Vec<u8> {
		self.0.to_vec()
	}

	/// The hash as a byte slice
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	/// Convert a hash to hex string format, reversed per the customary
	/// display byte order.
	pub fn to_hex(&self) -> String {
		let mut reversed = self.0;
		reversed.reverse();
		util::to_hex(reversed.to_vec())
	}

	/// Convert hex string (reversed byte order) back to hash.
	pub fn from_hex(hex: &str) -> Result<Hash, ser::Error> {
		let mut bytes = util::from_hex(hex.to_string()).map_err(|_| ser::Error::CorruptedData)?;
		if bytes.len() != 32 {
			return Err(ser::Error::CorruptedData);
		}
		bytes.reverse();
		Ok(Hash::from_vec(&bytes))
	}

	/// Whether this is the all-zero sentinel.
	pub fn is_zero(&self) -> bool {
		*self == ZERO_HASH
	}

	/// Compare the numeric value of this hash (interpreted as a 256-bit
	/// little-endian integer, as proof-of-work does) against a 32-byte
	/// big-endian target.
	pub fn cmp_target(&self, target: &[u8; 32]) -> Ordering {
		for i in 0..32 {
			let h = self.0[31 - i];
			let t = target[i];
			if h != t {
				return h.cmp(&t);
			}
		}
		Ordering::Equal
	}
}

impl ops::Index<usize> for Hash {
	type Output = u8;

	fn index(&self, idx: usize) -> &u8 {
		&self.0[idx]
	}
}

impl Writeable for Hash {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_fixed_bytes(&self.0)
	}
}

impl Readable for Hash {
	fn read(reader: &mut dyn Reader) -> Result<Hash, ser::Error> {
		let v = reader.read_fixed_bytes(32)?;
		Ok(Hash::from_vec(&v))
	}
}

/// One round of SHA256 over arbitrary data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
	let mut hasher = Sha256::new();
	hasher.input(data);
	let mut out = [0; 32];
	out.copy_from_slice(&hasher.result());
	out
}

/// The consensus hash function, double SHA256.
pub fn sha256d(data: &[u8]) -> Hash {
	Hash(sha256(&sha256(data)))
}

/// RIPEMD160 of SHA256, the script-level key and script hash function.
pub fn hash160(data: &[u8]) -> [u8; 20] {
	let mut hasher = Ripemd160::new();
	hasher.input(&sha256(data));
	let mut out = [0; 20];
	out.copy_from_slice(&hasher.result());
	out
}

/// Serializer that outputs a double-SHA256 of everything written to it.
pub struct HashWriter {
	state: Sha256,
}

impl HashWriter {
	/// Consume the `HashWriter`, outputting its current hash
	pub fn finalize(self) -> Hash {
		Hash(sha256(&self.state.result()))
	}
}

impl Default for HashWriter {
	fn default() -> HashWriter {
		HashWriter {
			state: Sha256::new(),
		}
	}
}

impl Writer for HashWriter {
	fn write_u8(&mut self, n: u8) -> Result<(), ser::Error> {
		self.state.input(&[n]);
		Ok(())
	}
	fn write_u16(&mut self, n: u16) -> Result<(), ser::Error> {
		self.state.input(&n.to_le_bytes());
		Ok(())
	}
	fn write_u32(&mut self, n: u32) -> Result<(), ser::Error> {
		self.state.input(&n.to_le_bytes());
		Ok(())
	}
	fn write_u64(&mut self, n: u64) -> Result<(), ser::Error> {
		self.state.input(&n.to_le_bytes());
		Ok(())
	}
	fn write_i32(&mut self, n: i32) -> Result<(), ser::Error> {
		self.state.input(&n.to_le_bytes());
		Ok(())
	}
	fn write_i64(&mut self, n: i64) -> Result<(), ser::Error> {
		self.state.input(&n.to_le_bytes());
		Ok(())
	}
	fn write_varint(&mut self, n: u64) -> Result<(), ser::Error> {
		match n {
			0..=0xfc => self.write_u8(n as u8),
			0xfd..=0xffff => {
				self.write_u8(0xfd)?;
				self.write_u16(n as u16)
			}
			0x1_0000..=0xffff_ffff => {
				self.write_u8(0xfe)?;
				self.write_u32(n as u32)
			}
			_ => {
				self.write_u8(0xff)?;
				self.write_u64(n)
			}
		}
	}
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), ser::Error> {
		self.state.input(bytes);
		Ok(())
	}
}

/// Types that opt into the default hash derivation: double SHA256 of the
/// full consensus serialization.
pub trait DefaultHashable: Writeable {}

/// A trait for types that get hashed into a unique identifier.
pub trait Hashed {
	/// Obtain the hash of the object
	fn hash(&self) -> Hash;
}

impl<T: DefaultHashable> Hashed for T {
	fn hash(&self) -> Hash {
		let mut hasher = HashWriter::default();
		// hashing cannot fail
		self.write(&mut hasher).unwrap();
		hasher.finalize()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn sha256d_known_vector() {
		// sha256d of the empty string
		let h = sha256d(b"");
		assert_eq!(
			util::to_hex(h.to_vec()),
			"5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
		);
	}

	#[test]
	fn display_is_reversed() {
		let mut bytes = [0u8; 32];
		bytes[0] = 0xab;
		let h = Hash(bytes);
		assert!(h.to_hex().ends_with("ab"));
		assert_eq!(Hash::from_hex(&h.to_hex()).unwrap(), h);
	}

	#[test]
	fn target_comparison() {
		let mut target = [0xffu8; 32];
		let h = sha256d(b"anything");
		assert_eq!(h.cmp_target(&target), Ordering::Less);
		target = [0u8; 32];
		assert_eq!(h.cmp_target(&target), Ordering::Greater);
		assert_eq!(ZERO_HASH.cmp_target(&target), Ordering::Equal);
	}
}
