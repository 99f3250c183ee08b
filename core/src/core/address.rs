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

//! Address encoding: base58check for the legacy hash types, bech32 for
//! witness programs. Addresses are a presentation-layer concept; the
//! consensus-facing form is always the locking script they expand to.

use std::fmt;
use std::str::FromStr;

use crate::core::hash::{sha256, Hash};
use crate::core::script::Script;
use crate::global;

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BECH32_ALPHABET: &[u8] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// Address decoding failures.
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum AddressError {
	/// Not decodable in any known encoding
	#[fail(display = "unparseable address")]
	Unparseable,
	/// Checksum mismatch
	#[fail(display = "bad address checksum")]
	BadChecksum,
	/// Valid encoding, unknown version or network prefix
	#[fail(display = "unknown address prefix")]
	UnknownPrefix,
	/// Witness program of invalid size for its version
	#[fail(display = "invalid witness program")]
	InvalidProgram,
}

/// A standard address, one of the script templates the node indexes and
/// can pay to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
	/// Pay to pubkey hash.
	P2PKH([u8; 20]),
	/// Pay to script hash.
	P2SH([u8; 20]),
	/// Version 0 witness keyhash.
	P2WPKH([u8; 20]),
	/// Version 0 witness scripthash.
	P2WSH([u8; 32]),
}

impl Address {
	/// The locking script this address stands for.
	pub fn to_script(&self) -> Script {
		match self {
			Address::P2PKH(hash) => Script::p2pkh(hash),
			Address::P2SH(hash) => Script::p2sh(hash),
			Address::P2WPKH(hash) => Script::p2wpkh(hash),
			Address::P2WSH(hash) => Script::p2wsh(hash),
		}
	}

	/// Recover the address form of a locking script, where one exists.
	pub fn from_script(script: &Script) -> Option<Address> {
		let bytes = script.as_bytes();
		if script.is_p2pkh() {
			let mut hash = [0u8; 20];
			hash.copy_from_slice(&bytes[3..23]);
			return Some(Address::P2PKH(hash));
		}
		if script.is_p2sh() {
			let mut hash = [0u8; 20];
			hash.copy_from_slice(&bytes[2..22]);
			return Some(Address::P2SH(hash));
		}
		if let Some((0, program)) = script.witness_program() {
			if program.len() == 20 {
				let mut hash = [0u8; 20];
				hash.copy_from_slice(&program);
				return Some(Address::P2WPKH(hash));
			}
			if program.len() == 32 {
				let mut hash = [0u8; 32];
				hash.copy_from_slice(&program);
				return Some(Address::P2WSH(hash));
			}
		}
		None
	}

	/// The key the address index files this address's outputs under.
	pub fn index_key(&self) -> [u8; 32] {
		sha256(self.to_script().as_bytes())
	}

	/// Derive the address of a public key (pay-to-pubkey-hash).
	pub fn from_pubkey(pubkey: &[u8]) -> Address {
		Address::P2PKH(crate::core::hash::hash160(pubkey))
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Address::P2PKH(hash) => {
				write!(f, "{}", base58check_encode(global::p2pkh_version(), hash))
			}
			Address::P2SH(hash) => {
				write!(f, "{}", base58check_encode(global::p2sh_version(), hash))
			}
			Address::P2WPKH(hash) => write!(f, "{}", bech32_encode(&global::bech32_hrp(), 0, hash)),
			Address::P2WSH(hash) => write!(f, "{}", bech32_encode(&global::bech32_hrp(), 0, hash)),
		}
	}
}

impl FromStr for Address {
	type Err = AddressError;

	fn from_str(s: &str) -> Result<Address, AddressError> {
		// bech32 addresses carry the current network's prefix
		let hrp = global::bech32_hrp();
		if s.to_lowercase().starts_with(&format!("{}1", hrp)) {
			let (version, program) = bech32_decode(&hrp, s)?;
			if version != 0 {
				return Err(AddressError::UnknownPrefix);
			}
			return match program.len() {
				20 => {
					let mut hash = [0u8; 20];
					hash.copy_from_slice(&program);
					Ok(Address::P2WPKH(hash))
				}
				32 => {
					let mut hash = [0u8; 32];
					hash.copy_from_slice(&program);
					Ok(Address::P2WSH(hash))
				}
				_ => Err(AddressError::InvalidProgram),
			};
		}

		let (version, payload) = base58check_decode(s)?;
		if payload.len() != 20 {
			return Err(AddressError::Unparseable);
		}
		let mut hash = [0u8; 20];
		hash.copy_from_slice(&payload);
		if version == global::p2pkh_version() {
			Ok(Address::P2PKH(hash))
		} else if version == global::p2sh_version() {
			Ok(Address::P2SH(hash))
		} else {
			Err(AddressError::UnknownPrefix)
		}
	}
}

fn base58_encode(data: &[u8]) -> String {
	let mut digits: Vec<u8> = vec![];
	for byte in data {
		let mut carry = *byte as u32;
		for digit in digits.iter_mut() {
			carry += (*digit as u32) << 8;
			*digit = (carry % 58) as u8;
			carry /= 58;
		}
		while carry > 0 {
			digits.push((carry % 58) as u8);
			carry /= 58;
		}
	}
	let mut out = String::new();
	for byte in data {
		if *byte != 0 {
			break;
		}
		out.push('1');
	}
	for digit in digits.iter().rev() {
		out.push(BASE58_ALPHABET[*digit as usize] as char);
	}
	out
}

fn base58_decode(s: &str) -> Result<Vec<u8>, AddressError> {
	let mut bytes: Vec<u8> = vec![];
	for c in s.bytes() {
		let value = BASE58_ALPHABET
			.iter()
			.position(|a| *a == c)
			.ok_or(AddressError::Unparseable)? as u32;
		let mut carry = value;
		for byte in bytes.iter_mut() {
			carry += (*byte as u32) * 58;
			*byte = (carry & 0xff) as u8;
			carry >>= 8;
		}
		while carry > 0 {
			bytes.push((carry & 0xff) as u8);
			carry >>= 8;
		}
	}
	for c in s.bytes() {
		if c != b'1' {
			break;
		}
		bytes.push(0);
	}
	bytes.reverse();
	Ok(bytes)
}

fn base58check_encode(version: u8, payload: &[u8]) -> String {
	let mut data = vec![version];
	data.extend_from_slice(payload);
	let checksum = Hash(sha256(&sha256(&data)));
	data.extend_from_slice(&checksum.as_bytes()[..4]);
	base58_encode(&data)
}

fn base58check_decode(s: &str) -> Result<(u8, Vec<u8>), AddressError> {
	let data = base58_decode(s)?;
	if data.len() < 5 {
		return Err(AddressError::Unparseable);
	}
	let (body, checksum) = data.split_at(data.len() - 4);
	let expected = sha256(&sha256(body));
	if checksum != &expected[..4] {
		return Err(AddressError::BadChecksum);
	}
	Ok((body[0], body[1..].to_vec()))
}

const BECH32_GENERATORS: [u32; 5] = [
	0x3b6a_57b2,
	0x2650_8e6d,
	0x1ea1_19fa,
	0x3d42_33dd,
	0x2a14_62b3,
];

fn bech32_polymod(values: &[u8]) -> u32 {
	let mut chk: u32 = 1;
	for v in values {
		let top = chk >> 25;
		chk = ((chk & 0x01ff_ffff) << 5) ^ (*v as u32);
		for (i, gen) in BECH32_GENERATORS.iter().enumerate() {
			if (top >> i) & 1 == 1 {
				chk ^= gen;
			}
		}
	}
	chk
}

fn bech32_hrp_expand(hrp: &str) -> Vec<u8> {
	let mut out = vec![];
	for c in hrp.bytes() {
		out.push(c >> 5);
	}
	out.push(0);
	for c in hrp.bytes() {
		out.push(c & 31);
	}
	out
}

fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Option<Vec<u8>> {
	let mut acc: u32 = 0;
	let mut bits: u32 = 0;
	let mut out = vec![];
	let maxv: u32 = (1 << to) - 1;
	for value in data {
		let value = *value as u32;
		if value >> from != 0 {
			return None;
		}
		acc = (acc << from) | value;
		bits += from;
		while bits >= to {
			bits -= to;
			out.push(((acc >> bits) & maxv) as u8);
		}
	}
	if pad {
		if bits > 0 {
			out.push(((acc << (to - bits)) & maxv) as u8);
		}
	} else if bits >= from || ((acc << (to - bits)) & maxv) != 0 {
		return None;
	}
	Some(out)
}

fn bech32_encode(hrp: &str, version: u8, program: &[u8]) -> String {
	let mut data = vec![version];
	data.extend(convert_bits(program, 8, 5, true).unwrap());

	let mut values = bech32_hrp_expand(hrp);
	values.extend_from_slice(&data);
	values.extend_from_slice(&[0; 6]);
	let polymod = bech32_polymod(&values) ^ 1;

	let mut out = String::from(hrp);
	out.push('1');
	for d in &data {
		out.push(BECH32_ALPHABET[*d as usize] as char);
	}
	for i in 0..6 {
		let d = (polymod >> (5 * (5 - i))) & 31;
		out.push(BECH32_ALPHABET[d as usize] as char);
	}
	out
}

fn bech32_decode(expected_hrp: &str, s: &str) -> Result<(u8, Vec<u8>), AddressError> {
	let s = s.to_lowercase();
	let sep = s.rfind('1').ok_or(AddressError::Unparseable)?;
	let (hrp, rest) = s.split_at(sep);
	let rest = &rest[1..];
	if hrp != expected_hrp || rest.len() < 7 {
		return Err(AddressError::UnknownPrefix);
	}

	let mut data = vec![];
	for c in rest.bytes() {
		let value = BECH32_ALPHABET
			.iter()
			.position(|a| *a == c)
			.ok_or(AddressError::Unparseable)? as u8;
		data.push(value);
	}

	let mut values = bech32_hrp_expand(hrp);
	values.extend_from_slice(&data);
	if bech32_polymod(&values) != 1 {
		return Err(AddressError::BadChecksum);
	}

	let payload = &data[..data.len() - 6];
	if payload.is_empty() {
		return Err(AddressError::InvalidProgram);
	}
	let version = payload[0];
	if version > 16 {
		return Err(AddressError::InvalidProgram);
	}
	let program = convert_bits(&payload[1..], 5, 8, false).ok_or(AddressError::InvalidProgram)?;
	if program.len() < 2 || program.len() > 40 {
		return Err(AddressError::InvalidProgram);
	}
	Ok((version, program))
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn legacy_roundtrip() {
		let addr = Address::P2PKH([0x55; 20]);
		let s = addr.to_string();
		assert_eq!(s.parse::<Address>().unwrap(), addr);

		let script_addr = Address::P2SH([0x66; 20]);
		let s = script_addr.to_string();
		assert_eq!(s.parse::<Address>().unwrap(), script_addr);
	}

	#[test]
	fn witness_roundtrip() {
		let addr = Address::P2WPKH([0x77; 20]);
		let s = addr.to_string();
		assert_eq!(s.parse::<Address>().unwrap(), addr);

		let addr = Address::P2WSH([0x88; 32]);
		let s = addr.to_string();
		assert_eq!(s.parse::<Address>().unwrap(), addr);
	}

	#[test]
	fn checksum_is_enforced() {
		let addr = Address::P2PKH([0x55; 20]);
		let mut s = addr.to_string();
		// flip the final character
		let last = s.pop().unwrap();
		s.push(if last == '2' { '3' } else { '2' });
		assert!(s.parse::<Address>().is_err());
	}

	#[test]
	fn script_address_roundtrip() {
		for addr in &[
			Address::P2PKH([1; 20]),
			Address::P2SH([2; 20]),
			Address::P2WPKH([3; 20]),
			Address::P2WSH([4; 32]),
		] {
			assert_eq!(Address::from_script(&addr.to_script()).as_ref(), Some(addr));
		}
	}

	#[test]
	fn index_key_matches_script_key() {
		let addr = Address::P2PKH([9; 20]);
		assert_eq!(addr.index_key(), addr.to_script().index_key());
	}
}
