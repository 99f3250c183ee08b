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

//! Script primitives: the byte-level script type, opcode constants,
//! standard output templates, signature-operation counting and the data
//! push iterator used by filters and the address index. Execution lives
//! in the `interpreter` module.

use std::fmt;

use crate::core::hash::sha256;
use crate::ser::{self, Readable, Reader, Writeable, Writer};
use kestrel_util as util;

/// Maximum serialized script size in bytes.
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Maximum size of a single pushed element.
pub const MAX_PUSH_SIZE: usize = 520;

/// Maximum number of non-push opcodes per script.
pub const MAX_OPS_PER_SCRIPT: usize = 201;

/// Maximum number of public keys in a checkmultisig.
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

/// An empty push, also the canonical "false" value.
pub const OP_0: u8 = 0x00;
/// The next byte holds the push length.
pub const OP_PUSHDATA1: u8 = 0x4c;
/// The next two bytes hold the push length.
pub const OP_PUSHDATA2: u8 = 0x4d;
/// The next four bytes hold the push length.
pub const OP_PUSHDATA4: u8 = 0x4e;
/// Push the number -1.
pub const OP_1NEGATE: u8 = 0x4f;
/// Push the number 1. OP_2 through OP_16 follow contiguously.
pub const OP_1: u8 = 0x51;
/// Push the number 16.
pub const OP_16: u8 = 0x60;
/// Does nothing.
pub const OP_NOP: u8 = 0x61;
/// Conditional execution (unsupported by the interpreter).
pub const OP_IF: u8 = 0x63;
/// Conditional execution (unsupported by the interpreter).
pub const OP_NOTIF: u8 = 0x64;
/// Conditional execution (unsupported by the interpreter).
pub const OP_ELSE: u8 = 0x67;
/// Conditional execution (unsupported by the interpreter).
pub const OP_ENDIF: u8 = 0x68;
/// Fail unless the top stack value is truthy.
pub const OP_VERIFY: u8 = 0x69;
/// Marks the output as unspendable.
pub const OP_RETURN: u8 = 0x6a;
/// Drop the top stack element.
pub const OP_DROP: u8 = 0x75;
/// Duplicate the top stack element.
pub const OP_DUP: u8 = 0x76;
/// Copy the second stack element to the top.
pub const OP_OVER: u8 = 0x78;
/// Swap the top two stack elements.
pub const OP_SWAP: u8 = 0x7c;
/// Push the size of the top element.
pub const OP_SIZE: u8 = 0x82;
/// Byte-wise equality.
pub const OP_EQUAL: u8 = 0x87;
/// OP_EQUAL then OP_VERIFY.
pub const OP_EQUALVERIFY: u8 = 0x88;
/// RIPEMD160 of the top element.
pub const OP_RIPEMD160: u8 = 0xa6;
/// SHA256 of the top element.
pub const OP_SHA256: u8 = 0xa8;
/// RIPEMD160 of SHA256 of the top element.
pub const OP_HASH160: u8 = 0xa9;
/// Double SHA256 of the top element.
pub const OP_HASH256: u8 = 0xaa;
/// Legacy signature-hash scoping marker, treated as a no-op.
pub const OP_CODESEPARATOR: u8 = 0xab;
/// ECDSA signature check.
pub const OP_CHECKSIG: u8 = 0xac;
/// OP_CHECKSIG then OP_VERIFY.
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
/// m-of-n ECDSA signature check.
pub const OP_CHECKMULTISIG: u8 = 0xae;
/// OP_CHECKMULTISIG then OP_VERIFY.
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;
/// First of the reserved no-op opcodes.
pub const OP_NOP1: u8 = 0xb0;
/// Absolute locktime check (BIP65), OP_NOP2 before activation.
pub const OP_CHECKLOCKTIMEVERIFY: u8 = 0xb1;
/// Relative locktime check (BIP112), OP_NOP3 before activation.
pub const OP_CHECKSEQUENCEVERIFY: u8 = 0xb2;
/// Last of the reserved no-op opcodes.
pub const OP_NOP10: u8 = 0xb9;

bitflags! {
	/// Script verification flags, assembled per-block from the active
	/// deployments.
	pub struct VerifyFlags: u32 {
		/// No additional rules, bare script evaluation.
		const NONE = 0b0000_0000;
		/// Evaluate pay-to-script-hash redeem scripts.
		const P2SH = 0b0000_0001;
		/// Enforce OP_CHECKLOCKTIMEVERIFY.
		const CHECKLOCKTIMEVERIFY = 0b0000_0010;
		/// Enforce OP_CHECKSEQUENCEVERIFY.
		const CHECKSEQUENCEVERIFY = 0b0000_0100;
		/// Evaluate witness programs.
		const WITNESS = 0b0000_1000;
		/// Require the multisig dummy element to be empty.
		const NULLDUMMY = 0b0001_0000;
	}
}

/// A single parsed script element: either a data push or an opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
	/// Pushed data (possibly empty, for OP_0).
	Push(Vec<u8>),
	/// A non-push opcode.
	Op(u8),
}

/// A script, locking or unlocking, as the raw byte stream it is defined
/// over by consensus.
#[derive(Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Script(Vec<u8>);

impl fmt::Debug for Script {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Script({})", util::to_hex(self.0.clone()))
	}
}

impl Script {
	/// An empty script.
	pub fn new() -> Script {
		Script(vec![])
	}

	/// Wrap raw script bytes.
	pub fn from_bytes(bytes: Vec<u8>) -> Script {
		Script(bytes)
	}

	/// The raw bytes of the script.
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	/// Serialized script length in bytes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Whether the script is zero bytes long.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Append a bare opcode.
	pub fn push_opcode(&mut self, op: u8) -> &mut Script {
		self.0.push(op);
		self
	}

	/// Append a minimally-encoded data push.
	pub fn push_data(&mut self, data: &[u8]) -> &mut Script {
		let len = data.len();
		if len == 0 {
			self.0.push(OP_0);
		} else if len == 1 && data[0] >= 1 && data[0] <= 16 {
			self.0.push(OP_1 + data[0] - 1);
		} else if len < OP_PUSHDATA1 as usize {
			self.0.push(len as u8);
			self.0.extend_from_slice(data);
		} else if len <= 0xff {
			self.0.push(OP_PUSHDATA1);
			self.0.push(len as u8);
			self.0.extend_from_slice(data);
		} else if len <= 0xffff {
			self.0.push(OP_PUSHDATA2);
			self.0.extend_from_slice(&(len as u16).to_le_bytes());
			self.0.extend_from_slice(data);
		} else {
			self.0.push(OP_PUSHDATA4);
			self.0.extend_from_slice(&(len as u32).to_le_bytes());
			self.0.extend_from_slice(data);
		}
		self
	}

	/// Append a push of a small integer, using the dedicated opcodes
	/// where possible.
	pub fn push_int(&mut self, n: i64) -> &mut Script {
		if n == 0 {
			self.0.push(OP_0);
		} else if n == -1 {
			self.0.push(OP_1NEGATE);
		} else if n >= 1 && n <= 16 {
			self.0.push(OP_1 + (n as u8) - 1);
		} else {
			let bytes = encode_script_num(n);
			self.push_data(&bytes);
		}
		self
	}

	/// Iterate over the script's parsed instructions.
	pub fn instructions(&self) -> Instructions<'_> {
		Instructions {
			data: &self.0,
			pos: 0,
		}
	}

	/// Whether the script consists of data pushes only.
	pub fn is_push_only(&self) -> bool {
		self.instructions().all(|ins| match ins {
			Ok(Instruction::Push(_)) => true,
			_ => false,
		})
	}

	/// All data pushes in the script, used for filter matching and
	/// address extraction.
	pub fn data_pushes(&self) -> Vec<Vec<u8>> {
		let mut out = vec![];
		for ins in self.instructions() {
			match ins {
				Ok(Instruction::Push(data)) => {
					if !data.is_empty() {
						out.push(data)
					}
				}
				Ok(Instruction::Op(_)) => (),
				Err(_) => break,
			}
		}
		out
	}

	/// Standard pay-to-pubkey-hash locking script.
	pub fn p2pkh(hash: &[u8; 20]) -> Script {
		let mut script = Script::new();
		script
			.push_opcode(OP_DUP)
			.push_opcode(OP_HASH160)
			.push_data(hash)
			.push_opcode(OP_EQUALVERIFY)
			.push_opcode(OP_CHECKSIG);
		script
	}

	/// Standard pay-to-script-hash locking script.
	pub fn p2sh(hash: &[u8; 20]) -> Script {
		let mut script = Script::new();
		script
			.push_opcode(OP_HASH160)
			.push_data(hash)
			.push_opcode(OP_EQUAL);
		script
	}

	/// Standard pay-to-pubkey locking script.
	pub fn p2pk(pubkey: &[u8]) -> Script {
		let mut script = Script::new();
		script.push_data(pubkey).push_opcode(OP_CHECKSIG);
		script
	}

	/// Version 0 witness keyhash locking script.
	pub fn p2wpkh(hash: &[u8; 20]) -> Script {
		let mut script = Script::new();
		script.push_opcode(OP_0).push_data(hash);
		script
	}

	/// Version 0 witness scripthash locking script.
	pub fn p2wsh(hash: &[u8; 32]) -> Script {
		let mut script = Script::new();
		script.push_opcode(OP_0).push_data(hash);
		script
	}

	/// Provably unspendable data-carrier output.
	pub fn null_data(data: &[u8]) -> Script {
		let mut script = Script::new();
		script.push_opcode(OP_RETURN).push_data(data);
		script
	}

	/// Whether this is the canonical pay-to-pubkey-hash template.
	pub fn is_p2pkh(&self) -> bool {
		self.0.len() == 25
			&& self.0[0] == OP_DUP
			&& self.0[1] == OP_HASH160
			&& self.0[2] == 20
			&& self.0[23] == OP_EQUALVERIFY
			&& self.0[24] == OP_CHECKSIG
	}

	/// Whether this is the canonical pay-to-script-hash template.
	pub fn is_p2sh(&self) -> bool {
		self.0.len() == 23 && self.0[0] == OP_HASH160 && self.0[1] == 20 && self.0[22] == OP_EQUAL
	}

	/// Whether this output is a data carrier.
	pub fn is_op_return(&self) -> bool {
		!self.0.is_empty() && self.0[0] == OP_RETURN
	}

	/// Decompose a witness program locking script into its version and
	/// program bytes.
	pub fn witness_program(&self) -> Option<(u8, Vec<u8>)> {
		if self.0.len() < 4 || self.0.len() > 42 {
			return None;
		}
		let version = match self.0[0] {
			OP_0 => 0,
			op if op >= OP_1 && op <= OP_16 => op - OP_1 + 1,
			_ => return None,
		};
		let push_len = self.0[1] as usize;
		if push_len < 2 || push_len > 40 || self.0.len() != push_len + 2 {
			return None;
		}
		Some((version, self.0[2..].to_vec()))
	}

	/// The hash the address index keys this output's script under.
	pub fn index_key(&self) -> [u8; 32] {
		sha256(&self.0)
	}

	/// Count legacy signature operations. With `accurate` set, a
	/// checkmultisig preceded by a small-integer push counts as that many
	/// operations rather than the worst-case twenty.
	pub fn sigops(&self, accurate: bool) -> usize {
		let mut count = 0;
		let mut last_push: Option<Vec<u8>> = None;
		for ins in self.instructions() {
			match ins {
				Ok(Instruction::Op(op)) => {
					match op {
						OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
						OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
							count += match last_push {
								Some(ref data)
									if accurate
										&& data.len() == 1 && data[0] >= 1 && data[0] <= 16 =>
								{
									data[0] as usize
								}
								_ => MAX_PUBKEYS_PER_MULTISIG,
							};
						}
						_ => (),
					}
					last_push = None;
				}
				Ok(Instruction::Push(data)) => last_push = Some(data),
				Err(_) => break,
			}
		}
		count
	}
}

impl Writeable for Script {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_bytes(&self.0)
	}
}

impl Readable for Script {
	fn read(reader: &mut dyn Reader) -> Result<Script, ser::Error> {
		let bytes = reader.read_bytes()?;
		Ok(Script(bytes))
	}
}

/// Iterator decoding a script byte stream into instructions.
pub struct Instructions<'a> {
	data: &'a [u8],
	pos: usize,
}

impl<'a> Iterator for Instructions<'a> {
	type Item = Result<Instruction, ()>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.pos >= self.data.len() {
			return None;
		}
		let op = self.data[self.pos];
		self.pos += 1;
		let push_len = match op {
			OP_0 => return Some(Ok(Instruction::Push(vec![]))),
			OP_1NEGATE => return Some(Ok(Instruction::Push(vec![0x81]))),
			n if n >= OP_1 && n <= OP_16 => {
				return Some(Ok(Instruction::Push(vec![n - OP_1 + 1])));
			}
			len if len < OP_PUSHDATA1 => len as usize,
			OP_PUSHDATA1 => {
				if self.pos >= self.data.len() {
					return Some(Err(()));
				}
				let len = self.data[self.pos] as usize;
				self.pos += 1;
				len
			}
			OP_PUSHDATA2 => {
				if self.pos + 2 > self.data.len() {
					return Some(Err(()));
				}
				let len =
					u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]) as usize;
				self.pos += 2;
				len
			}
			OP_PUSHDATA4 => {
				if self.pos + 4 > self.data.len() {
					return Some(Err(()));
				}
				let len = u32::from_le_bytes([
					self.data[self.pos],
					self.data[self.pos + 1],
					self.data[self.pos + 2],
					self.data[self.pos + 3],
				]) as usize;
				self.pos += 4;
				len
			}
			other => return Some(Ok(Instruction::Op(other))),
		};
		if self.pos + push_len > self.data.len() {
			return Some(Err(()));
		}
		let data = self.data[self.pos..self.pos + push_len].to_vec();
		self.pos += push_len;
		Some(Ok(Instruction::Push(data)))
	}
}

/// Encode an integer in the minimal script number format.
pub fn encode_script_num(value: i64) -> Vec<u8> {
	if value == 0 {
		return vec![];
	}
	let mut result = vec![];
	let negative = value < 0;
	let mut absvalue = value.abs() as u64;
	while absvalue > 0 {
		result.push((absvalue & 0xff) as u8);
		absvalue >>= 8;
	}
	// the most significant bit carries the sign, pad when occupied
	if result.last().unwrap() & 0x80 != 0 {
		result.push(if negative { 0x80 } else { 0x00 });
	} else if negative {
		let last = result.len() - 1;
		result[last] |= 0x80;
	}
	result
}

/// Decode a script number of at most `max_len` bytes.
pub fn decode_script_num(data: &[u8], max_len: usize) -> Option<i64> {
	if data.len() > max_len {
		return None;
	}
	if data.is_empty() {
		return Some(0);
	}
	let mut result: i64 = 0;
	for (i, b) in data.iter().enumerate() {
		if i == data.len() - 1 {
			result |= ((b & 0x7f) as i64) << (8 * i);
			if b & 0x80 != 0 {
				return Some(-result);
			}
		} else {
			result |= (*b as i64) << (8 * i);
		}
	}
	Some(result)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn template_detection() {
		let hash = [0x11u8; 20];
		assert!(Script::p2pkh(&hash).is_p2pkh());
		assert!(!Script::p2pkh(&hash).is_p2sh());
		assert!(Script::p2sh(&hash).is_p2sh());
		assert_eq!(Script::p2wpkh(&hash).witness_program(), Some((0, hash.to_vec())));
		assert_eq!(Script::p2pkh(&hash).witness_program(), None);
		assert!(Script::null_data(b"hello").is_op_return());
	}

	#[test]
	fn push_roundtrip() {
		let mut script = Script::new();
		script.push_data(&[0xaa; 100]).push_data(&[0xbb; 3]).push_int(5);
		let parsed: Vec<_> = script.instructions().collect::<Result<_, _>>().unwrap();
		assert_eq!(
			parsed,
			vec![
				Instruction::Push(vec![0xaa; 100]),
				Instruction::Push(vec![0xbb; 3]),
				Instruction::Push(vec![5]),
			]
		);
		assert!(script.is_push_only());
	}

	#[test]
	fn truncated_push_errors() {
		let script = Script::from_bytes(vec![0x4b, 0x01]);
		assert!(script.instructions().any(|i| i.is_err()));
	}

	#[test]
	fn sigops_counting() {
		let hash = [0u8; 20];
		assert_eq!(Script::p2pkh(&hash).sigops(false), 1);

		// 2-of-3 multisig: worst case vs accurate
		let mut multisig = Script::new();
		multisig
			.push_int(2)
			.push_data(&[2u8; 33])
			.push_data(&[3u8; 33])
			.push_data(&[4u8; 33])
			.push_int(3)
			.push_opcode(OP_CHECKMULTISIG);
		assert_eq!(multisig.sigops(false), 20);
		assert_eq!(multisig.sigops(true), 3);
	}

	#[test]
	fn script_num_roundtrip() {
		for n in &[0i64, 1, -1, 127, 128, -128, 255, 256, 0x7fffffff, -0x7fffffff] {
			let encoded = encode_script_num(*n);
			assert_eq!(decode_script_num(&encoded, 5), Some(*n));
		}
		assert_eq!(decode_script_num(&[1, 2, 3, 4, 5, 6], 5), None);
	}
}
