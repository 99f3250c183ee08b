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

//! Script execution. Covers the push, stack, comparison, hashing,
//! signature and locktime opcodes that standard scripts are built from.
//! Flow-control opcodes are not executed; scripts containing them fail
//! with `BadOpcode` and standardness policy keeps them out of the pool.
//! The ECDSA math itself is delegated to libsecp256k1.

use secp256k1::{Message, PublicKey, Secp256k1, Signature, VerifyOnly};

use crate::consensus::{
	LOCKTIME_THRESHOLD, SEQUENCE_DISABLE_FLAG, SEQUENCE_MASK, SEQUENCE_TYPE_FLAG,
};
use crate::core::hash::{hash160, sha256};
use crate::core::script::{self, decode_script_num, Instruction, Script, VerifyFlags};
use crate::core::transaction::{Transaction, SIGHASH_MASK, SIGHASH_SINGLE};

use ripemd160::{Digest, Ripemd160};

lazy_static! {
	static ref SECP: Secp256k1<VerifyOnly> = Secp256k1::verification_only();
}

/// Script validation failure reasons. All of these are consensus
/// failures for the containing transaction.
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ScriptError {
	/// Script finished with a false or empty stack top
	#[fail(display = "script evaluated to false")]
	EvalFalse,
	/// OP_RETURN was executed
	#[fail(display = "early return")]
	EarlyReturn,
	/// OP_VERIFY (or a *VERIFY variant) failed
	#[fail(display = "verify failed")]
	VerifyFailed,
	/// An operation needed more stack elements than available
	#[fail(display = "stack underflow")]
	StackUnderflow,
	/// Opcode unknown or outside the supported execution subset
	#[fail(display = "bad or unsupported opcode: {}", _0)]
	BadOpcode(u8),
	/// A pushed element exceeded the size limit
	#[fail(display = "push size exceeded")]
	PushSize,
	/// Script exceeded the size limit
	#[fail(display = "script size exceeded")]
	ScriptSize,
	/// Too many non-push operations
	#[fail(display = "operation count exceeded")]
	OpCount,
	/// Stack grew beyond the limit
	#[fail(display = "stack size exceeded")]
	StackSize,
	/// A number push was not a valid script number
	#[fail(display = "invalid script number")]
	NumberOverflow,
	/// Multisig key or signature counts out of range
	#[fail(display = "multisig bounds exceeded")]
	MultisigBounds,
	/// The extra multisig stack element was not empty
	#[fail(display = "multisig dummy element not null")]
	NullDummy,
	/// Signature scriptsig for p2sh was not push-only
	#[fail(display = "scriptsig not push only")]
	SigPushOnly,
	/// Locktime requirement not satisfied
	#[fail(display = "locktime requirement not satisfied")]
	UnsatisfiedLocktime,
	/// Witness program and witness stack don't line up
	#[fail(display = "witness program mismatch")]
	WitnessProgramMismatch,
	/// Witness present where none was expected
	#[fail(display = "unexpected witness")]
	WitnessUnexpected,
	/// Malformed witness version or program
	#[fail(display = "witness malleated")]
	WitnessMalleated,
}

/// Signature hashing scheme to apply when checking a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigVersion {
	/// Legacy pre-witness hashing
	Base,
	/// BIP143 version 0 witness hashing
	WitnessV0,
}

/// The seam between script execution and the transaction context: the
/// interpreter asks an implementation of this trait to check signatures
/// and locktimes. Production code uses `TxChecker`; tests may stub it.
pub trait SignatureChecker {
	/// Check an ECDSA signature (with trailing sighash-type byte)
	/// against a public key over the appropriate sighash.
	fn check_sig(
		&self,
		sig: &[u8],
		pubkey: &[u8],
		script_code: &Script,
		sig_version: SigVersion,
	) -> bool;

	/// Check an absolute locktime requirement (BIP65).
	fn check_locktime(&self, locktime: i64) -> bool;

	/// Check a relative locktime requirement (BIP112).
	fn check_sequence(&self, sequence: i64) -> bool;
}

/// Checker bound to a concrete transaction input.
pub struct TxChecker<'a> {
	tx: &'a Transaction,
	index: usize,
	value: u64,
}

impl<'a> TxChecker<'a> {
	/// Bind a checker to input `index` of `tx` spending `value`.
	pub fn new(tx: &'a Transaction, index: usize, value: u64) -> TxChecker<'a> {
		TxChecker { tx, index, value }
	}
}

impl<'a> SignatureChecker for TxChecker<'a> {
	fn check_sig(
		&self,
		sig: &[u8],
		pubkey: &[u8],
		script_code: &Script,
		sig_version: SigVersion,
	) -> bool {
		if sig.is_empty() {
			return false;
		}
		let hashtype = sig[sig.len() - 1] as u32;
		let sig_der = &sig[..sig.len() - 1];

		let signature = match Signature::from_der_lax(sig_der) {
			Ok(s) => s,
			Err(_) => return false,
		};
		let key = match PublicKey::from_slice(pubkey) {
			Ok(k) => k,
			Err(_) => return false,
		};
		let sighash = match sig_version {
			SigVersion::Base => self.tx.signature_hash(self.index, script_code, hashtype),
			SigVersion::WitnessV0 => {
				self.tx
					.witness_signature_hash(self.index, script_code, self.value, hashtype)
			}
		};
		let msg = match Message::from_slice(sighash.as_bytes()) {
			Ok(m) => m,
			Err(_) => return false,
		};
		SECP.verify(&msg, &signature, &key).is_ok()
	}

	fn check_locktime(&self, locktime: i64) -> bool {
		if locktime < 0 {
			return false;
		}
		let locktime = locktime as u64;
		let tx_locktime = self.tx.lock_time as u64;
		let threshold = LOCKTIME_THRESHOLD as u64;

		// both must be on the same side of the threshold
		let same_kind = (tx_locktime < threshold && locktime < threshold)
			|| (tx_locktime >= threshold && locktime >= threshold);
		if !same_kind {
			return false;
		}
		if locktime > tx_locktime {
			return false;
		}
		// a final input would make the tx locktime inoperative
		self.tx.inputs[self.index].sequence != 0xffff_ffff
	}

	fn check_sequence(&self, sequence: i64) -> bool {
		if sequence < 0 {
			return false;
		}
		let sequence = sequence as u32;
		if sequence & SEQUENCE_DISABLE_FLAG != 0 {
			return true;
		}
		if self.tx.version < 2 {
			return false;
		}
		let tx_sequence = self.tx.inputs[self.index].sequence;
		if tx_sequence & SEQUENCE_DISABLE_FLAG != 0 {
			return false;
		}
		let mask = SEQUENCE_TYPE_FLAG | SEQUENCE_MASK;
		let required = sequence & mask;
		let actual = tx_sequence & mask;
		if (required & SEQUENCE_TYPE_FLAG) != (actual & SEQUENCE_TYPE_FLAG) {
			return false;
		}
		(required & SEQUENCE_MASK) <= (actual & SEQUENCE_MASK)
	}
}

type Stack = Vec<Vec<u8>>;

fn cast_to_bool(data: &[u8]) -> bool {
	for (i, b) in data.iter().enumerate() {
		if *b != 0 {
			// negative zero is false
			if i == data.len() - 1 && *b == 0x80 {
				return false;
			}
			return true;
		}
	}
	false
}

fn pop(stack: &mut Stack) -> Result<Vec<u8>, ScriptError> {
	stack.pop().ok_or(ScriptError::StackUnderflow)
}

/// Execute a single script against the stack.
pub fn eval_script<C: SignatureChecker>(
	script: &Script,
	stack: &mut Stack,
	checker: &C,
	sig_version: SigVersion,
	flags: VerifyFlags,
) -> Result<(), ScriptError> {
	if script.len() > script::MAX_SCRIPT_SIZE {
		return Err(ScriptError::ScriptSize);
	}

	let mut op_count = 0;
	for ins in script.instructions() {
		let ins = ins.map_err(|_| ScriptError::BadOpcode(0xff))?;

		if stack.len() > 1000 {
			return Err(ScriptError::StackSize);
		}

		match ins {
			Instruction::Push(data) => {
				if data.len() > script::MAX_PUSH_SIZE {
					return Err(ScriptError::PushSize);
				}
				stack.push(data);
			}
			Instruction::Op(op) => {
				op_count += 1;
				if op_count > script::MAX_OPS_PER_SCRIPT {
					return Err(ScriptError::OpCount);
				}
				match op {
					script::OP_NOP | script::OP_NOP1 | script::OP_CODESEPARATOR => (),
					script::OP_VERIFY => {
						let top = pop(stack)?;
						if !cast_to_bool(&top) {
							return Err(ScriptError::VerifyFailed);
						}
					}
					script::OP_RETURN => return Err(ScriptError::EarlyReturn),
					script::OP_DROP => {
						pop(stack)?;
					}
					script::OP_DUP => {
						let top = stack.last().ok_or(ScriptError::StackUnderflow)?.clone();
						stack.push(top);
					}
					script::OP_OVER => {
						if stack.len() < 2 {
							return Err(ScriptError::StackUnderflow);
						}
						let item = stack[stack.len() - 2].clone();
						stack.push(item);
					}
					script::OP_SWAP => {
						let len = stack.len();
						if len < 2 {
							return Err(ScriptError::StackUnderflow);
						}
						stack.swap(len - 1, len - 2);
					}
					script::OP_SIZE => {
						let len = stack.last().ok_or(ScriptError::StackUnderflow)?.len();
						stack.push(script::encode_script_num(len as i64));
					}
					script::OP_EQUAL | script::OP_EQUALVERIFY => {
						let a = pop(stack)?;
						let b = pop(stack)?;
						let equal = a == b;
						if op == script::OP_EQUALVERIFY {
							if !equal {
								return Err(ScriptError::VerifyFailed);
							}
						} else {
							stack.push(if equal { vec![1] } else { vec![] });
						}
					}
					script::OP_RIPEMD160 => {
						let top = pop(stack)?;
						let mut hasher = Ripemd160::new();
						hasher.input(&top);
						stack.push(hasher.result().to_vec());
					}
					script::OP_SHA256 => {
						let top = pop(stack)?;
						stack.push(sha256(&top).to_vec());
					}
					script::OP_HASH160 => {
						let top = pop(stack)?;
						stack.push(hash160(&top).to_vec());
					}
					script::OP_HASH256 => {
						let top = pop(stack)?;
						stack.push(sha256(&sha256(&top)).to_vec());
					}
					script::OP_CHECKSIG | script::OP_CHECKSIGVERIFY => {
						let pubkey = pop(stack)?;
						let sig = pop(stack)?;
						let ok = checker.check_sig(&sig, &pubkey, script, sig_version);
						if op == script::OP_CHECKSIGVERIFY {
							if !ok {
								return Err(ScriptError::VerifyFailed);
							}
						} else {
							stack.push(if ok { vec![1] } else { vec![] });
						}
					}
					script::OP_CHECKMULTISIG | script::OP_CHECKMULTISIGVERIFY => {
						let key_count = decode_script_num(&pop(stack)?, 4)
							.ok_or(ScriptError::NumberOverflow)?;
						if key_count < 0 || key_count as usize > script::MAX_PUBKEYS_PER_MULTISIG {
							return Err(ScriptError::MultisigBounds);
						}
						op_count += key_count as usize;
						if op_count > script::MAX_OPS_PER_SCRIPT {
							return Err(ScriptError::OpCount);
						}
						let mut keys = vec![];
						for _ in 0..key_count {
							keys.push(pop(stack)?);
						}
						let sig_count = decode_script_num(&pop(stack)?, 4)
							.ok_or(ScriptError::NumberOverflow)?;
						if sig_count < 0 || sig_count > key_count {
							return Err(ScriptError::MultisigBounds);
						}
						let mut sigs = vec![];
						for _ in 0..sig_count {
							sigs.push(pop(stack)?);
						}
						// the famous off-by-one: an extra element is consumed
						let dummy = pop(stack)?;
						if flags.contains(VerifyFlags::NULLDUMMY) && !dummy.is_empty() {
							return Err(ScriptError::NullDummy);
						}

						// signatures must match keys in order
						let mut ok = true;
						let mut key_iter = keys.iter();
						for sig in &sigs {
							let mut matched = false;
							while let Some(key) = key_iter.next() {
								if checker.check_sig(sig, key, script, sig_version) {
									matched = true;
									break;
								}
							}
							if !matched {
								ok = false;
								break;
							}
						}

						if op == script::OP_CHECKMULTISIGVERIFY {
							if !ok {
								return Err(ScriptError::VerifyFailed);
							}
						} else {
							stack.push(if ok { vec![1] } else { vec![] });
						}
					}
					script::OP_CHECKLOCKTIMEVERIFY => {
						if !flags.contains(VerifyFlags::CHECKLOCKTIMEVERIFY) {
							// plain OP_NOP2 before activation
							continue;
						}
						let top = stack.last().ok_or(ScriptError::StackUnderflow)?;
						let locktime =
							decode_script_num(top, 5).ok_or(ScriptError::NumberOverflow)?;
						if !checker.check_locktime(locktime) {
							return Err(ScriptError::UnsatisfiedLocktime);
						}
					}
					script::OP_CHECKSEQUENCEVERIFY => {
						if !flags.contains(VerifyFlags::CHECKSEQUENCEVERIFY) {
							// plain OP_NOP3 before activation
							continue;
						}
						let top = stack.last().ok_or(ScriptError::StackUnderflow)?;
						let sequence =
							decode_script_num(top, 5).ok_or(ScriptError::NumberOverflow)?;
						if !checker.check_sequence(sequence) {
							return Err(ScriptError::UnsatisfiedLocktime);
						}
					}
					op if op > script::OP_CHECKSEQUENCEVERIFY && op <= script::OP_NOP10 => (),
					other => return Err(ScriptError::BadOpcode(other)),
				}
			}
		}
	}
	Ok(())
}

/// Verify the spend of a single output: run the unlocking script, then
/// the locking script, dispatching into p2sh redeem scripts and witness
/// programs as the flags allow.
pub fn verify<C: SignatureChecker>(
	script_sig: &Script,
	script_pubkey: &Script,
	witness: &[Vec<u8>],
	checker: &C,
	flags: VerifyFlags,
) -> Result<(), ScriptError> {
	if flags.contains(VerifyFlags::P2SH) && script_pubkey.is_p2sh() && !script_sig.is_push_only() {
		return Err(ScriptError::SigPushOnly);
	}

	let mut stack: Stack = vec![];
	eval_script(script_sig, &mut stack, checker, SigVersion::Base, flags)?;
	let sig_stack = stack.clone();

	// native witness program: the scriptsig must be empty and the
	// witness carries the whole spend
	if flags.contains(VerifyFlags::WITNESS) {
		if let Some((version, program)) = script_pubkey.witness_program() {
			if !script_sig.is_empty() {
				return Err(ScriptError::WitnessMalleated);
			}
			return verify_witness_program(version, &program, witness, checker, flags);
		}
	}

	eval_script(script_pubkey, &mut stack, checker, SigVersion::Base, flags)?;
	check_final_stack(&stack)?;

	if flags.contains(VerifyFlags::P2SH) && script_pubkey.is_p2sh() {
		let mut redeem_stack = sig_stack;
		let redeem_bytes = pop(&mut redeem_stack)?;
		let redeem = Script::from_bytes(redeem_bytes);

		// p2sh-wrapped witness program
		if flags.contains(VerifyFlags::WITNESS) {
			if let Some((version, program)) = redeem.witness_program() {
				if !redeem_stack.is_empty() {
					return Err(ScriptError::WitnessMalleated);
				}
				return verify_witness_program(version, &program, witness, checker, flags);
			}
		}

		eval_script(&redeem, &mut redeem_stack, checker, SigVersion::Base, flags)?;
		check_final_stack(&redeem_stack)?;
		return Ok(());
	}

	if !witness.is_empty() && !flags.contains(VerifyFlags::WITNESS) {
		return Err(ScriptError::WitnessUnexpected);
	}

	Ok(())
}

fn verify_witness_program<C: SignatureChecker>(
	version: u8,
	program: &[u8],
	witness: &[Vec<u8>],
	checker: &C,
	flags: VerifyFlags,
) -> Result<(), ScriptError> {
	if version != 0 {
		// future witness versions are anyone-can-spend for now
		return Ok(());
	}
	match program.len() {
		20 => {
			// keyhash program: implicit pay-to-pubkey-hash
			if witness.len() != 2 {
				return Err(ScriptError::WitnessProgramMismatch);
			}
			let sig = &witness[0];
			let pubkey = &witness[1];
			if hash160(pubkey) != program[..] {
				return Err(ScriptError::WitnessProgramMismatch);
			}
			let mut hash = [0u8; 20];
			hash.copy_from_slice(program);
			let script_code = Script::p2pkh(&hash);
			if !checker.check_sig(sig, pubkey, &script_code, SigVersion::WitnessV0) {
				return Err(ScriptError::EvalFalse);
			}
			Ok(())
		}
		32 => {
			// scripthash program: last witness element is the script
			if witness.is_empty() {
				return Err(ScriptError::WitnessProgramMismatch);
			}
			let mut stack: Stack = witness.to_vec();
			let script_bytes = pop(&mut stack)?;
			if sha256(&script_bytes) != program[..] {
				return Err(ScriptError::WitnessProgramMismatch);
			}
			let witness_script = Script::from_bytes(script_bytes);
			eval_script(
				&witness_script,
				&mut stack,
				checker,
				SigVersion::WitnessV0,
				flags,
			)?;
			check_final_stack(&stack)
		}
		_ => Err(ScriptError::WitnessMalleated),
	}
}

fn check_final_stack(stack: &Stack) -> Result<(), ScriptError> {
	match stack.last() {
		Some(top) if cast_to_bool(top) => Ok(()),
		_ => Err(ScriptError::EvalFalse),
	}
}

/// A sighash type requests SIGHASH_SINGLE past the last output, which
/// legacy hashing resolves to a constant. Exposed for the transaction
/// hashing code.
pub fn is_sighash_single_bug(hashtype: u32, index: usize, outputs: usize) -> bool {
	(hashtype & SIGHASH_MASK) == SIGHASH_SINGLE && index >= outputs
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::script::{OP_CHECKMULTISIG, OP_IF};

	struct AlwaysValid;
	impl SignatureChecker for AlwaysValid {
		fn check_sig(&self, _: &[u8], _: &[u8], _: &Script, _: SigVersion) -> bool {
			true
		}
		fn check_locktime(&self, _: i64) -> bool {
			true
		}
		fn check_sequence(&self, _: i64) -> bool {
			true
		}
	}

	struct AlwaysInvalid;
	impl SignatureChecker for AlwaysInvalid {
		fn check_sig(&self, _: &[u8], _: &[u8], _: &Script, _: SigVersion) -> bool {
			false
		}
		fn check_locktime(&self, _: i64) -> bool {
			false
		}
		fn check_sequence(&self, _: i64) -> bool {
			false
		}
	}

	#[test]
	fn p2pkh_spend_happy_path() {
		let pubkey = [0x02u8; 33];
		let hash = hash160(&pubkey);
		let script_pubkey = Script::p2pkh(&hash);
		let mut script_sig = Script::new();
		script_sig.push_data(&[0x30, 0x45, 0x01]).push_data(&pubkey);

		verify(
			&script_sig,
			&script_pubkey,
			&[],
			&AlwaysValid,
			VerifyFlags::P2SH,
		)
		.unwrap();
	}

	#[test]
	fn p2pkh_wrong_pubkey_fails() {
		let script_pubkey = Script::p2pkh(&[9u8; 20]);
		let mut script_sig = Script::new();
		script_sig.push_data(&[0x30, 0x45, 0x01]).push_data(&[0x02u8; 33]);

		assert_eq!(
			verify(
				&script_sig,
				&script_pubkey,
				&[],
				&AlwaysValid,
				VerifyFlags::P2SH
			),
			Err(ScriptError::VerifyFailed)
		);
	}

	#[test]
	fn bad_signature_fails() {
		let pubkey = [0x02u8; 33];
		let script_pubkey = Script::p2pkh(&hash160(&pubkey));
		let mut script_sig = Script::new();
		script_sig.push_data(&[0x30, 0x45, 0x01]).push_data(&pubkey);

		assert_eq!(
			verify(
				&script_sig,
				&script_pubkey,
				&[],
				&AlwaysInvalid,
				VerifyFlags::P2SH
			),
			Err(ScriptError::EvalFalse)
		);
	}

	#[test]
	fn p2sh_redeem_script_runs() {
		// redeem script: OP_1 (trivially true)
		let redeem = {
			let mut s = Script::new();
			s.push_int(1);
			s
		};
		let mut redeem_hash = [0u8; 20];
		redeem_hash.copy_from_slice(&hash160(redeem.as_bytes()));
		let script_pubkey = Script::p2sh(&redeem_hash);
		let mut script_sig = Script::new();
		script_sig.push_data(redeem.as_bytes());

		verify(
			&script_sig,
			&script_pubkey,
			&[],
			&AlwaysValid,
			VerifyFlags::P2SH,
		)
		.unwrap();
	}

	#[test]
	fn p2wpkh_program_must_match_key() {
		let pubkey = vec![0x03u8; 33];
		let program = hash160(&pubkey);
		let script_pubkey = Script::p2wpkh(&program);
		let witness = vec![vec![0x30, 0x01], pubkey];

		verify(
			&Script::new(),
			&script_pubkey,
			&witness,
			&AlwaysValid,
			VerifyFlags::P2SH | VerifyFlags::WITNESS,
		)
		.unwrap();

		let bad_witness = vec![vec![0x30, 0x01], vec![0x02u8; 33]];
		assert_eq!(
			verify(
				&Script::new(),
				&script_pubkey,
				&bad_witness,
				&AlwaysValid,
				VerifyFlags::P2SH | VerifyFlags::WITNESS,
			),
			Err(ScriptError::WitnessProgramMismatch)
		);
	}

	#[test]
	fn multisig_counts_and_dummy() {
		// 1-of-2 with an empty dummy
		let mut script = Script::new();
		script
			.push_int(1)
			.push_data(&[2u8; 33])
			.push_data(&[3u8; 33])
			.push_int(2)
			.push_opcode(OP_CHECKMULTISIG);

		let mut stack = vec![vec![], vec![0x30, 0x01]];
		eval_script(
			&script,
			&mut stack,
			&AlwaysValid,
			SigVersion::Base,
			VerifyFlags::NULLDUMMY,
		)
		.unwrap();
		assert!(cast_to_bool(stack.last().unwrap()));

		// non-empty dummy rejected under NULLDUMMY
		let mut stack = vec![vec![1], vec![0x30, 0x01]];
		assert_eq!(
			eval_script(
				&script,
				&mut stack,
				&AlwaysValid,
				SigVersion::Base,
				VerifyFlags::NULLDUMMY,
			),
			Err(ScriptError::NullDummy)
		);
	}

	#[test]
	fn flow_control_is_rejected() {
		let mut script = Script::new();
		script.push_opcode(OP_IF);
		let mut stack = vec![vec![1]];
		assert_eq!(
			eval_script(
				&script,
				&mut stack,
				&AlwaysValid,
				SigVersion::Base,
				VerifyFlags::NONE,
			),
			Err(ScriptError::BadOpcode(OP_IF))
		);
	}
}
