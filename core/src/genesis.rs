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

//! Definition of the genesis block for the various chain types. The
//! genesis block is trusted by construction, the chain bootstraps from
//! it without running it through validation.

use crate::consensus::COIN;
use crate::core::block::{Block, BlockHeader};
use crate::core::script::{Script, OP_CHECKSIG};
use crate::core::transaction::{OutPoint, Transaction, TxIn, TxOut};

const GENESIS_TEXT: &[u8] = b"The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

const GENESIS_PUBKEY: [u8; 65] = [
	0x04, 0x67, 0x8a, 0xfd, 0xb0, 0xfe, 0x55, 0x48, 0x27, 0x19, 0x67, 0xf1, 0xa6, 0x71, 0x30,
	0xb7, 0x10, 0x5c, 0xd6, 0xa8, 0x28, 0xe0, 0x39, 0x09, 0xa6, 0x79, 0x62, 0xe0, 0xea, 0x1f,
	0x61, 0xde, 0xb6, 0x49, 0xf6, 0xbc, 0x3f, 0x4c, 0xef, 0x38, 0xc4, 0xf3, 0x55, 0x04, 0xe5,
	0x1e, 0xc1, 0x12, 0xde, 0x5c, 0x38, 0x4d, 0xf7, 0xba, 0x0b, 0x8d, 0x57, 0x8a, 0x4c, 0x70,
	0x2b, 0x6b, 0xf1, 0x1d, 0x5f,
];

// The genesis coinbase is reproduced byte for byte, including the
// original non-minimal pushes, so the historical hashes come out.
fn genesis_tx(bits: u32) -> Transaction {
	let mut script_sig = vec![];
	script_sig.push(0x04);
	script_sig.extend_from_slice(&bits.to_le_bytes());
	script_sig.push(0x01);
	script_sig.push(0x04);
	script_sig.push(GENESIS_TEXT.len() as u8);
	script_sig.extend_from_slice(GENESIS_TEXT);

	let mut script_pubkey = Script::new();
	script_pubkey.push_data(&GENESIS_PUBKEY).push_opcode(OP_CHECKSIG);

	Transaction {
		version: 1,
		inputs: vec![TxIn {
			prevout: OutPoint::null(),
			script_sig: Script::from_bytes(script_sig),
			sequence: 0xffff_ffff,
			witness: vec![],
		}],
		outputs: vec![TxOut::new(50 * COIN, script_pubkey)],
		lock_time: 0,
	}
}

fn genesis_block(version: i32, timestamp: u32, bits: u32, nonce: u32) -> Block {
	let tx = genesis_tx(0x1d00_ffff);
	let mut block = Block {
		header: BlockHeader {
			version,
			timestamp,
			bits,
			nonce,
			..Default::default()
		},
		txs: vec![tx],
	};
	let (root, _) = block.merkle_root();
	block.header.merkle_root = root;
	block
}

/// The main network genesis block.
pub fn genesis_main() -> Block {
	genesis_block(1, 1_231_006_505, 0x1d00_ffff, 2_083_236_893)
}

/// The test network genesis block.
pub fn genesis_testnet() -> Block {
	genesis_block(1, 1_296_688_602, 0x1d00_ffff, 414_098_458)
}

/// Genesis block for automated testing: trivial difficulty.
pub fn genesis_dev() -> Block {
	genesis_block(1, 1_296_688_602, 0x207f_ffff, 2)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::hash::Hashed;

	#[test]
	fn genesis_commits_to_its_coinbase() {
		let block = genesis_main();
		let (root, mutated) = block.merkle_root();
		assert!(!mutated);
		assert_eq!(block.header.merkle_root, root);
		assert_eq!(root, block.txs[0].hash());
		block.check_sanity().unwrap();
	}

	#[test]
	fn networks_differ() {
		assert_ne!(genesis_main().hash(), genesis_testnet().hash());
		assert_ne!(genesis_main().hash(), genesis_dev().hash());
	}
}
