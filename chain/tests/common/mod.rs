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

//! Common test functions: a chain over a scratch directory, a block
//! "miner" grinding the trivial test target, and p2pkh signing helpers.

use std::cmp::Ordering;
use std::fs;
use std::sync::Arc;

use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use kestrel_chain as chain;
use kestrel_chain::{Chain, ChainAdapter, ChainEntry, NoopAdapter};
use kestrel_core::consensus::{block_subsidy, target_from_compact};
use kestrel_core::core::block::Block;
use kestrel_core::core::hash::{hash160, Hash, Hashed};
use kestrel_core::core::script::Script;
use kestrel_core::core::transaction::{OutPoint, Transaction, TxIn, TxOut, SIGHASH_ALL};
use kestrel_core::genesis;
use kestrel_core::global::{self, ChainTypes};
use kestrel_util::{Mutex, StopState, Workers};

pub fn clean_output_dir(dir_name: &str) {
	let _ = fs::remove_dir_all(dir_name);
}

pub fn setup(dir_name: &str, adapter: Arc<dyn ChainAdapter + Send + Sync>) -> Chain {
	global::set_mining_mode(ChainTypes::AutomatedTesting);
	clean_output_dir(dir_name);
	let env = Arc::new(kestrel_store::new_env(dir_name.to_string()).unwrap());
	Chain::init(
		env,
		adapter,
		genesis::genesis_dev(),
		Arc::new(Workers::new(2)),
		Arc::new(StopState::new()),
		vec![],
	)
	.unwrap()
}

pub fn setup_noop(dir_name: &str) -> Chain {
	setup(dir_name, Arc::new(NoopAdapter {}))
}

/// A deterministic key for signing test spends.
pub struct TestKey {
	pub secret: SecretKey,
	pub pubkey: PublicKey,
	pub script: Script,
}

pub fn test_key(seed: u8) -> TestKey {
	let secp = Secp256k1::new();
	let mut bytes = [seed; 32];
	bytes[31] = 1;
	let secret = SecretKey::from_slice(&bytes).unwrap();
	let pubkey = PublicKey::from_secret_key(&secp, &secret);
	let script = Script::p2pkh(&hash160(&pubkey.serialize()));
	TestKey {
		secret,
		pubkey,
		script,
	}
}

/// Sign every input of `tx` as a p2pkh spend of `key`'s script.
pub fn sign_p2pkh(tx: &mut Transaction, key: &TestKey) {
	let secp = Secp256k1::new();
	for index in 0..tx.inputs.len() {
		let sighash = tx.signature_hash(index, &key.script, SIGHASH_ALL);
		let msg = Message::from_slice(sighash.as_bytes()).unwrap();
		let sig = secp.sign(&msg, &key.secret);
		let mut der = sig.serialize_der().to_vec();
		der.push(SIGHASH_ALL as u8);

		let mut script_sig = Script::new();
		script_sig.push_data(&der).push_data(&key.pubkey.serialize());
		tx.inputs[index].script_sig = script_sig;
	}
}

/// Build and sign a transaction spending `inputs` (locked by `key`)
/// into outputs of the given values paying back to the same key.
pub fn test_transaction(key: &TestKey, inputs: Vec<OutPoint>, outputs: Vec<u64>) -> Transaction {
	let mut tx = Transaction::new();
	for outpoint in inputs {
		tx.inputs.push(TxIn::new(outpoint));
	}
	for value in outputs {
		tx.outputs.push(TxOut::new(value, key.script.clone()));
	}
	sign_p2pkh(&mut tx, key);
	tx
}

/// Assemble and "mine" a block on top of `prev`: correct coinbase,
/// target and timestamp, nonce ground against the trivial test target.
/// `salt` keeps coinbases of competing branches distinct.
pub fn mine_block(
	chain: &Chain,
	prev: &ChainEntry,
	txs: Vec<Transaction>,
	fees: u64,
	payout: &Script,
	salt: u8,
) -> Block {
	let height = prev.height + 1;
	let bits = chain.next_target(prev).unwrap();
	let version = chain.compute_block_version(prev).unwrap();
	let median_time = chain.median_time_past(prev).unwrap();

	let mut script_sig = Script::new();
	script_sig.push_int(height as i64);
	script_sig.push_data(&[salt, 0xc0]);
	let mut coinbase_input = TxIn::new(OutPoint::null());
	coinbase_input.script_sig = script_sig;

	let mut coinbase = Transaction::new();
	coinbase.inputs.push(coinbase_input);
	coinbase.outputs.push(TxOut::new(
		block_subsidy(height, global::halving_interval()) + fees,
		payout.clone(),
	));

	let mut block_txs = vec![coinbase];
	block_txs.extend(txs);
	let mut block = Block::with_txs(prev.hash(), block_txs);
	block.header.version = version;
	block.header.bits = bits;
	block.header.timestamp = (median_time + 1 + salt as i64) as u32;

	let target = target_from_compact(bits).unwrap();
	while block.header.hash().cmp_target(&target) == Ordering::Greater {
		block.header.nonce = block.header.nonce.wrapping_add(1);
	}
	block
}

/// Re-grind a block's nonce after its header was altered.
pub fn grind(block: &mut Block) {
	let target = target_from_compact(block.header.bits).unwrap();
	while block.header.hash().cmp_target(&target) == Ordering::Greater {
		block.header.nonce = block.header.nonce.wrapping_add(1);
	}
}

/// Chain adapter recording the event stream for ordering assertions.
pub struct RecordingAdapter {
	events: Mutex<Vec<(String, Hash, u64)>>,
}

impl RecordingAdapter {
	pub fn new() -> RecordingAdapter {
		RecordingAdapter {
			events: Mutex::new(vec![]),
		}
	}

	pub fn events(&self) -> Vec<(String, Hash, u64)> {
		self.events.lock().clone()
	}
}

impl ChainAdapter for RecordingAdapter {
	fn block_connected(&self, block: &Block, entry: &ChainEntry) {
		self.events
			.lock()
			.push(("connect".to_string(), block.hash(), entry.height));
	}

	fn block_disconnected(&self, block: &Block, entry: &ChainEntry) {
		self.events
			.lock()
			.push(("disconnect".to_string(), block.hash(), entry.height));
	}

	fn chain_reset(&self, tip: &ChainEntry) {
		self.events
			.lock()
			.push(("reset".to_string(), tip.hash(), tip.height));
	}
}

/// Mine `count` empty blocks on the current tip, paying to `payout`.
pub fn mine_empty_chain(chain: &Chain, count: u64, payout: &Script) {
	for n in 0..count {
		let prev = chain.head_entry().unwrap();
		let block = mine_block(chain, &prev, vec![], 0, payout, n as u8);
		chain
			.process_block(block, chain::Options::NONE)
			.unwrap();
	}
}
