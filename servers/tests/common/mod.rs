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

//! Common test functions: a fully wired chain+pool pair and block
//! mining/signing helpers.

use std::cmp::Ordering;
use std::fs;
use std::sync::Arc;

use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use kestrel_chain::{Chain, ChainEntry, Options};
use kestrel_core::consensus::{block_subsidy, target_from_compact};
use kestrel_core::core::block::Block;
use kestrel_core::core::hash::{hash160, Hashed};
use kestrel_core::core::script::Script;
use kestrel_core::core::transaction::{OutPoint, Transaction, TxIn, TxOut, SIGHASH_ALL};
use kestrel_core::genesis;
use kestrel_core::global::{self, ChainTypes};
use kestrel_pool::{PoolConfig, TransactionPool, TxSource};
use kestrel_servers::common::adapters::{ChainToPoolAdapter, PoolNotifier, PoolToChainAdapter};
use kestrel_util::{RwLock, StopState, Workers};

pub struct TestNode {
	pub chain: Arc<Chain>,
	pub tx_pool: Arc<RwLock<TransactionPool>>,
}

pub fn clean_output_dir(dir_name: &str) {
	let _ = fs::remove_dir_all(dir_name);
}

/// A chain and pool wired through the production adapters.
pub fn setup_node(dir_name: &str) -> TestNode {
	global::set_mining_mode(ChainTypes::AutomatedTesting);
	clean_output_dir(dir_name);

	let env = Arc::new(kestrel_store::new_env(dir_name.to_string()).unwrap());
	let pool_adapter = Arc::new(PoolToChainAdapter::new());
	let tx_pool = Arc::new(RwLock::new(TransactionPool::new(
		PoolConfig::default(),
		pool_adapter.clone(),
		Arc::new(PoolNotifier::new()),
	)));
	let chain = Arc::new(
		Chain::init(
			env,
			Arc::new(ChainToPoolAdapter::new(tx_pool.clone(), None)),
			genesis::genesis_dev(),
			Arc::new(Workers::new(2)),
			Arc::new(StopState::new()),
			vec![],
		)
		.unwrap(),
	);
	pool_adapter.set_chain(&chain);

	TestNode { chain, tx_pool }
}

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

pub fn test_source() -> TxSource {
	TxSource {
		debug_name: "test".to_string(),
		identifier: "127.0.0.1".to_string(),
	}
}

/// Grind a block's nonce against its own compact target.
pub fn grind(block: &mut Block) {
	let target = target_from_compact(block.header.bits).unwrap();
	while block.header.hash().cmp_target(&target) == Ordering::Greater {
		block.header.nonce = block.header.nonce.wrapping_add(1);
	}
}

fn mine_one(node: &TestNode, prev: &ChainEntry, payout: &Script, salt: u8) -> Block {
	let height = prev.height + 1;
	let bits = node.chain.next_target(prev).unwrap();
	let version = node.chain.compute_block_version(prev).unwrap();
	let median_time = node.chain.median_time_past(prev).unwrap();

	let mut script_sig = Script::new();
	script_sig.push_int(height as i64);
	script_sig.push_data(&[salt, 0xc0]);
	let mut coinbase_input = TxIn::new(OutPoint::null());
	coinbase_input.script_sig = script_sig;

	let mut coinbase = Transaction::new();
	coinbase.inputs.push(coinbase_input);
	coinbase.outputs.push(TxOut::new(
		block_subsidy(height, global::halving_interval()),
		payout.clone(),
	));

	let mut block = Block::with_txs(prev.hash(), vec![coinbase]);
	block.header.version = version;
	block.header.bits = bits;
	block.header.timestamp = (median_time + 1 + salt as i64) as u32;
	grind(&mut block);
	block
}

/// Extend the chain with `count` empty blocks paying `payout`.
pub fn mine_chain(node: &TestNode, count: u64, payout: &Script) {
	for n in 0..count {
		let prev = node.chain.head_entry().unwrap();
		let block = mine_one(node, &prev, payout, n as u8);
		node.chain.process_block(block, Options::NONE).unwrap();
	}
}
