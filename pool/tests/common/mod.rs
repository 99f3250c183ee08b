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

//! Common test functions

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use kestrel_core::core::coin::Coin;
use kestrel_core::core::hash::{hash160, Hash};
use kestrel_core::core::script::{Script, VerifyFlags};
use kestrel_core::core::transaction::{OutPoint, Transaction, TxIn, TxOut, SIGHASH_ALL};
use kestrel_pool::{
	BlockChain, ChainInfo, PoolAdapter, PoolConfig, PoolEntry, PoolError, RemovalReason,
	TransactionPool, TxSource,
};
use kestrel_util::{Mutex, RwLock};

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

/// Build and sign a transaction spending `inputs` (all locked by `key`)
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

pub fn test_source() -> TxSource {
	TxSource {
		debug_name: "test".to_string(),
		identifier: "127.0.0.1".to_string(),
	}
}

/// An in-memory stand-in for the chain's capability handle: a UTXO map,
/// a height and a median time.
pub struct DummyChain {
	utxo: RwLock<HashMap<OutPoint, Coin>>,
	confirmed: RwLock<HashSet<Hash>>,
	height: RwLock<u64>,
	median_time: RwLock<i64>,
}

impl DummyChain {
	pub fn new() -> DummyChain {
		DummyChain {
			utxo: RwLock::new(HashMap::new()),
			confirmed: RwLock::new(HashSet::new()),
			height: RwLock::new(10),
			median_time: RwLock::new(1_500_000_000),
		}
	}

	pub fn fund(&self, outpoint: OutPoint, value: u64, script: Script, height: u64) {
		self.utxo.write().insert(
			outpoint,
			Coin {
				value,
				script_pubkey: script,
				height,
				coinbase: false,
			},
		);
	}

	pub fn confirm(&self, txid: Hash) {
		self.confirmed.write().insert(txid);
	}

	pub fn remove_coin(&self, outpoint: &OutPoint) {
		self.utxo.write().remove(outpoint);
	}

	pub fn set_height(&self, height: u64) {
		*self.height.write() = height;
	}
}

impl BlockChain for DummyChain {
	fn chain_info(&self) -> Result<ChainInfo, PoolError> {
		Ok(ChainInfo {
			tip: Hash::from_vec(&[7]),
			height: *self.height.read(),
			median_time: *self.median_time.read(),
			verify_flags: VerifyFlags::P2SH
				| VerifyFlags::CHECKLOCKTIMEVERIFY
				| VerifyFlags::CHECKSEQUENCEVERIFY
				| VerifyFlags::WITNESS
				| VerifyFlags::NULLDUMMY,
			csv: true,
			segwit: true,
		})
	}

	fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, PoolError> {
		Ok(self.utxo.read().get(outpoint).cloned())
	}

	fn is_confirmed(&self, txid: &Hash) -> Result<bool, PoolError> {
		Ok(self.confirmed.read().contains(txid))
	}

	fn median_time_at(&self, _height: u64) -> Result<i64, PoolError> {
		Ok(*self.median_time.read() - 600)
	}
}

/// Adapter recording the event stream for assertions.
pub struct RecordingAdapter {
	pub events: Mutex<Vec<(String, Hash)>>,
}

impl RecordingAdapter {
	pub fn new() -> RecordingAdapter {
		RecordingAdapter {
			events: Mutex::new(vec![]),
		}
	}

	pub fn events(&self) -> Vec<(String, Hash)> {
		self.events.lock().clone()
	}
}

impl PoolAdapter for RecordingAdapter {
	fn tx_accepted(&self, entry: &PoolEntry) {
		self.events.lock().push(("accepted".to_string(), entry.hash));
	}

	fn tx_removed(&self, entry: &PoolEntry, reason: RemovalReason) {
		self.events
			.lock()
			.push((format!("removed:{:?}", reason), entry.hash));
	}
}

pub fn test_setup(
	config: PoolConfig,
	chain: Arc<DummyChain>,
	adapter: Arc<RecordingAdapter>,
) -> TransactionPool {
	TransactionPool::new(config, chain, adapter)
}
