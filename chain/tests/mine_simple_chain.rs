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

pub mod common;

use std::sync::Arc;

use common::*;
use kestrel_chain::{ErrorKind, Options};
use kestrel_core::core::hash::Hashed;
use kestrel_core::core::transaction::OutPoint;

#[test]
fn mine_empty_chain_and_query() {
	let dir = "target/test_output/mine_empty_chain";
	let key = test_key(1);
	let chain = setup_noop(dir);

	mine_empty_chain(&chain, 4, &key.script);

	let head = chain.head();
	assert_eq!(head.height, 4);

	// height index and entries agree
	for height in 0..=4 {
		let entry = chain.get_entry_by_height(height).unwrap().unwrap();
		assert_eq!(entry.height, height);
		let block = chain.get_block(&entry.hash()).unwrap().unwrap();
		assert_eq!(block.hash(), entry.hash());
	}

	// coinbase coins are indexed and queryable
	let block1 = chain.get_block_by_height(1).unwrap().unwrap();
	let outpoint = OutPoint::new(block1.txs[0].hash(), 0);
	let coin = chain.get_coin(&outpoint).unwrap().unwrap();
	assert_eq!(coin.height, 1);
	assert!(coin.coinbase);

	// the tx index knows the coinbase
	let meta = chain.get_tx_meta(&block1.txs[0].hash()).unwrap().unwrap();
	assert_eq!(meta.height, 1);

	// the address index points at the payout script
	let coins = chain.get_coins_by_script(&key.script.index_key()).unwrap();
	assert_eq!(coins.len(), 4);

	clean_output_dir(dir);
}

#[test]
fn spend_coinbase_after_maturity() {
	let dir = "target/test_output/spend_coinbase";
	let key = test_key(2);
	let chain = setup_noop(dir);

	// coinbase at height 1 matures at height 3 (test maturity is 2)
	mine_empty_chain(&chain, 2, &key.script);
	let block1 = chain.get_block_by_height(1).unwrap().unwrap();
	let reward = block1.txs[0].outputs[0].value;
	let spend = test_transaction(
		&key,
		vec![OutPoint::new(block1.txs[0].hash(), 0)],
		vec![reward - 1000],
	);
	let spend_hash = spend.hash();

	let prev = chain.head_entry().unwrap();
	let block = mine_block(&chain, &prev, vec![spend], 1000, &key.script, 9);
	chain.process_block(block, Options::NONE).unwrap();

	// old coin gone, new coin present
	assert!(chain
		.get_coin(&OutPoint::new(block1.txs[0].hash(), 0))
		.unwrap()
		.is_none());
	let new_coin = chain
		.get_coin(&OutPoint::new(spend_hash, 0))
		.unwrap()
		.unwrap();
	assert_eq!(new_coin.value, reward - 1000);
	assert!(!new_coin.coinbase);

	clean_output_dir(dir);
}

#[test]
fn premature_coinbase_spend_is_rejected() {
	let dir = "target/test_output/premature_spend";
	let key = test_key(3);
	let chain = setup_noop(dir);

	mine_empty_chain(&chain, 1, &key.script);
	let block1 = chain.get_block_by_height(1).unwrap().unwrap();
	let reward = block1.txs[0].outputs[0].value;
	let spend = test_transaction(
		&key,
		vec![OutPoint::new(block1.txs[0].hash(), 0)],
		vec![reward - 1000],
	);

	// height 2 < 1 + maturity(2)
	let prev = chain.head_entry().unwrap();
	let block = mine_block(&chain, &prev, vec![spend], 1000, &key.script, 9);
	let err = chain.process_block(block, Options::NONE).unwrap_err();
	match err.kind() {
		ErrorKind::Verify(v) => {
			assert_eq!(v.reason, "bad-txns-premature-spend-of-coinbase");
			assert_eq!(v.score, 100);
		}
		other => panic!("expected Verify, got {:?}", other),
	}
	assert_eq!(chain.head().height, 1);

	clean_output_dir(dir);
}

#[test]
fn connect_disconnect_is_identity_on_utxo() {
	let dir = "target/test_output/undo_roundtrip";
	let key = test_key(4);
	let adapter = Arc::new(RecordingAdapter::new());
	let chain = setup(dir, adapter.clone());

	mine_empty_chain(&chain, 2, &key.script);
	let block1 = chain.get_block_by_height(1).unwrap().unwrap();
	let coinbase_outpoint = OutPoint::new(block1.txs[0].hash(), 0);
	let reward = block1.txs[0].outputs[0].value;

	let spend = test_transaction(&key, vec![coinbase_outpoint], vec![reward - 1000]);
	let spend_outpoint = OutPoint::new(spend.hash(), 0);

	let prev = chain.head_entry().unwrap();
	let block = mine_block(&chain, &prev, vec![spend], 1000, &key.script, 5);
	chain.process_block(block, Options::NONE).unwrap();

	assert!(chain.get_coin(&coinbase_outpoint).unwrap().is_none());
	assert!(chain.get_coin(&spend_outpoint).unwrap().is_some());

	// destructive reset: disconnect(connect(B)) must restore the set
	chain.reset(2).unwrap();
	assert_eq!(chain.head().height, 2);
	let restored = chain.get_coin(&coinbase_outpoint).unwrap().unwrap();
	assert_eq!(restored.value, reward);
	assert!(restored.coinbase);
	assert!(chain.get_coin(&spend_outpoint).unwrap().is_none());

	// reset emitted before the disconnect
	let events = adapter.events();
	let reset_pos = events.iter().position(|e| e.0 == "reset").unwrap();
	let disconnect_pos = events.iter().position(|e| e.0 == "disconnect").unwrap();
	assert!(reset_pos < disconnect_pos);

	// removed blocks are deleted for good
	assert!(chain.get_entry_by_height(3).unwrap().is_none());

	clean_output_dir(dir);
}

#[test]
fn duplicate_and_orphan_blocks() {
	let dir = "target/test_output/dup_orphan";
	let key = test_key(5);
	let chain = setup_noop(dir);

	let prev = chain.head_entry().unwrap();
	let block1 = mine_block(&chain, &prev, vec![], 0, &key.script, 1);
	let entry1_hash = block1.hash();
	chain.process_block(block1.clone(), Options::NONE).unwrap();

	// resubmitting the same block is a duplicate
	let err = chain.process_block(block1, Options::NONE).unwrap_err();
	match err.kind() {
		ErrorKind::DuplicateBlock => (),
		other => panic!("expected DuplicateBlock, got {:?}", other),
	}

	// a block whose parent we have never seen parks as an orphan
	let fake_prev = chain.head_entry().unwrap();
	let mut orphan = mine_block(&chain, &fake_prev, vec![], 0, &key.script, 2);
	orphan.header.prev_hash = kestrel_core::core::hash::sha256d(b"unknown parent");
	grind(&mut orphan);
	let orphan_hash = orphan.hash();
	let err = chain.process_block(orphan, Options::NONE).unwrap_err();
	match err.kind() {
		ErrorKind::Orphan => (),
		other => panic!("expected Orphan, got {:?}", other),
	}
	assert!(chain.is_orphan(&orphan_hash));
	assert_eq!(chain.head().tip, entry1_hash);

	clean_output_dir(dir);
}
