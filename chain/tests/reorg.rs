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
use kestrel_chain::{BlockStatus, Options};
use kestrel_core::core::hash::Hashed;

#[test]
fn depth_two_reorg_emits_ordered_events() {
	let dir = "target/test_output/reorg_depth_two";
	let key_a = test_key(10);
	let key_b = test_key(11);
	let adapter = Arc::new(RecordingAdapter::new());
	let chain = setup(dir, adapter.clone());

	let genesis_entry = chain.head_entry().unwrap();

	// branch A: two blocks on top of genesis
	let a1 = mine_block(&chain, &genesis_entry, vec![], 0, &key_a.script, 1);
	chain.process_block(a1.clone(), Options::NONE).unwrap();
	let a1_entry = chain.head_entry().unwrap();
	let a2 = mine_block(&chain, &a1_entry, vec![], 0, &key_a.script, 2);
	chain.process_block(a2.clone(), Options::NONE).unwrap();
	assert_eq!(chain.head().height, 2);

	// branch B: three competing blocks from genesis, presented in order
	let b1 = mine_block(&chain, &genesis_entry, vec![], 0, &key_b.script, 101);
	let status = chain.process_block(b1.clone(), Options::NONE).unwrap();
	assert_eq!(status, BlockStatus::SideChain);

	let b1_entry = chain.get_entry(&b1.hash()).unwrap().unwrap();
	let b2 = mine_block(&chain, &b1_entry, vec![], 0, &key_b.script, 102);
	let status = chain.process_block(b2.clone(), Options::NONE).unwrap();
	assert_eq!(status, BlockStatus::SideChain);

	let b2_entry = chain.get_entry(&b2.hash()).unwrap().unwrap();
	let b3 = mine_block(&chain, &b2_entry, vec![], 0, &key_b.script, 103);
	let status = chain.process_block(b3.clone(), Options::NONE).unwrap();
	assert_eq!(status, BlockStatus::Reorganized);

	// branch B won
	assert_eq!(chain.head().tip, b3.hash());
	assert_eq!(chain.head().height, 3);
	for (height, block) in &[(1u64, &b1), (2, &b2), (3, &b3)] {
		let entry = chain.get_entry_by_height(*height).unwrap().unwrap();
		assert_eq!(entry.hash(), block.hash());
	}

	// exactly two disconnects (newest first) then three connects
	let events = adapter.events();
	let tail = &events[events.len() - 5..];
	assert_eq!(tail[0], ("disconnect".to_string(), a2.hash(), 2));
	assert_eq!(tail[1], ("disconnect".to_string(), a1.hash(), 1));
	assert_eq!(tail[2], ("connect".to_string(), b1.hash(), 1));
	assert_eq!(tail[3], ("connect".to_string(), b2.hash(), 2));
	assert_eq!(tail[4], ("connect".to_string(), b3.hash(), 3));

	clean_output_dir(dir);
}

#[test]
fn losing_branch_coins_are_returned() {
	let dir = "target/test_output/reorg_coins";
	let key = test_key(12);
	let chain = setup_noop(dir);

	let genesis_entry = chain.head_entry().unwrap();
	let a1 = mine_block(&chain, &genesis_entry, vec![], 0, &key.script, 1);
	chain.process_block(a1.clone(), Options::NONE).unwrap();

	// competing branch with more work
	let b1 = mine_block(&chain, &genesis_entry, vec![], 0, &key.script, 50);
	chain.process_block(b1.clone(), Options::NONE).unwrap();
	let b1_entry = chain.get_entry(&b1.hash()).unwrap().unwrap();
	let b2 = mine_block(&chain, &b1_entry, vec![], 0, &key.script, 51);
	chain.process_block(b2.clone(), Options::NONE).unwrap();

	// A1's coinbase coin is gone, B's coins exist
	use kestrel_core::core::transaction::OutPoint;
	assert!(chain
		.get_coin(&OutPoint::new(a1.txs[0].hash(), 0))
		.unwrap()
		.is_none());
	assert!(chain
		.get_coin(&OutPoint::new(b1.txs[0].hash(), 0))
		.unwrap()
		.is_some());
	assert!(chain
		.get_coin(&OutPoint::new(b2.txs[0].hash(), 0))
		.unwrap()
		.is_some());

	clean_output_dir(dir);
}
