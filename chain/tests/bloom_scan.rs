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

use common::*;
use kestrel_chain::Options;
use kestrel_core::core::bloom::BloomFilter;
use kestrel_core::core::hash::{hash160, Hashed};
use kestrel_core::core::transaction::OutPoint;

#[test]
fn rescan_visits_matching_blocks_in_height_order() {
	let dir = "target/test_output/bloom_scan";
	let watched = test_key(20);
	let other = test_key(21);
	let chain = setup_noop(dir);

	// heights 1..=6: the watched key is paid at 2 and 4 only
	for n in 1u64..=6 {
		let payout = if n == 2 || n == 4 {
			&watched.script
		} else {
			&other.script
		};
		let prev = chain.head_entry().unwrap();
		let block = mine_block(&chain, &prev, vec![], 0, payout, n as u8);
		chain.process_block(block, Options::NONE).unwrap();
	}

	// spend the watched coin from height 2 at height 7; the filter only
	// knows the pubkey hash, the spend is caught via the auto-inserted
	// outpoint
	let block2 = chain.get_block_by_height(2).unwrap().unwrap();
	let reward = block2.txs[0].outputs[0].value;
	let spend = test_transaction(
		&watched,
		vec![OutPoint::new(block2.txs[0].hash(), 0)],
		vec![reward - 1000],
	);
	let prev = chain.head_entry().unwrap();
	let block = mine_block(&chain, &prev, vec![spend], 1000, &other.script, 7);
	chain.process_block(block, Options::NONE).unwrap();

	let mut filter = BloomFilter::new(10, 0.000_001, 0);
	filter.insert(&hash160(&watched.pubkey.serialize()));

	let mut visits: Vec<u64> = vec![];
	chain
		.scan(None, &mut filter, None, &mut |entry, matched| {
			assert!(!matched.is_empty());
			visits.push(entry.height);
			Ok(())
		})
		.unwrap();

	assert_eq!(visits, vec![2, 4, 7]);

	clean_output_dir(dir);
}

#[test]
fn scan_can_start_mid_chain() {
	let dir = "target/test_output/bloom_scan_start";
	let watched = test_key(22);
	let chain = setup_noop(dir);

	mine_empty_chain(&chain, 5, &watched.script);

	let start = chain.get_entry_by_height(3).unwrap().unwrap();
	let mut filter = BloomFilter::new(10, 0.000_001, 0);
	filter.insert(&hash160(&watched.pubkey.serialize()));

	let mut visits: Vec<u64> = vec![];
	chain
		.scan(Some(start.hash()), &mut filter, None, &mut |entry, _| {
			visits.push(entry.height);
			Ok(())
		})
		.unwrap();

	// every block pays the watched key; the scan starts at 3
	assert_eq!(visits, vec![3, 4, 5]);

	clean_output_dir(dir);
}
