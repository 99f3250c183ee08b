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
use kestrel_chain::Options;
use kestrel_core::core::hash::{hash160, Hashed};
use kestrel_core::core::transaction::OutPoint;
use kestrel_core::core::Address;
use kestrel_servers::{BlockAssembler, MinerConfig};

#[test]
fn template_includes_parent_before_child() {
	let dir = "target/test_output/template_package";
	let key = test_key(30);
	let node = setup_node(dir);

	// mature a coinbase to spend
	mine_chain(&node, 3, &key.script);
	let block1 = node.chain.get_block_by_height(1).unwrap().unwrap();
	let reward = block1.txs[0].outputs[0].value;

	// parent pays a modest fee, child pays a large one; the child's
	// rate lifts the whole package
	let parent = test_transaction(
		&key,
		vec![OutPoint::new(block1.txs[0].hash(), 0)],
		vec![reward - 2_000],
	);
	let parent_hash = parent.hash();
	let child = test_transaction(
		&key,
		vec![OutPoint::new(parent_hash, 0)],
		vec![reward - 2_000 - 50_000],
	);
	let child_hash = child.hash();

	node.tx_pool
		.write()
		.add_to_pool(test_source(), parent)
		.unwrap();
	node.tx_pool
		.write()
		.add_to_pool(test_source(), child)
		.unwrap();

	let config = MinerConfig {
		preverify: true,
		..Default::default()
	};
	let assembler = BlockAssembler::new(node.chain.clone(), node.tx_pool.clone(), config.clone());
	let payout = Address::P2PKH(hash160(&key.pubkey.serialize()));
	let template = assembler.build_template(&payout).unwrap();

	// both made it in, in dependency order
	let txids: Vec<_> = template.block.txs.iter().map(|tx| tx.hash()).collect();
	let parent_pos = txids.iter().position(|h| *h == parent_hash).unwrap();
	let child_pos = txids.iter().position(|h| *h == child_hash).unwrap();
	assert!(parent_pos > 0, "coinbase stays first");
	assert!(parent_pos < child_pos);

	// budget and value invariants
	assert!(template.weight <= config.max_weight);
	assert!(template.sigops <= config.max_sigops);
	assert_eq!(template.fees, 2_000 + 50_000);
	let subsidy = kestrel_core::consensus::block_subsidy(
		template.height,
		kestrel_core::global::halving_interval(),
	);
	assert!(template.block.txs[0].output_value() <= subsidy + template.fees);

	// the template survives the full validator and, once mined,
	// confirms and empties the pool
	let mut block = template.block;
	grind(&mut block);
	node.chain.process_block(block, Options::MINE).unwrap();
	assert_eq!(node.tx_pool.read().size(), 0);
	assert!(node
		.chain
		.get_tx_meta(&parent_hash)
		.unwrap()
		.is_some());

	clean_output_dir(dir);
}

#[test]
fn template_respects_weight_budget() {
	let dir = "target/test_output/template_weight";
	let key = test_key(31);
	let node = setup_node(dir);

	mine_chain(&node, 4, &key.script);

	// two independent spends of matured coinbases
	let mut hashes = vec![];
	for height in 1..=2u64 {
		let block = node.chain.get_block_by_height(height).unwrap().unwrap();
		let reward = block.txs[0].outputs[0].value;
		let spend = test_transaction(
			&key,
			vec![OutPoint::new(block.txs[0].hash(), 0)],
			vec![reward - 20_000],
		);
		hashes.push(spend.hash());
		node.tx_pool
			.write()
			.add_to_pool(test_source(), spend)
			.unwrap();
	}

	// a budget with room for the coinbase and a single transaction
	let config = MinerConfig {
		max_weight: 4000 + 800,
		reserved_weight: 4000,
		..Default::default()
	};
	let assembler = BlockAssembler::new(node.chain.clone(), node.tx_pool.clone(), config.clone());
	let payout = Address::P2PKH(hash160(&key.pubkey.serialize()));
	let template = assembler.build_template(&payout).unwrap();

	assert_eq!(template.block.txs.len(), 2, "coinbase plus one spend");
	assert!(template.weight <= config.max_weight);

	clean_output_dir(dir);
}

#[test]
fn non_final_entries_stay_out() {
	let dir = "target/test_output/template_nonfinal";
	let key = test_key(32);
	let node = setup_node(dir);

	mine_chain(&node, 3, &key.script);
	let block1 = node.chain.get_block_by_height(1).unwrap().unwrap();
	let reward = block1.txs[0].outputs[0].value;

	// locked far in the future, non-final sequence
	let mut locked = test_transaction(
		&key,
		vec![OutPoint::new(block1.txs[0].hash(), 0)],
		vec![reward - 10_000],
	);
	locked.lock_time = 100_000;
	locked.inputs[0].sequence = 0;
	sign_p2pkh(&mut locked, &key);
	let locked_hash = locked.hash();

	// the pool itself refuses it; force assembly robustness by checking
	// the template too
	let admit = node.tx_pool.write().add_to_pool(test_source(), locked);
	assert!(admit.is_err());

	let assembler = BlockAssembler::new(
		node.chain.clone(),
		node.tx_pool.clone(),
		MinerConfig::default(),
	);
	let payout = Address::P2PKH(hash160(&key.pubkey.serialize()));
	let template = assembler.build_template(&payout).unwrap();
	assert!(template
		.block
		.txs
		.iter()
		.all(|tx| tx.hash() != locked_hash));

	clean_output_dir(dir);
}
