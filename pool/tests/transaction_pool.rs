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
use kestrel_core::core::hash::sha256d;
use kestrel_core::core::transaction::OutPoint;
use kestrel_core::core::{Block, Hashed};
use kestrel_pool::{PoolConfig, PoolError};

#[test]
fn admit_then_confirm() {
	let key = test_key(1);
	let chain = Arc::new(DummyChain::new());
	let adapter = Arc::new(RecordingAdapter::new());
	let mut pool = test_setup(PoolConfig::default(), chain.clone(), adapter.clone());

	let funding = OutPoint::new(sha256d(b"funding"), 0);
	chain.fund(funding, 50_000, key.script.clone(), 1);

	let tx = test_transaction(&key, vec![funding], vec![49_000]);
	let hash = tx.hash();
	pool.add_to_pool(test_source(), tx.clone()).unwrap();
	assert_eq!(pool.size(), 1);
	assert!(pool.is_spent(&funding));
	assert!(pool.get_entry(&hash).is_some());

	// the block confirms it; the pool empties and the event stream
	// shows the accept then the confirm
	let block = Block::with_txs(sha256d(b"prev"), vec![coinbase_like(&key), tx]);
	chain.remove_coin(&funding);
	chain.set_height(11);
	pool.reconcile_block(&block, 11).unwrap();
	assert_eq!(pool.size(), 0);
	assert!(!pool.is_spent(&funding));

	let events = adapter.events();
	assert_eq!(events[0], ("accepted".to_string(), hash));
	assert_eq!(events[1], ("removed:Confirmed".to_string(), hash));
}

// a minimal coinbase for block construction in these tests
fn coinbase_like(key: &TestKey) -> kestrel_core::core::Transaction {
	use kestrel_core::core::transaction::{Transaction, TxIn, TxOut};
	let mut tx = Transaction::new();
	let mut input = TxIn::new(OutPoint::null());
	input.script_sig.push_int(11).push_int(0);
	tx.inputs.push(input);
	tx.outputs.push(TxOut::new(50_000, key.script.clone()));
	tx
}

#[test]
fn double_spend_rejected_without_rbf() {
	let key = test_key(2);
	let chain = Arc::new(DummyChain::new());
	let adapter = Arc::new(RecordingAdapter::new());
	let mut pool = test_setup(PoolConfig::default(), chain.clone(), adapter);

	let funding = OutPoint::new(sha256d(b"shared"), 0);
	chain.fund(funding, 50_000, key.script.clone(), 1);

	let first = test_transaction(&key, vec![funding], vec![49_000]);
	pool.add_to_pool(test_source(), first).unwrap();

	// same outpoint, same fee: conflict, not an orphan
	let second = test_transaction(&key, vec![funding], vec![48_999]);
	match pool.add_to_pool(test_source(), second) {
		Err(PoolError::DoubleSpend(outpoint)) => assert_eq!(outpoint, funding),
		other => panic!("expected DoubleSpend, got {:?}", other),
	}
	assert_eq!(pool.size(), 1);
}

#[test]
fn conflict_takes_precedence_over_missing_parents() {
	let key = test_key(3);
	let chain = Arc::new(DummyChain::new());
	let adapter = Arc::new(RecordingAdapter::new());
	let mut pool = test_setup(PoolConfig::default(), chain.clone(), adapter);

	let funding = OutPoint::new(sha256d(b"mixed"), 0);
	chain.fund(funding, 50_000, key.script.clone(), 1);

	let first = test_transaction(&key, vec![funding], vec![49_000]);
	pool.add_to_pool(test_source(), first).unwrap();

	// spends the contested outpoint AND an unknown parent: the
	// conflict must win over the orphan report
	let unknown = OutPoint::new(sha256d(b"nowhere"), 0);
	let mixed = test_transaction(&key, vec![funding, unknown], vec![48_000]);
	match pool.add_to_pool(test_source(), mixed) {
		Err(PoolError::DoubleSpend(_)) => (),
		other => panic!("expected DoubleSpend, got {:?}", other),
	}
}

#[test]
fn replacement_with_higher_fee() {
	let key = test_key(4);
	let chain = Arc::new(DummyChain::new());
	let adapter = Arc::new(RecordingAdapter::new());
	let config = PoolConfig {
		replace_by_fee: true,
		..Default::default()
	};
	let mut pool = test_setup(config, chain.clone(), adapter.clone());

	let funding = OutPoint::new(sha256d(b"rbf"), 0);
	chain.fund(funding, 100_000, key.script.clone(), 1);

	let original = test_transaction(&key, vec![funding], vec![99_000]);
	let original_hash = original.hash();
	pool.add_to_pool(test_source(), original.clone()).unwrap();

	// a child rides on the original
	let child = test_transaction(&key, vec![OutPoint::new(original_hash, 0)], vec![98_000]);
	let child_hash = child.hash();
	pool.add_to_pool(test_source(), child).unwrap();
	assert_eq!(pool.size(), 2);

	// an equal-fee replacement is rejected
	let cheap = test_transaction(&key, vec![funding], vec![99_000 - 1]);
	assert!(pool.add_to_pool(test_source(), cheap).is_err());

	// a much better paying replacement evicts the original and its child
	let replacement = test_transaction(&key, vec![funding], vec![90_000]);
	let replacement_hash = replacement.hash();
	pool.add_to_pool(test_source(), replacement).unwrap();

	assert_eq!(pool.size(), 1);
	assert!(pool.get_entry(&replacement_hash).is_some());
	assert!(pool.get_entry(&original_hash).is_none());
	assert!(pool.get_entry(&child_hash).is_none());

	let events = adapter.events();
	assert!(events.contains(&("removed:Replaced".to_string(), original_hash)));
	assert!(events.contains(&("removed:Replaced".to_string(), child_hash)));
}

#[test]
fn missing_parents_are_reported_not_admitted() {
	let key = test_key(5);
	let chain = Arc::new(DummyChain::new());
	let adapter = Arc::new(RecordingAdapter::new());
	let mut pool = test_setup(PoolConfig::default(), chain, adapter);

	let unknown = OutPoint::new(sha256d(b"unseen-parent"), 1);
	let tx = test_transaction(&key, vec![unknown], vec![1_000]);
	match pool.add_to_pool(test_source(), tx) {
		Err(PoolError::Orphan(missing)) => {
			assert_eq!(missing, vec![unknown.hash]);
		}
		other => panic!("expected Orphan, got {:?}", other),
	}
	assert_eq!(pool.size(), 0);
}

#[test]
fn package_aggregates_track_the_closure() {
	let key = test_key(6);
	let chain = Arc::new(DummyChain::new());
	let adapter = Arc::new(RecordingAdapter::new());
	let mut pool = test_setup(PoolConfig::default(), chain.clone(), adapter);

	let funding = OutPoint::new(sha256d(b"package"), 0);
	chain.fund(funding, 200_000, key.script.clone(), 1);

	let parent = test_transaction(&key, vec![funding], vec![150_000, 40_000]);
	let parent_hash = parent.hash();
	let parent_fee = 10_000;
	pool.add_to_pool(test_source(), parent).unwrap();

	let child = test_transaction(&key, vec![OutPoint::new(parent_hash, 0)], vec![140_000]);
	let child_hash = child.hash();
	let child_fee = 10_000;
	pool.add_to_pool(test_source(), child).unwrap();

	let grandchild =
		test_transaction(&key, vec![OutPoint::new(child_hash, 0)], vec![130_000]);
	let grandchild_hash = grandchild.hash();
	let grandchild_fee = 10_000;
	pool.add_to_pool(test_source(), grandchild).unwrap();

	let parent_entry = pool.get_entry(&parent_hash).unwrap();
	assert_eq!(parent_entry.descendant_count, 3);
	assert_eq!(
		parent_entry.descendant_fee,
		parent_fee + child_fee + grandchild_fee
	);
	assert_eq!(parent_entry.ancestor_count, 1);
	assert_eq!(parent_entry.dep_count(), 0);

	let grandchild_entry = pool.get_entry(&grandchild_hash).unwrap();
	assert_eq!(grandchild_entry.ancestor_count, 3);
	assert_eq!(
		grandchild_entry.ancestor_fee,
		parent_fee + child_fee + grandchild_fee
	);
	assert_eq!(grandchild_entry.dep_count(), 1);

	let child_entry = pool.get_entry(&child_hash).unwrap();
	assert_eq!(child_entry.ancestor_count, 2);
	assert_eq!(child_entry.descendant_count, 2);

	// dropping the middle takes the grandchild with it
	pool.remove_entry(&child_hash).unwrap();
	assert_eq!(pool.size(), 1);
	let parent_entry = pool.get_entry(&parent_hash).unwrap();
	assert_eq!(parent_entry.descendant_count, 1);
	assert_eq!(parent_entry.descendant_fee, parent_fee);
}

#[test]
fn eviction_removes_cheapest_root_and_raises_floor() {
	let key = test_key(7);
	let chain = Arc::new(DummyChain::new());
	let adapter = Arc::new(RecordingAdapter::new());
	let config = PoolConfig {
		max_size: 300,
		..Default::default()
	};
	let mut pool = test_setup(config.clone(), chain.clone(), adapter.clone());

	let cheap_funding = OutPoint::new(sha256d(b"evict-cheap"), 0);
	let rich_funding = OutPoint::new(sha256d(b"evict-rich"), 0);
	chain.fund(cheap_funding, 100_000, key.script.clone(), 1);
	chain.fund(rich_funding, 100_000, key.script.clone(), 1);

	// low fee rate first
	let cheap = test_transaction(&key, vec![cheap_funding], vec![99_500]);
	let cheap_hash = cheap.hash();
	pool.add_to_pool(test_source(), cheap).unwrap();
	let floor_before = pool.min_rate();

	// a far better paying tx pushes the pool over budget
	let rich = test_transaction(&key, vec![rich_funding], vec![80_000]);
	let rich_hash = rich.hash();
	pool.add_to_pool(test_source(), rich).unwrap();

	assert!(pool.total_size() <= config.max_size);
	assert!(pool.get_entry(&rich_hash).is_some());
	assert!(pool.get_entry(&cheap_hash).is_none());
	assert!(pool.min_rate() > floor_before);

	let events = adapter.events();
	assert!(events.contains(&("removed:Evicted".to_string(), cheap_hash)));

	// the evicted rate now gates re-admission
	chain.fund(cheap_funding, 100_000, key.script.clone(), 1);
	let again = test_transaction(&key, vec![cheap_funding], vec![99_400]);
	match pool.add_to_pool(test_source(), again) {
		Err(PoolError::LowFee { .. }) => (),
		other => panic!("expected LowFee, got {:?}", other),
	}
}

#[test]
fn snapshot_orders_by_descendant_rate() {
	let key = test_key(8);
	let chain = Arc::new(DummyChain::new());
	let adapter = Arc::new(RecordingAdapter::new());
	let mut pool = test_setup(PoolConfig::default(), chain.clone(), adapter);

	let a_funding = OutPoint::new(sha256d(b"snap-a"), 0);
	let b_funding = OutPoint::new(sha256d(b"snap-b"), 0);
	chain.fund(a_funding, 100_000, key.script.clone(), 1);
	chain.fund(b_funding, 100_000, key.script.clone(), 1);

	let modest = test_transaction(&key, vec![a_funding], vec![98_000]);
	let generous = test_transaction(&key, vec![b_funding], vec![90_000]);
	let modest_hash = modest.hash();
	let generous_hash = generous.hash();
	pool.add_to_pool(test_source(), modest).unwrap();
	pool.add_to_pool(test_source(), generous).unwrap();

	let snapshot = pool.get_snapshot();
	assert_eq!(snapshot, vec![generous_hash, modest_hash]);
}

#[test]
fn reinstated_after_disconnect() {
	let key = test_key(9);
	let chain = Arc::new(DummyChain::new());
	let adapter = Arc::new(RecordingAdapter::new());
	let mut pool = test_setup(PoolConfig::default(), chain.clone(), adapter);

	let funding = OutPoint::new(sha256d(b"reorg"), 0);
	chain.fund(funding, 50_000, key.script.clone(), 1);

	let tx = test_transaction(&key, vec![funding], vec![49_000]);
	let hash = tx.hash();

	// the tx confirms, then its block is disconnected
	let block = Block::with_txs(sha256d(b"prev"), vec![coinbase_like(&key), tx]);
	pool.reinstate_block(&block);
	assert_eq!(pool.size(), 1);
	assert!(pool.get_entry(&hash).is_some());
}
