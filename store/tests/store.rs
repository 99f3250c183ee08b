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

use std::fs;
use std::sync::Arc;

use kestrel_core::core::hash::sha256d;
use kestrel_core::core::transaction::OutPoint;
use kestrel_store as store;

fn clean_output_dir(dir_name: &str) {
	let _ = fs::remove_dir_all(dir_name);
}

fn setup(dir_name: &str) -> store::Store {
	clean_output_dir(dir_name);
	let env = Arc::new(store::new_env(dir_name.to_string()).unwrap());
	store::Store::open(env, "test").unwrap()
}

#[test]
fn batch_is_atomic() {
	let dir = "target/test_output/store_batch_atomic";
	let db = setup(dir);

	{
		let batch = db.batch().unwrap();
		batch.put(b"alpha", b"1").unwrap();
		batch.put(b"beta", b"2").unwrap();
		// dropped without commit
	}
	assert_eq!(db.get(b"alpha").unwrap(), None);
	assert_eq!(db.get(b"beta").unwrap(), None);

	{
		let batch = db.batch().unwrap();
		batch.put(b"alpha", b"1").unwrap();
		batch.put(b"beta", b"2").unwrap();
		batch.commit().unwrap();
	}
	assert_eq!(db.get(b"alpha").unwrap(), Some(b"1".to_vec()));
	assert_eq!(db.get(b"beta").unwrap(), Some(b"2".to_vec()));

	clean_output_dir(dir);
}

#[test]
fn batch_reads_its_own_writes() {
	let dir = "target/test_output/store_batch_rw";
	let db = setup(dir);

	let outpoint = OutPoint::new(sha256d(b"tx"), 3);
	let batch = db.batch().unwrap();
	batch.put_ser(b"o", &outpoint).unwrap();
	let read_back: OutPoint = batch.get_ser(b"o").unwrap().unwrap();
	assert_eq!(read_back, outpoint);
	batch.commit().unwrap();

	let read_back: OutPoint = db.get_ser(b"o").unwrap().unwrap();
	assert_eq!(read_back, outpoint);

	clean_output_dir(dir);
}

#[test]
fn delete_and_exists() {
	let dir = "target/test_output/store_delete";
	let db = setup(dir);

	let batch = db.batch().unwrap();
	batch.put(b"key", b"value").unwrap();
	batch.commit().unwrap();
	assert!(db.exists(b"key").unwrap());

	let batch = db.batch().unwrap();
	batch.delete(b"key").unwrap();
	// deleting a missing key is fine
	batch.delete(b"missing").unwrap();
	batch.commit().unwrap();
	assert!(!db.exists(b"key").unwrap());

	clean_output_dir(dir);
}

#[test]
fn prefix_iteration_in_key_order() {
	let dir = "target/test_output/store_iter";
	let db = setup(dir);

	let batch = db.batch().unwrap();
	for i in &[3u32, 1, 2] {
		let mut key = b"p".to_vec();
		key.extend_from_slice(&i.to_be_bytes());
		batch.put_ser(&key, &OutPoint::new(sha256d(b"x"), *i)).unwrap();
	}
	batch.put_ser(b"q_other", &OutPoint::null()).unwrap();
	batch.commit().unwrap();

	let found: Vec<u32> = db
		.iter::<OutPoint>(b"p")
		.unwrap()
		.map(|(_, o)| o.index)
		.collect();
	assert_eq!(found, vec![1, 2, 3]);

	clean_output_dir(dir);
}
