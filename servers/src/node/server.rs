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

//! Kestrel server implementation, glues the different parts of the
//! system (the blockchain, the transaction pool, the block assembler
//! and the REST API) and acts as a facade.

use std::fs;
use std::fs::File;
use std::io::Write as IoWrite;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use fs2::FileExt;

use kestrel_api as api;
use kestrel_chain as chain;
use kestrel_core::core::bloom::BloomFilter;
use kestrel_core::core::coin::Coin;
use kestrel_core::core::hash::{Hash, Hashed};
use kestrel_core::core::transaction::{OutPoint, Transaction};
use kestrel_core::core::Address;
use kestrel_core::{genesis, global};
use kestrel_pool as pool;
use kestrel_pool::{FeeEstimator, TxSource};
use kestrel_store as store;
use kestrel_util::{RwLock, StopState, Workers};

use crate::common::adapters::{
	ChainToPoolAdapter, PoolNotifier, PoolToChainAdapter, FEE_ESTIMATOR_KEY,
};
use crate::common::types::{Error, ServerConfig};
use crate::mining::miner::BlockAssembler;
use crate::mining::test_miner::Miner;

const MEMPOOL_PREFIX: u8 = b'm';

/// A transaction located for a caller: either confirmed with its
/// context or still sitting in the pool.
#[derive(Debug, Clone)]
pub struct TxDetails {
	/// The transaction itself.
	pub tx: Transaction,
	/// Confirming block, None while unconfirmed.
	pub block_hash: Option<Hash>,
	/// Confirmation height, None while unconfirmed.
	pub height: Option<u64>,
	/// Block or arrival timestamp.
	pub time: i64,
}

/// Counters summarizing the node for the info endpoint.
#[derive(Debug, Clone)]
pub struct NodeInfo {
	/// Best tip hash.
	pub tip: Hash,
	/// Best height.
	pub height: u64,
	/// Transactions waiting in the pool.
	pub pool_count: usize,
	/// Bytes held by the pool.
	pub pool_bytes: usize,
	/// Current effective minimum relay rate.
	pub min_relay_rate: u64,
	/// Network we are running on.
	pub chain: String,
}

/// Kestrel server holding internal structures.
pub struct Server {
	/// Server config.
	pub config: ServerConfig,
	/// Data store access.
	pub chain: Arc<chain::Chain>,
	/// In-memory transaction pool.
	pub tx_pool: Arc<RwLock<pool::TransactionPool>>,
	/// Stop flag, shared with every long-running component.
	pub stop_state: Arc<StopState>,

	node_db: Arc<store::Store>,
	workers: Arc<Workers>,
	api_server: Option<api::ApiServer>,
	miner_thread: Option<JoinHandle<()>>,
	// Maintain a lock_file so we do not run two nodes from the same dir.
	#[allow(dead_code)]
	lock_file: Arc<File>,
}

impl Server {
	// Exclusive (advisory) lock_file to ensure we do not run multiple
	// instances from the same dir.
	fn one_node_at_a_time(config: &ServerConfig) -> Result<Arc<File>, Error> {
		let path = Path::new(&config.db_root);
		fs::create_dir_all(path)?;
		let path = path.join("kestrel.lock");
		let lock_file = fs::OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.open(&path)?;
		lock_file.try_lock_exclusive().map_err(|e| {
			let mut stderr = std::io::stderr();
			writeln!(
				&mut stderr,
				"Failed to lock {:?} (kestrel server already running?)",
				path
			)
			.expect("Could not write to stderr");
			e
		})?;
		Ok(Arc::new(lock_file))
	}

	/// Instantiates and starts a new server, with all its subsystems
	/// wired and running.
	pub fn new(config: ServerConfig) -> Result<Server, Error> {
		let lock_file = Server::one_node_at_a_time(&config)?;

		global::set_mining_mode(config.chain_type);
		let stop_state = Arc::new(StopState::new());
		let workers = Arc::new(Workers::new(config.worker_threads));

		let db_env = Arc::new(store::new_env(config.db_root.clone())?);
		let node_db = Arc::new(store::Store::open(db_env.clone(), "node")?);

		let pool_adapter = Arc::new(PoolToChainAdapter::new());
		let tx_pool = Arc::new(RwLock::new(pool::TransactionPool::new(
			config.pool_config.clone(),
			pool_adapter.clone(),
			Arc::new(PoolNotifier::new()),
		)));

		let chain_adapter = Arc::new(ChainToPoolAdapter::new(
			tx_pool.clone(),
			Some(node_db.clone()),
		));

		let genesis = match config.chain_type {
			global::ChainTypes::AutomatedTesting => genesis::genesis_dev(),
			global::ChainTypes::Testnet => genesis::genesis_testnet(),
			global::ChainTypes::Mainnet => genesis::genesis_main(),
		};
		info!("starting server, genesis block: {}", genesis.hash());

		let shared_chain = Arc::new(chain::Chain::init(
			db_env,
			chain_adapter,
			genesis,
			workers.clone(),
			stop_state.clone(),
			vec![],
		)?);
		pool_adapter.set_chain(&shared_chain);

		// restore the fee estimator checkpoint and, optionally, the
		// persisted mempool
		if let Some(estimator) = node_db.get_ser::<FeeEstimator>(FEE_ESTIMATOR_KEY)? {
			debug!(
				"restored fee estimator at height {}",
				estimator.best_height()
			);
			tx_pool.write().set_estimator(estimator);
		}
		if config.persist_mempool {
			let mut restored = 0;
			let mut dropped = 0;
			for (_, tx) in node_db.iter::<Transaction>(&[MEMPOOL_PREFIX])? {
				match tx_pool.write().add_to_pool(TxSource::internal(), tx) {
					Ok(_) => restored += 1,
					Err(_) => dropped += 1,
				}
			}
			if restored + dropped > 0 {
				info!("mempool restore: {} back in, {} stale", restored, dropped);
			}
		}

		let api_server = Some(api::start_node_apis(
			config.api_http_addr.clone(),
			shared_chain.clone(),
			tx_pool.clone(),
			config.api_secret.clone(),
			api::tls_config(
				config.tls_certificate_file.clone(),
				config.tls_certificate_key.clone(),
			),
		)?);

		let mut server = Server {
			config,
			chain: shared_chain,
			tx_pool,
			stop_state,
			node_db,
			workers,
			api_server,
			miner_thread: None,
			lock_file,
		};

		if server.config.run_test_miner.unwrap_or(false) {
			server.start_test_miner()?;
		}
		Ok(server)
	}

	fn start_test_miner(&mut self) -> Result<(), Error> {
		let payout = self
			.config
			.test_miner_payout
			.as_ref()
			.ok_or_else(|| Error::Other("test miner enabled without a payout address".into()))?
			.parse::<Address>()
			.map_err(|e| Error::Other(format!("bad payout address: {}", e)))?;

		let miner = Miner::new(
			self.config.miner_config.clone(),
			self.chain.clone(),
			self.tx_pool.clone(),
			payout,
			self.stop_state.clone(),
		);
		let handle = thread::Builder::new()
			.name("test_miner".to_string())
			.spawn(move || miner.run_loop())?;
		self.miner_thread = Some(handle);
		Ok(())
	}

	/// A block assembler over this node's chain and pool.
	pub fn block_assembler(&self) -> BlockAssembler {
		BlockAssembler::new(
			self.chain.clone(),
			self.tx_pool.clone(),
			self.config.miner_config.clone(),
		)
	}

	/// Submit a raw transaction into the pool (and so, in a full
	/// deployment, to the relay layer).
	pub fn send_tx(&self, tx: Transaction) -> Result<(), Error> {
		let source = TxSource {
			debug_name: "api".to_owned(),
			identifier: "localhost".to_owned(),
		};
		self.tx_pool.write().add_to_pool(source, tx)?;
		Ok(())
	}

	/// An unspent coin as the node sees it: chain and pool combined,
	/// with pool spends shadowing confirmed coins.
	pub fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, Error> {
		let tx_pool = self.tx_pool.read();
		if tx_pool.is_spent(outpoint) {
			return Ok(None);
		}
		if let Some(coin) = tx_pool.get_coin(outpoint) {
			return Ok(Some(coin));
		}
		Ok(self.chain.get_coin(outpoint)?)
	}

	/// Every unspent coin paying to the given address, confirmed or
	/// pooled.
	pub fn get_coins_by_address(&self, address: &Address) -> Result<Vec<(OutPoint, Coin)>, Error> {
		let key = address.index_key();
		let tx_pool = self.tx_pool.read();
		let mut out = vec![];

		for outpoint in self.chain.get_coins_by_script(&key)? {
			if tx_pool.is_spent(&outpoint) {
				continue;
			}
			if let Some(coin) = self.chain.get_coin(&outpoint)? {
				out.push((outpoint, coin));
			}
		}
		for hash in tx_pool.get_hashes_by_script(&key) {
			if let Some(entry) = tx_pool.get_entry(&hash) {
				for (index, output) in entry.tx.outputs.iter().enumerate() {
					if output.script_pubkey.index_key() != key {
						continue;
					}
					let outpoint = OutPoint::new(hash, index as u32);
					if let Some(coin) = tx_pool.get_coin(&outpoint) {
						out.push((outpoint, coin));
					}
				}
			}
		}
		Ok(out)
	}

	/// Locate a transaction, confirmed or pooled.
	pub fn get_meta(&self, txid: &Hash) -> Result<Option<TxDetails>, Error> {
		if let Some(meta) = self.chain.get_tx_meta(txid)? {
			return Ok(Some(TxDetails {
				tx: meta.tx,
				block_hash: Some(meta.block_hash),
				height: Some(meta.height),
				time: meta.time as i64,
			}));
		}
		let tx_pool = self.tx_pool.read();
		Ok(tx_pool.get_entry(txid).map(|entry| TxDetails {
			tx: entry.tx.clone(),
			block_hash: None,
			height: None,
			time: entry.time,
		}))
	}

	/// Transaction history touching an address, confirmed then pooled.
	pub fn get_meta_by_address(&self, address: &Address) -> Result<Vec<TxDetails>, Error> {
		let key = address.index_key();
		let mut out = vec![];
		for txid in self.chain.get_txids_by_script(&key)? {
			if let Some(details) = self.get_meta(&txid)? {
				out.push(details);
			}
		}
		let tx_pool = self.tx_pool.read();
		for hash in tx_pool.get_hashes_by_script(&key) {
			if let Some(entry) = tx_pool.get_entry(&hash) {
				out.push(TxDetails {
					tx: entry.tx.clone(),
					block_hash: None,
					height: None,
					time: entry.time,
				});
			}
		}
		Ok(out)
	}

	/// Replay the chain against a bloom filter. See `Chain::scan`.
	pub fn scan<F>(
		&self,
		start: Option<Hash>,
		filter: &mut BloomFilter,
		deadline: Option<i64>,
		iterator: &mut F,
	) -> Result<(), Error>
	where
		F: FnMut(&chain::ChainEntry, Vec<Transaction>) -> Result<(), chain::Error>,
	{
		self.chain.scan(start, filter, deadline, iterator)?;
		Ok(())
	}

	/// Snapshot of node counters.
	pub fn node_info(&self) -> NodeInfo {
		let head = self.chain.head();
		let tx_pool = self.tx_pool.read();
		NodeInfo {
			tip: head.tip,
			height: head.height,
			pool_count: tx_pool.size(),
			pool_bytes: tx_pool.total_size(),
			min_relay_rate: tx_pool.min_rate(),
			chain: self.config.chain_type.shortname(),
		}
	}

	// Persist the fee estimator and (optionally) the pool contents.
	fn persist_state(&self) -> Result<(), Error> {
		let tx_pool = self.tx_pool.read();
		let batch = self.node_db.batch()?;
		batch.put_ser(FEE_ESTIMATOR_KEY, tx_pool.estimator())?;

		if self.config.persist_mempool {
			// drop the previous snapshot before writing the new one
			let stale: Vec<Vec<u8>> = self
				.node_db
				.iter::<Transaction>(&[MEMPOOL_PREFIX])?
				.map(|(key, _)| key)
				.collect();
			for key in stale {
				batch.delete(&key)?;
			}
			for hash in tx_pool.get_snapshot() {
				if let Some(entry) = tx_pool.get_entry(&hash) {
					let mut key = vec![MEMPOOL_PREFIX];
					key.extend_from_slice(hash.as_bytes());
					batch.put_ser(&key, &entry.tx)?;
				}
			}
		}
		batch.commit()?;
		Ok(())
	}

	/// Stop the server, persisting what should survive a restart and
	/// winding every subsystem down.
	pub fn stop(mut self) {
		self.stop_state.stop();
		if let Err(e) = self.persist_state() {
			error!("failed to persist node state on shutdown: {:?}", e);
		}
		if let Some(api_server) = self.api_server.take() {
			api_server.stop();
		}
		if let Some(handle) = self.miner_thread.take() {
			let _ = handle.join();
		}
		self.workers.stop();
		info!("server stopped");
	}
}
