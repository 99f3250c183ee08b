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

//! The route handlers: thin compositions over the chain and pool
//! handles answering the node's query surface.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use hyper::{Body, Request};

use kestrel_chain as chain;
use kestrel_core::core::hash::Hash;
use kestrel_core::core::transaction::{OutPoint, Transaction};
use kestrel_core::core::Address;
use kestrel_core::{global, ser};
use kestrel_pool as pool;
use kestrel_pool::PoolError;
use kestrel_util as util;
use kestrel_util::RwLock;

use crate::auth::BasicAuthMiddleware;
use crate::rest::{ApiServer, Error, TLSConfig};
use crate::router::{Handler, Params, ResponseFuture, Router, RouterBuilder};
use crate::types::*;
use crate::web::{error_response, result_to_response};

/// Start the node REST API bound to `addr`.
pub fn start_node_apis(
	addr: String,
	chain: Arc<chain::Chain>,
	tx_pool: Arc<RwLock<pool::TransactionPool>>,
	api_secret: Option<String>,
	tls: Option<TLSConfig>,
) -> Result<ApiServer, Error> {
	let socket_addr: SocketAddr = addr
		.parse()
		.map_err(|e| Error::Argument(format!("invalid api address {}: {}", addr, e)))?;
	let router = build_router(&chain, &tx_pool, api_secret);
	ApiServer::start(socket_addr, router, tls)
}

/// Assemble the route table over the given chain and pool handles.
pub fn build_router(
	chain: &Arc<chain::Chain>,
	tx_pool: &Arc<RwLock<pool::TransactionPool>>,
	api_secret: Option<String>,
) -> Router {
	let chain = Arc::downgrade(chain);
	let tx_pool = Arc::downgrade(tx_pool);

	RouterBuilder::new()
		.add_route(
			"/v1/info",
			Arc::new(InfoHandler {
				chain: chain.clone(),
				tx_pool: tx_pool.clone(),
			}),
		)
		.add_route(
			"/v1/block/{id}",
			Arc::new(BlockHandler {
				chain: chain.clone(),
			}),
		)
		.add_route(
			"/v1/coin/{hash}/{index}",
			Arc::new(CoinHandler {
				chain: chain.clone(),
				tx_pool: tx_pool.clone(),
			}),
		)
		.add_route(
			"/v1/coin/address/{addr}",
			Arc::new(AddressCoinHandler {
				chain: chain.clone(),
				tx_pool: tx_pool.clone(),
			}),
		)
		.add_route(
			"/v1/tx/{hash}",
			Arc::new(TxHandler {
				chain: chain.clone(),
				tx_pool: tx_pool.clone(),
			}),
		)
		.add_route(
			"/v1/tx/address/{addr}",
			Arc::new(AddressTxHandler {
				chain: chain.clone(),
				tx_pool: tx_pool.clone(),
			}),
		)
		.add_route(
			"/v1/mempool",
			Arc::new(MempoolHandler {
				tx_pool: tx_pool.clone(),
			}),
		)
		.add_route(
			"/v1/broadcast",
			Arc::new(BroadcastHandler {
				tx_pool: tx_pool.clone(),
			}),
		)
		.add_route(
			"/v1/reset",
			Arc::new(ResetHandler {
				chain: chain.clone(),
			}),
		)
		.add_route("/v1/fee/{blocks}", Arc::new(FeeHandler { tx_pool }))
		.with_auth(api_secret.map(|secret| Arc::new(BasicAuthMiddleware::new(&secret))))
		.build()
}

fn w<T>(weak: &Weak<T>) -> Result<Arc<T>, Error> {
	weak.upgrade()
		.ok_or_else(|| Error::Internal("failed to upgrade weak reference".to_owned()))
}

fn chain_err(e: chain::Error) -> Error {
	Error::Internal(format!("chain error: {}", e))
}

fn parse_hash(value: &str) -> Result<Hash, Error> {
	Hash::from_hex(value).map_err(|_| Error::Argument(format!("not a hash: {}", value)))
}

fn parse_address(value: &str) -> Result<Address, Error> {
	value
		.parse::<Address>()
		.map_err(|e| Error::Argument(format!("bad address {}: {}", value, e)))
}

struct InfoHandler {
	chain: Weak<chain::Chain>,
	tx_pool: Weak<RwLock<pool::TransactionPool>>,
}

impl InfoHandler {
	fn status(&self) -> Result<StatusView, Error> {
		let chain = w(&self.chain)?;
		let tx_pool = w(&self.tx_pool)?;
		let head = chain.head();
		let tx_pool = tx_pool.read();
		Ok(StatusView {
			version: env!("CARGO_PKG_VERSION").to_owned(),
			chain: global::chain_type().shortname(),
			height: head.height,
			tip: head.tip.to_string(),
			pool_count: tx_pool.size(),
			pool_bytes: tx_pool.total_size(),
			min_relay_rate: tx_pool.min_rate(),
		})
	}
}

impl Handler for InfoHandler {
	fn get(&self, _req: Request<Body>, _params: Params) -> ResponseFuture {
		result_to_response(self.status())
	}
}

struct BlockHandler {
	chain: Weak<chain::Chain>,
}

impl BlockHandler {
	fn block(&self, id: &str) -> Result<BlockView, Error> {
		let chain = w(&self.chain)?;
		let entry = if let Ok(height) = id.parse::<u64>() {
			chain.get_entry_by_height(height).map_err(chain_err)?
		} else {
			chain.get_entry(&parse_hash(id)?).map_err(chain_err)?
		};
		let entry = entry.ok_or_else(|| Error::NotFound(format!("block {}", id)))?;
		let block = chain
			.get_block(&entry.hash())
			.map_err(chain_err)?
			.ok_or_else(|| Error::NotFound(format!("block {}", id)))?;
		Ok(BlockView::new(&block, &entry))
	}
}

impl Handler for BlockHandler {
	fn get(&self, _req: Request<Body>, params: Params) -> ResponseFuture {
		let id = params.get("id").unwrap_or("").to_string();
		result_to_response(self.block(&id))
	}
}

struct CoinHandler {
	chain: Weak<chain::Chain>,
	tx_pool: Weak<RwLock<pool::TransactionPool>>,
}

impl CoinHandler {
	fn coin(&self, hash: &str, index: &str) -> Result<UtxoView, Error> {
		let chain = w(&self.chain)?;
		let tx_pool = w(&self.tx_pool)?;
		let hash = parse_hash(hash)?;
		let index: u32 = index
			.parse()
			.map_err(|_| Error::Argument(format!("bad output index {}", index)))?;
		let outpoint = OutPoint::new(hash, index);

		let tx_pool = tx_pool.read();
		if tx_pool.is_spent(&outpoint) {
			return Err(Error::NotFound(format!("coin {}", outpoint)));
		}
		let coin = match tx_pool.get_coin(&outpoint) {
			Some(coin) => coin,
			None => chain
				.get_coin(&outpoint)
				.map_err(chain_err)?
				.ok_or_else(|| Error::NotFound(format!("coin {}", outpoint)))?,
		};
		Ok(UtxoView::new(&outpoint, &coin))
	}
}

impl Handler for CoinHandler {
	fn get(&self, _req: Request<Body>, params: Params) -> ResponseFuture {
		let hash = params.get("hash").unwrap_or("").to_string();
		let index = params.get("index").unwrap_or("").to_string();
		result_to_response(self.coin(&hash, &index))
	}
}

struct AddressCoinHandler {
	chain: Weak<chain::Chain>,
	tx_pool: Weak<RwLock<pool::TransactionPool>>,
}

impl AddressCoinHandler {
	fn coins(&self, addr: &str) -> Result<Vec<UtxoView>, Error> {
		let chain = w(&self.chain)?;
		let tx_pool = w(&self.tx_pool)?;
		let address = parse_address(addr)?;
		let key = address.index_key();

		let tx_pool = tx_pool.read();
		let mut views = vec![];
		for outpoint in chain.get_coins_by_script(&key).map_err(chain_err)? {
			if tx_pool.is_spent(&outpoint) {
				continue;
			}
			if let Some(coin) = chain.get_coin(&outpoint).map_err(chain_err)? {
				views.push(UtxoView::new(&outpoint, &coin));
			}
		}
		for hash in tx_pool.get_hashes_by_script(&key) {
			if let Some(entry) = tx_pool.get_entry(&hash) {
				for index in 0..entry.tx.outputs.len() {
					let outpoint = OutPoint::new(hash, index as u32);
					if let Some(coin) = tx_pool.get_coin(&outpoint) {
						if coin.script_pubkey.index_key() == key {
							views.push(UtxoView::new(&outpoint, &coin));
						}
					}
				}
			}
		}
		Ok(views)
	}
}

impl Handler for AddressCoinHandler {
	fn get(&self, _req: Request<Body>, params: Params) -> ResponseFuture {
		let addr = params.get("addr").unwrap_or("").to_string();
		result_to_response(self.coins(&addr))
	}
}

struct TxHandler {
	chain: Weak<chain::Chain>,
	tx_pool: Weak<RwLock<pool::TransactionPool>>,
}

impl TxHandler {
	fn tx(&self, hash: &str) -> Result<TxView, Error> {
		let chain = w(&self.chain)?;
		let tx_pool = w(&self.tx_pool)?;
		let txid = parse_hash(hash)?;

		if let Some(meta) = chain.get_tx_meta(&txid).map_err(chain_err)? {
			return Ok(TxView::new(
				&meta.tx,
				Some(meta.block_hash.to_string()),
				Some(meta.height),
				meta.time as i64,
			));
		}
		let tx_pool = tx_pool.read();
		let entry = tx_pool
			.get_entry(&txid)
			.ok_or_else(|| Error::NotFound(format!("tx {}", txid)))?;
		Ok(TxView::new(&entry.tx, None, None, entry.time))
	}
}

impl Handler for TxHandler {
	fn get(&self, _req: Request<Body>, params: Params) -> ResponseFuture {
		let hash = params.get("hash").unwrap_or("").to_string();
		result_to_response(self.tx(&hash))
	}
}

struct AddressTxHandler {
	chain: Weak<chain::Chain>,
	tx_pool: Weak<RwLock<pool::TransactionPool>>,
}

impl AddressTxHandler {
	fn txs(&self, addr: &str) -> Result<Vec<TxView>, Error> {
		let chain = w(&self.chain)?;
		let tx_pool = w(&self.tx_pool)?;
		let address = parse_address(addr)?;
		let key = address.index_key();

		let mut views = vec![];
		for txid in chain.get_txids_by_script(&key).map_err(chain_err)? {
			if let Some(meta) = chain.get_tx_meta(&txid).map_err(chain_err)? {
				views.push(TxView::new(
					&meta.tx,
					Some(meta.block_hash.to_string()),
					Some(meta.height),
					meta.time as i64,
				));
			}
		}
		let tx_pool = tx_pool.read();
		for hash in tx_pool.get_hashes_by_script(&key) {
			if let Some(entry) = tx_pool.get_entry(&hash) {
				views.push(TxView::new(&entry.tx, None, None, entry.time));
			}
		}
		Ok(views)
	}
}

impl Handler for AddressTxHandler {
	fn get(&self, _req: Request<Body>, params: Params) -> ResponseFuture {
		let addr = params.get("addr").unwrap_or("").to_string();
		result_to_response(self.txs(&addr))
	}
}

struct MempoolHandler {
	tx_pool: Weak<RwLock<pool::TransactionPool>>,
}

impl Handler for MempoolHandler {
	fn get(&self, _req: Request<Body>, _params: Params) -> ResponseFuture {
		let result = w(&self.tx_pool).map(|tx_pool| {
			let tx_pool = tx_pool.read();
			MempoolView {
				count: tx_pool.size(),
				bytes: tx_pool.total_size(),
				txids: tx_pool
					.get_snapshot()
					.iter()
					.map(|h| h.to_string())
					.collect(),
			}
		});
		result_to_response(result)
	}
}

struct BroadcastHandler {
	tx_pool: Weak<RwLock<pool::TransactionPool>>,
}

impl BroadcastHandler {
	fn broadcast(
		tx_pool: Arc<RwLock<pool::TransactionPool>>,
		body: &[u8],
	) -> Result<BroadcastResponse, Error> {
		let request: BroadcastRequest = serde_json::from_slice(body)
			.map_err(|e| Error::RequestError(format!("bad request body: {}", e)))?;
		let raw = util::from_hex(request.tx)
			.map_err(|e| Error::Argument(format!("bad tx hex: {}", e)))?;
		let tx: Transaction = ser::deserialize(&mut &raw[..])
			.map_err(|e| Error::Argument(format!("bad tx encoding: {}", e)))?;
		let txid = tx.hash();

		let source = pool::TxSource {
			debug_name: "api".to_owned(),
			identifier: "localhost".to_owned(),
		};
		tx_pool
			.write()
			.add_to_pool(source, tx)
			.map_err(|e| match e {
				PoolError::Chain(inner) => Error::Internal(inner),
				other => Error::Argument(format!("{}", other)),
			})?;
		Ok(BroadcastResponse {
			txid: txid.to_string(),
		})
	}
}

impl Handler for BroadcastHandler {
	fn post(&self, req: Request<Body>, _params: Params) -> ResponseFuture {
		let tx_pool = self.tx_pool.clone();
		Box::pin(async move {
			let body = match hyper::body::to_bytes(req.into_body()).await {
				Ok(body) => body,
				Err(e) => {
					return error_response(Error::RequestError(format!(
						"failed to read body: {}",
						e
					)))
					.await;
				}
			};
			let result = w(&tx_pool)
				.and_then(|tx_pool| BroadcastHandler::broadcast(tx_pool, &body));
			result_to_response(result).await
		})
	}
}

struct ResetHandler {
	chain: Weak<chain::Chain>,
}

impl Handler for ResetHandler {
	fn post(&self, req: Request<Body>, _params: Params) -> ResponseFuture {
		let chain = self.chain.clone();
		Box::pin(async move {
			let body = match hyper::body::to_bytes(req.into_body()).await {
				Ok(body) => body,
				Err(e) => {
					return error_response(Error::RequestError(format!(
						"failed to read body: {}",
						e
					)))
					.await;
				}
			};
			let result = w(&chain).and_then(|chain| {
				let request: ResetRequest = serde_json::from_slice(&body)
					.map_err(|e| Error::RequestError(format!("bad request body: {}", e)))?;
				chain
					.reset(request.height)
					.map_err(|e| Error::Argument(format!("reset failed: {}", e)))?;
				Ok(request)
			});
			result_to_response(result).await
		})
	}
}

struct FeeHandler {
	tx_pool: Weak<RwLock<pool::TransactionPool>>,
}

impl Handler for FeeHandler {
	fn get(&self, _req: Request<Body>, params: Params) -> ResponseFuture {
		let blocks: usize = match params.get("blocks").unwrap_or("").parse() {
			Ok(blocks) => blocks,
			Err(_) => {
				return result_to_response::<FeeView>(Err(Error::Argument(
					"bad confirmation target".to_owned(),
				)))
			}
		};
		let result = w(&self.tx_pool).map(|tx_pool| FeeView {
			blocks,
			rate: tx_pool.read().estimate_fee(blocks),
		});
		result_to_response(result)
	}
}
