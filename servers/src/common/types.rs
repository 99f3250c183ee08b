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

//! Server types

use std::convert::From;
use std::io;

use kestrel_api as api;
use kestrel_chain as chain;
use kestrel_core::consensus::{MAX_BLOCK_SIGOPS_COST, MAX_BLOCK_WEIGHT};
use kestrel_core::global::ChainTypes;
use kestrel_core::ser;
use kestrel_pool as pool;
use kestrel_store as store;
use kestrel_util::LoggingConfig;

/// Error type wrapping underlying module errors.
#[derive(Debug)]
pub enum Error {
	/// Error originating from the core serialization layer.
	Ser(ser::Error),
	/// Error originating from the db storage.
	Store(store::Error),
	/// Error originating from the blockchain implementation.
	Chain(chain::Error),
	/// Error originating from the transaction pool.
	Pool(pool::PoolError),
	/// Error originating from HTTP API calls.
	API(api::Error),
	/// Error originating from filesystem handling.
	IO(io::Error),
	/// Anything else.
	Other(String),
}

impl From<ser::Error> for Error {
	fn from(e: ser::Error) -> Error {
		Error::Ser(e)
	}
}
impl From<chain::Error> for Error {
	fn from(e: chain::Error) -> Error {
		Error::Chain(e)
	}
}
impl From<pool::PoolError> for Error {
	fn from(e: pool::PoolError) -> Error {
		Error::Pool(e)
	}
}
impl From<store::Error> for Error {
	fn from(e: store::Error) -> Error {
		Error::Store(e)
	}
}
impl From<api::Error> for Error {
	fn from(e: api::Error) -> Error {
		Error::API(e)
	}
}
impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::IO(e)
	}
}

/// Block assembler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MinerConfig {
	/// Weight budget for a produced template, coinbase reservation
	/// included.
	pub max_weight: usize,
	/// Sigops budget for a produced template.
	pub max_sigops: usize,
	/// Weight reserved for the coinbase transaction.
	pub reserved_weight: usize,
	/// Sigops reserved for the coinbase transaction.
	pub reserved_sigops: usize,
	/// Arbitrary bytes embedded in the coinbase script.
	pub coinbase_flags: String,
	/// Fixed block version overriding the signaling-derived one.
	pub block_version: Option<i32>,
	/// Weight budget spent on the coin-age priority phase before
	/// switching to fee-rate ordering. Zero disables the phase.
	pub priority_weight: usize,
	/// Minimum coin-age priority an entry needs to be selected during
	/// the priority phase.
	pub priority_threshold: f64,
	/// Run the full chain validator over every produced template. A
	/// failure there means the assembler produced garbage and aborts.
	pub preverify: bool,
}

impl Default for MinerConfig {
	fn default() -> MinerConfig {
		MinerConfig {
			max_weight: MAX_BLOCK_WEIGHT,
			max_sigops: MAX_BLOCK_SIGOPS_COST,
			reserved_weight: 4000,
			reserved_sigops: 400,
			coinbase_flags: "mined by kestrel".to_owned(),
			block_version: None,
			priority_weight: 0,
			priority_threshold: 57_600_000.0,
			preverify: false,
		}
	}
}

/// Full server configuration, aggregating the component configurations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
	/// Directory under which all of this node's data lives.
	pub db_root: String,
	/// Network to run against.
	pub chain_type: ChainTypes,
	/// Address the REST API binds to.
	pub api_http_addr: String,
	/// Shared API secret; requests authenticate with its hash.
	pub api_secret: Option<String>,
	/// TLS certificate file for the API listener.
	pub tls_certificate_file: Option<String>,
	/// TLS private key file for the API listener.
	pub tls_certificate_key: Option<String>,
	/// Number of script-verification worker threads.
	pub worker_threads: usize,
	/// Save the mempool across restarts.
	pub persist_mempool: bool,
	/// Run the CPU miner (test networks).
	pub run_test_miner: Option<bool>,
	/// Payout address for the test miner.
	pub test_miner_payout: Option<String>,
	/// Transaction pool configuration.
	pub pool_config: pool::PoolConfig,
	/// Block assembler configuration.
	pub miner_config: MinerConfig,
	/// Logging configuration, consumed by the binary shell.
	pub logging_config: Option<LoggingConfig>,
}

impl Default for ServerConfig {
	fn default() -> ServerConfig {
		ServerConfig {
			db_root: ".kestrel".to_owned(),
			chain_type: ChainTypes::default(),
			api_http_addr: "127.0.0.1:8332".to_owned(),
			api_secret: None,
			tls_certificate_file: None,
			tls_certificate_key: None,
			worker_threads: 4,
			persist_mempool: true,
			run_test_miner: None,
			test_miner_payout: None,
			pool_config: pool::PoolConfig::default(),
			miner_config: MinerConfig::default(),
			logging_config: Some(LoggingConfig::default()),
		}
	}
}
