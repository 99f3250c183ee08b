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

//! Values that should be shared across all modules, without necessarily
//! having to pass them all over the place, but aren't consensus values.
//! should be used sparingly.

use std::sync::RwLock;

use crate::consensus::{
	Deployment, COINBASE_MATURITY, DEPLOYMENT_CSV, DEPLOYMENT_SEGWIT, VERSION_BITS_THRESHOLD,
	VERSION_BITS_WINDOW,
};

/// Coinbase maturity on the automated testing network, short enough for
/// tests to spend rewards without mining hundreds of blocks.
pub const AUTOMATED_TESTING_COINBASE_MATURITY: u64 = 2;

/// Halving interval on the automated testing network.
pub const AUTOMATED_TESTING_HALVING_INTERVAL: u64 = 150;

/// Signaling window on the automated testing network.
pub const AUTOMATED_TESTING_VERSION_BITS_WINDOW: u64 = 144;

/// Signaling threshold on the automated testing network (75%).
pub const AUTOMATED_TESTING_VERSION_BITS_THRESHOLD: u64 = 108;

/// Halving interval on production networks.
pub const PRODUCTION_HALVING_INTERVAL: u64 = 210_000;

/// Proof-of-work limit on production networks, in compact form.
pub const PRODUCTION_POW_LIMIT_BITS: u32 = 0x1d00_ffff;

/// Proof-of-work limit on the automated testing network, trivially easy.
pub const AUTOMATED_TESTING_POW_LIMIT_BITS: u32 = 0x207f_ffff;

/// A deployment that is always active on test networks.
const ALWAYS_ACTIVE: i64 = 0;

/// Types of chain a server can run with, dictates the genesis block and
/// and mining parameters used.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ChainTypes {
	/// For CI testing: trivial proof-of-work, short maturity, no
	/// retargeting.
	AutomatedTesting,
	/// Public test network.
	Testnet,
	/// Main production network.
	Mainnet,
}

impl Default for ChainTypes {
	fn default() -> ChainTypes {
		ChainTypes::Mainnet
	}
}

impl ChainTypes {
	/// Short name of the chain, used for data directories.
	pub fn shortname(&self) -> String {
		match *self {
			ChainTypes::AutomatedTesting => "auto".to_owned(),
			ChainTypes::Testnet => "test".to_owned(),
			ChainTypes::Mainnet => "main".to_owned(),
		}
	}
}

lazy_static! {
	/// The chain type on which the node runs
	pub static ref CHAIN_TYPE: RwLock<ChainTypes> = RwLock::new(ChainTypes::Mainnet);
}

/// Set the chain type on a per-process basis. Should only be called once
/// on node startup (tests set it per test binary).
pub fn set_mining_mode(mode: ChainTypes) {
	let mut param_ref = CHAIN_TYPE.write().unwrap();
	*param_ref = mode;
}

/// The chain type we are currently running under.
pub fn chain_type() -> ChainTypes {
	*CHAIN_TYPE.read().unwrap()
}

/// Are we on the main production network?
pub fn is_production_mode() -> bool {
	ChainTypes::Mainnet == chain_type()
}

/// Are we in one of our automated testing modes?
pub fn is_automated_testing_mode() -> bool {
	ChainTypes::AutomatedTesting == chain_type()
}

/// The proof-of-work limit of the current chain, in compact form.
pub fn pow_limit_bits() -> u32 {
	match chain_type() {
		ChainTypes::AutomatedTesting => AUTOMATED_TESTING_POW_LIMIT_BITS,
		_ => PRODUCTION_POW_LIMIT_BITS,
	}
}

/// Whether the current chain skips difficulty retargeting entirely and
/// always accepts the limit target.
pub fn no_retargeting() -> bool {
	is_automated_testing_mode()
}

/// Coinbase maturity for the current chain.
pub fn coinbase_maturity() -> u64 {
	match chain_type() {
		ChainTypes::AutomatedTesting => AUTOMATED_TESTING_COINBASE_MATURITY,
		_ => COINBASE_MATURITY,
	}
}

/// Subsidy halving interval for the current chain.
pub fn halving_interval() -> u64 {
	match chain_type() {
		ChainTypes::AutomatedTesting => AUTOMATED_TESTING_HALVING_INTERVAL,
		_ => PRODUCTION_HALVING_INTERVAL,
	}
}

/// Version-bits signaling window size for the current chain.
pub fn version_bits_window() -> u64 {
	match chain_type() {
		ChainTypes::AutomatedTesting => AUTOMATED_TESTING_VERSION_BITS_WINDOW,
		_ => VERSION_BITS_WINDOW,
	}
}

/// Version-bits lock-in threshold for the current chain.
pub fn version_bits_threshold() -> u64 {
	match chain_type() {
		ChainTypes::AutomatedTesting => AUTOMATED_TESTING_VERSION_BITS_THRESHOLD,
		_ => VERSION_BITS_THRESHOLD,
	}
}

/// The soft-fork deployments of the current chain. On the automated
/// testing chain everything is active from genesis so tests exercise the
/// full rule set.
pub fn deployments() -> Vec<Deployment> {
	match chain_type() {
		ChainTypes::AutomatedTesting => vec![
			Deployment {
				start_time: ALWAYS_ACTIVE,
				..DEPLOYMENT_CSV
			},
			Deployment {
				start_time: ALWAYS_ACTIVE,
				..DEPLOYMENT_SEGWIT
			},
		],
		_ => vec![DEPLOYMENT_CSV, DEPLOYMENT_SEGWIT],
	}
}

/// Height from which the coinbase must commit to the block height
/// (BIP34-style). Zero on test networks so the rule is always on.
pub fn height_in_coinbase_from() -> u64 {
	match chain_type() {
		ChainTypes::AutomatedTesting => 0,
		ChainTypes::Testnet => 21_111,
		ChainTypes::Mainnet => 227_931,
	}
}

/// Version byte prefix for pay-to-pubkey-hash addresses.
pub fn p2pkh_version() -> u8 {
	match chain_type() {
		ChainTypes::Mainnet => 0x00,
		_ => 0x6f,
	}
}

/// Version byte prefix for pay-to-script-hash addresses.
pub fn p2sh_version() -> u8 {
	match chain_type() {
		ChainTypes::Mainnet => 0x05,
		_ => 0xc4,
	}
}

/// Human readable part for bech32 witness addresses.
pub fn bech32_hrp() -> String {
	match chain_type() {
		ChainTypes::AutomatedTesting => "kcrt".to_owned(),
		ChainTypes::Testnet => "tk".to_owned(),
		ChainTypes::Mainnet => "kc".to_owned(),
	}
}
