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

//! Mining service: gets a block template to mine and grinds the header
//! nonce until the hash meets the target. Only meaningful on test
//! networks with a trivial proof-of-work limit; any mined block is
//! submitted back through the regular chain pipeline.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;

use kestrel_chain as chain;
use kestrel_chain::Options;
use kestrel_core::consensus::target_from_compact;
use kestrel_core::core::hash::Hashed;
use kestrel_core::core::Address;
use kestrel_pool as pool;
use kestrel_util::{RwLock, StopState};

use crate::common::types::MinerConfig;
use crate::mining::miner::BlockAssembler;

/// Seconds to keep grinding one template before refreshing it to pick
/// up new transactions.
const ATTEMPT_TIME_PER_BLOCK: i64 = 2;

/// The CPU miner service.
pub struct Miner {
	chain: Arc<chain::Chain>,
	assembler: BlockAssembler,
	payout: Address,
	stop_state: Arc<StopState>,
}

impl Miner {
	/// Creates a new Miner. Needs references to the chain state and the
	/// transaction pool.
	pub fn new(
		config: MinerConfig,
		chain: Arc<chain::Chain>,
		tx_pool: Arc<RwLock<pool::TransactionPool>>,
		payout: Address,
		stop_state: Arc<StopState>,
	) -> Miner {
		let assembler = BlockAssembler::new(chain.clone(), tx_pool, config);
		Miner {
			chain,
			assembler,
			payout,
			stop_state,
		}
	}

	/// Keep building and mining blocks until the stop state flips.
	pub fn run_loop(&self) {
		info!("miner: starting, payout to {}", self.payout);
		let mut rng = rand::thread_rng();

		while !self.stop_state.is_stopped() {
			let mut template = match self.assembler.build_template(&self.payout) {
				Ok(template) => template,
				Err(e) => {
					error!("miner: could not build template: {:?}", e);
					return;
				}
			};

			let target = match target_from_compact(template.bits) {
				Some(target) => target,
				None => {
					error!("miner: template carries invalid bits {:x}", template.bits);
					return;
				}
			};

			let tip = self.chain.head().tip;
			let deadline = Utc::now().timestamp() + ATTEMPT_TIME_PER_BLOCK;
			template.block.header.nonce = rng.gen();

			let mut found = false;
			while Utc::now().timestamp() < deadline {
				if self.stop_state.is_stopped() {
					return;
				}
				if self.chain.head().tip != tip {
					// someone else extended the chain, rebuild
					break;
				}
				if template.block.header.hash().cmp_target(&target) != Ordering::Greater {
					found = true;
					break;
				}
				template.block.header.nonce = template.block.header.nonce.wrapping_add(1);
			}

			if !found {
				continue;
			}

			let height = template.height;
			let hash = template.block.hash();
			match self.chain.process_block(template.block, Options::MINE) {
				Ok(_) => info!("miner: found block {} at {}", hash, height),
				Err(e) => error!("miner: mined block {} rejected: {}", hash, e),
			}
		}
	}
}
