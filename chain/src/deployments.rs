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

//! Soft-fork deployment tracking through version-bits signaling. States
//! advance once per signaling window and are cached by the entry that
//! closes the window.

use std::collections::HashMap;

use kestrel_core::consensus::{Deployment, VERSION_TOP_BITS, VERSION_TOP_MASK};
use kestrel_core::core::hash::Hash;
use kestrel_core::core::script::VerifyFlags;
use kestrel_core::global;

use crate::error::{Error, ErrorKind};
use crate::store::ChainStore;
use crate::types::ChainEntry;

/// Lifecycle state of a deployment within the signaling state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdState {
	/// Defined but signaling has not started.
	Defined,
	/// Within the signaling window.
	Started,
	/// Reached the threshold, activates next window.
	LockedIn,
	/// Rules are in force.
	Active,
	/// Timed out without locking in.
	Failed,
}

/// The rule set active for a block, derived from deployment states at
/// its parent.
#[derive(Debug, Clone, Copy)]
pub struct DeploymentFlags {
	/// Script verification flags to apply.
	pub verify: VerifyFlags,
	/// BIP68/112/113 relative locktime rules in force.
	pub csv: bool,
	/// Segregated witness rules in force.
	pub segwit: bool,
}

impl Default for DeploymentFlags {
	fn default() -> DeploymentFlags {
		DeploymentFlags {
			verify: VerifyFlags::P2SH | VerifyFlags::CHECKLOCKTIMEVERIFY,
			csv: false,
			segwit: false,
		}
	}
}

/// Deployment state tracker with a per-window cache, owned by the chain
/// and queried under the chain lock.
pub struct Deployments {
	cache: HashMap<(u8, Hash), ThresholdState>,
}

impl Deployments {
	/// A new empty tracker.
	pub fn new() -> Deployments {
		Deployments {
			cache: HashMap::new(),
		}
	}

	/// The state of `deployment` for a block whose parent is `prev`.
	pub fn state(
		&mut self,
		store: &ChainStore,
		deployment: &Deployment,
		prev: Option<&ChainEntry>,
	) -> Result<ThresholdState, Error> {
		if deployment.start_time == 0 {
			return Ok(ThresholdState::Active);
		}
		let prev = match prev {
			Some(prev) => prev.clone(),
			None => return Ok(ThresholdState::Defined),
		};

		let window = global::version_bits_window();

		// rewind to the entry closing the last complete window
		let mut boundary = prev;
		while (boundary.height + 1) % window != 0 {
			if boundary.height == 0 {
				return Ok(ThresholdState::Defined);
			}
			boundary = self.parent_of(store, &boundary)?;
		}

		// walk window boundaries back until a cached or terminal state
		let mut boundaries = vec![];
		let mut state = ThresholdState::Defined;
		let mut current = Some(boundary);
		while let Some(entry) = current {
			if let Some(cached) = self.cache.get(&(deployment.bit, entry.hash())) {
				state = *cached;
				break;
			}
			let median_time = store.median_time_past(&entry)?;
			if median_time < deployment.start_time {
				// cache the trivial answer too, it terminates later walks
				self.cache
					.insert((deployment.bit, entry.hash()), ThresholdState::Defined);
				break;
			}
			boundaries.push(entry.clone());
			if entry.height + 1 < 2 * window {
				current = None;
			} else {
				let mut back = entry;
				for _ in 0..window {
					back = self.parent_of(store, &back)?;
				}
				current = Some(back);
			}
		}

		// replay forward, advancing one state per window
		while let Some(entry) = boundaries.pop() {
			state = match state {
				ThresholdState::Defined => {
					let median_time = store.median_time_past(&entry)?;
					if median_time >= deployment.timeout {
						ThresholdState::Failed
					} else if median_time >= deployment.start_time {
						ThresholdState::Started
					} else {
						ThresholdState::Defined
					}
				}
				ThresholdState::Started => {
					let median_time = store.median_time_past(&entry)?;
					if median_time >= deployment.timeout {
						ThresholdState::Failed
					} else if self.count_signaling(store, deployment, &entry, window)?
						>= global::version_bits_threshold()
					{
						ThresholdState::LockedIn
					} else {
						ThresholdState::Started
					}
				}
				ThresholdState::LockedIn => ThresholdState::Active,
				terminal => terminal,
			};
			self.cache.insert((deployment.bit, entry.hash()), state);
		}

		Ok(state)
	}

	/// The complete rule set for a block extending `prev`.
	pub fn flags(
		&mut self,
		store: &ChainStore,
		prev: Option<&ChainEntry>,
	) -> Result<DeploymentFlags, Error> {
		let mut flags = DeploymentFlags::default();
		for deployment in global::deployments() {
			if self.state(store, &deployment, prev)? != ThresholdState::Active {
				continue;
			}
			match deployment.name {
				"csv" => {
					flags.csv = true;
					flags.verify |= VerifyFlags::CHECKSEQUENCEVERIFY;
				}
				"segwit" => {
					flags.segwit = true;
					flags.verify |= VerifyFlags::WITNESS | VerifyFlags::NULLDUMMY;
				}
				_ => (),
			}
		}
		Ok(flags)
	}

	/// The version a freshly assembled block should carry: top bits plus
	/// a signal for every deployment still gathering support.
	pub fn block_version(
		&mut self,
		store: &ChainStore,
		prev: Option<&ChainEntry>,
	) -> Result<i32, Error> {
		let mut version = VERSION_TOP_BITS;
		for deployment in global::deployments() {
			match self.state(store, &deployment, prev)? {
				ThresholdState::Started | ThresholdState::LockedIn => {
					version |= 1 << deployment.bit;
				}
				_ => (),
			}
		}
		Ok(version as i32)
	}

	fn count_signaling(
		&self,
		store: &ChainStore,
		deployment: &Deployment,
		boundary: &ChainEntry,
		window: u64,
	) -> Result<u64, Error> {
		let mut count = 0;
		let mut entry = boundary.clone();
		for _ in 0..window {
			let version = entry.header.version as u32;
			if version & VERSION_TOP_MASK == VERSION_TOP_BITS
				&& (version >> deployment.bit) & 1 == 1
			{
				count += 1;
			}
			if entry.height == 0 {
				break;
			}
			entry = self.parent_of(store, &entry)?;
		}
		Ok(count)
	}

	fn parent_of(&self, store: &ChainStore, entry: &ChainEntry) -> Result<ChainEntry, Error> {
		store
			.get_entry(&entry.header.prev_hash)?
			.ok_or_else(|| Error::from(ErrorKind::Other("missing parent entry".to_owned())))
	}
}
