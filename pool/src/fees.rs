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

//! Fee estimation from observed confirmation delays. Confirmed pool
//! entries land in geometric fee-rate buckets; each bucket tracks
//! exponentially decayed counts of how often its transactions confirmed
//! within N blocks. Estimating for a target returns the cheapest rate
//! whose success ratio clears the threshold.

use kestrel_core::ser::{self, Readable, Reader, Writeable, Writer};

use crate::types::PoolEntry;

/// Furthest confirmation target we answer for.
pub const MAX_CONFIRM_TARGET: usize = 25;

/// Required success ratio within the target.
const SUCCESS_RATIO: f64 = 0.95;

/// Exponential decay applied to all counts at each block.
const DECAY: f64 = 0.998;

/// Minimum accumulated sample mass before a bucket range is trusted.
const SUFFICIENT_SAMPLES: f64 = 1.0;

/// Lowest tracked rate, atomic units per kilo-vsize.
const MIN_BUCKET_RATE: f64 = 1000.0;

/// Highest tracked rate.
const MAX_BUCKET_RATE: f64 = 10_000_000.0;

/// Geometric bucket spacing.
const BUCKET_SPACING: f64 = 1.1;

/// The estimator itself. Checkpointable through the codec traits.
pub struct FeeEstimator {
	/// Upper rate bound of each bucket, ascending.
	buckets: Vec<f64>,
	/// confirmed[target][bucket]: decayed count of txs from `bucket`
	/// confirmed within `target + 1` blocks.
	confirmed: Vec<Vec<f64>>,
	/// Decayed count of all observed txs per bucket.
	total: Vec<f64>,
	/// Height of the last processed block.
	best_height: u64,
}

impl FeeEstimator {
	/// A fresh estimator with no observations.
	pub fn new() -> FeeEstimator {
		let mut buckets = vec![];
		let mut rate = MIN_BUCKET_RATE;
		while rate < MAX_BUCKET_RATE {
			buckets.push(rate);
			rate *= BUCKET_SPACING;
		}
		buckets.push(MAX_BUCKET_RATE);
		let len = buckets.len();
		FeeEstimator {
			buckets,
			confirmed: vec![vec![0.0; len]; MAX_CONFIRM_TARGET],
			total: vec![0.0; len],
			best_height: 0,
		}
	}

	fn bucket_index(&self, rate: u64) -> usize {
		match self
			.buckets
			.iter()
			.position(|bound| (rate as f64) <= *bound)
		{
			Some(index) => index,
			None => self.buckets.len() - 1,
		}
	}

	/// Record the confirmations a connected block brought: every entry
	/// contributes one observation of how many blocks it waited at its
	/// fee rate. Decays all history by one block first.
	pub fn process_block<'a, I>(&mut self, height: u64, entries: I)
	where
		I: IntoIterator<Item = &'a PoolEntry>,
	{
		if height <= self.best_height {
			return;
		}
		self.best_height = height;

		for bucket in self.total.iter_mut() {
			*bucket *= DECAY;
		}
		for target in self.confirmed.iter_mut() {
			for bucket in target.iter_mut() {
				*bucket *= DECAY;
			}
		}

		for entry in entries {
			let blocks_waited = height.saturating_sub(entry.height).max(1) as usize;
			let bucket = self.bucket_index(entry.fee_rate());
			self.total[bucket] += 1.0;
			for target in blocks_waited.saturating_sub(1)..MAX_CONFIRM_TARGET {
				self.confirmed[target][bucket] += 1.0;
			}
		}
	}

	/// The lowest fee rate expected to confirm within `target` blocks,
	/// or zero when there is not enough data to answer.
	pub fn estimate_fee(&self, target: usize) -> u64 {
		if target == 0 || target > MAX_CONFIRM_TARGET {
			return 0;
		}
		let confirmed = &self.confirmed[target - 1];

		// walk buckets from the most expensive down, extending the
		// passing range while the accumulated ratio holds
		let mut acc_confirmed = 0.0;
		let mut acc_total = 0.0;
		let mut best: Option<usize> = None;
		for bucket in (0..self.buckets.len()).rev() {
			acc_confirmed += confirmed[bucket];
			acc_total += self.total[bucket];
			if acc_total < SUFFICIENT_SAMPLES {
				continue;
			}
			if acc_confirmed / acc_total >= SUCCESS_RATIO {
				best = Some(bucket);
			} else if best.is_some() {
				break;
			}
		}
		match best {
			Some(bucket) => self.buckets[bucket].ceil() as u64,
			None => 0,
		}
	}

	/// Height of the last block folded into the statistics.
	pub fn best_height(&self) -> u64 {
		self.best_height
	}
}

impl Default for FeeEstimator {
	fn default() -> FeeEstimator {
		FeeEstimator::new()
	}
}

impl Writeable for FeeEstimator {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.best_height)?;
		writer.write_varint(self.buckets.len() as u64)?;
		for bucket in &self.total {
			writer.write_u64(bucket.to_bits())?;
		}
		writer.write_varint(self.confirmed.len() as u64)?;
		for target in &self.confirmed {
			for bucket in target {
				writer.write_u64(bucket.to_bits())?;
			}
		}
		Ok(())
	}
}

impl Readable for FeeEstimator {
	fn read(reader: &mut dyn Reader) -> Result<FeeEstimator, ser::Error> {
		let mut estimator = FeeEstimator::new();
		estimator.best_height = reader.read_u64()?;
		let bucket_count = reader.read_varint()? as usize;
		if bucket_count != estimator.buckets.len() {
			// bucket layout changed between versions, drop the history
			return Ok(FeeEstimator::new());
		}
		for bucket in estimator.total.iter_mut() {
			*bucket = f64::from_bits(reader.read_u64()?);
		}
		let target_count = reader.read_varint()? as usize;
		if target_count != MAX_CONFIRM_TARGET {
			return Ok(FeeEstimator::new());
		}
		for target in estimator.confirmed.iter_mut() {
			for bucket in target.iter_mut() {
				*bucket = f64::from_bits(reader.read_u64()?);
			}
		}
		Ok(estimator)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use kestrel_core::core::hash::sha256d;
	use kestrel_core::core::script::Script;
	use kestrel_core::core::transaction::{OutPoint, Transaction, TxIn, TxOut};
	use std::collections::HashSet;

	fn entry_with(fee: u64, height: u64, salt: u8) -> PoolEntry {
		let mut tx = Transaction::new();
		tx.inputs
			.push(TxIn::new(OutPoint::new(sha256d(&[salt]), 0)));
		tx.outputs.push(TxOut::new(1000, Script::p2pkh(&[salt; 20])));
		let weight = tx.weight();
		let size = tx.total_size();
		let hash = tx.hash();
		PoolEntry {
			tx,
			hash,
			fee,
			weight,
			size,
			sigops: 4,
			height,
			time: 0,
			priority: 0.0,
			parents: HashSet::new(),
			children: HashSet::new(),
			ancestor_fee: fee,
			ancestor_weight: weight,
			ancestor_sigops: 4,
			ancestor_count: 1,
			descendant_fee: fee,
			descendant_weight: weight,
			descendant_count: 1,
		}
	}

	#[test]
	fn no_data_no_estimate() {
		let estimator = FeeEstimator::new();
		assert_eq!(estimator.estimate_fee(2), 0);
	}

	#[test]
	fn converges_on_synthetic_stream() {
		let mut estimator = FeeEstimator::new();
		// high-rate txs confirm next block, low-rate txs take ten
		for height in 1..200u64 {
			let fast = entry_with(50_000, height - 1, height as u8);
			let entries = if height >= 10 {
				vec![fast, entry_with(300, height - 10, height as u8)]
			} else {
				vec![fast]
			};
			estimator.process_block(height, entries.iter());
		}

		let fast_rate = estimator.estimate_fee(2);
		assert!(fast_rate > 0, "expected an estimate for target 2");
		let slow_rate = estimator.estimate_fee(15);
		assert!(slow_rate > 0);
		assert!(
			slow_rate <= fast_rate,
			"longer targets should not cost more: {} vs {}",
			slow_rate,
			fast_rate
		);
	}

	#[test]
	fn checkpoint_roundtrip() {
		let mut estimator = FeeEstimator::new();
		for height in 1..50u64 {
			let entries = vec![entry_with(10_000, height - 1, height as u8)];
			estimator.process_block(height, entries.iter());
		}
		let bytes = ser::ser_vec(&estimator).unwrap();
		let restored: FeeEstimator = ser::deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(restored.best_height(), estimator.best_height());
		assert_eq!(restored.estimate_fee(2), estimator.estimate_fee(2));
	}
}
