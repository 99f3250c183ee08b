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

//! All the rules required for the currency to reach consensus across the
//! whole network are complex and hard to completely isolate. Some can be
//! simple parameters (like the block subsidy), others complex algorithms
//! (like the difficulty retarget or reorg rules). However, as long as
//! they're simple enough, consensus-relevant constants and short functions
//! should be kept here.

use num_bigint::BigUint;

/// A single atomic unit of currency.
pub const COIN: u64 = 100_000_000;

/// Total money supply cap, used to range-check values everywhere.
pub const MAX_MONEY: u64 = 21_000_000 * COIN;

/// The starting block subsidy, halved every halving interval.
pub const BASE_REWARD: u64 = 50 * COIN;

/// Scale factor relating base size and weight.
pub const WITNESS_SCALE_FACTOR: usize = 4;

/// The maximum block weight.
pub const MAX_BLOCK_WEIGHT: usize = 4_000_000;

/// The maximum block base size (pre-witness serialization).
pub const MAX_BLOCK_BASE_SIZE: usize = 1_000_000;

/// The maximum accumulated cost of signature operations in a block.
pub const MAX_BLOCK_SIGOPS_COST: usize = 80_000;

/// Number of blocks before a coinbase output may be spent, on production
/// networks. Test networks shorten this via `global`.
pub const COINBASE_MATURITY: u64 = 100;

/// Number of prior block timestamps the median-time-past is taken over.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Locktime values at or above this threshold are interpreted as unix
/// timestamps, below as block heights.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Sequence number mask disabling relative locktime semantics.
pub const SEQUENCE_DISABLE_FLAG: u32 = 1 << 31;

/// Sequence flag switching the relative locktime to time-based units.
pub const SEQUENCE_TYPE_FLAG: u32 = 1 << 22;

/// Mask extracting the relative locktime value out of a sequence number.
pub const SEQUENCE_MASK: u32 = 0x0000_ffff;

/// Time-based relative locktimes count in units of 2^9 = 512 seconds.
pub const SEQUENCE_GRANULARITY: u32 = 9;

/// How far in the future a block timestamp may be, in seconds.
pub const MAX_FUTURE_DRIFT: i64 = 2 * 60 * 60;

/// Target time interval between blocks, in seconds.
pub const TARGET_SPACING: i64 = 10 * 60;

/// Length of a retarget window, in seconds (two weeks).
pub const TARGET_TIMESPAN: i64 = 14 * 24 * 60 * 60;

/// Number of blocks between difficulty adjustments.
pub const RETARGET_INTERVAL: u64 = (TARGET_TIMESPAN / TARGET_SPACING) as u64;

/// Top bits of a block version using version-bits signaling.
pub const VERSION_TOP_BITS: u32 = 0x2000_0000;

/// Mask to recognize the version-bits top bits.
pub const VERSION_TOP_MASK: u32 = 0xe000_0000;

/// Number of blocks in a version-bits signaling window.
pub const VERSION_BITS_WINDOW: u64 = RETARGET_INTERVAL;

/// Number of signaling blocks within a window needed to lock a
/// deployment in, on production networks.
pub const VERSION_BITS_THRESHOLD: u64 = 1916;

/// A consensus rule deployment signaled through version bits (BIP9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deployment {
	/// Human-readable deployment name.
	pub name: &'static str,
	/// Version bit used for signaling.
	pub bit: u8,
	/// Median-time-past at which signaling starts. A value of 0 means
	/// the deployment is always active.
	pub start_time: i64,
	/// Median-time-past at which the deployment expires if never locked
	/// in. i64::max_value() means no timeout.
	pub timeout: i64,
}

/// BIP68/112/113 relative locktime deployment.
pub const DEPLOYMENT_CSV: Deployment = Deployment {
	name: "csv",
	bit: 0,
	start_time: 1_462_060_800,
	timeout: 1_493_596_800,
};

/// Segregated witness deployment.
pub const DEPLOYMENT_SEGWIT: Deployment = Deployment {
	name: "segwit",
	bit: 1,
	start_time: 1_479_168_000,
	timeout: 1_510_704_000,
};

/// The block subsidy at a given height.
pub fn block_subsidy(height: u64, halving_interval: u64) -> u64 {
	let halvings = height / halving_interval;
	if halvings >= 64 {
		return 0;
	}
	BASE_REWARD >> halvings
}

/// Expand a compact-encoded target into its 32-byte big-endian form.
/// Returns None for negative or overflowing encodings.
pub fn target_from_compact(bits: u32) -> Option<[u8; 32]> {
	let exponent = (bits >> 24) as usize;
	let negative = bits & 0x0080_0000 != 0;
	let mut mantissa = bits & 0x007f_ffff;

	if negative && mantissa != 0 {
		return None;
	}
	if mantissa == 0 {
		return Some([0; 32]);
	}
	// strip mantissa bytes that fall below the radix point
	let mut exponent = exponent;
	while exponent < 3 {
		mantissa >>= 8;
		exponent += 1;
	}
	if exponent > 32 {
		return None;
	}

	let mut target = [0u8; 32];
	let bytes = [
		((mantissa >> 16) & 0xff) as u8,
		((mantissa >> 8) & 0xff) as u8,
		(mantissa & 0xff) as u8,
	];
	for (i, b) in bytes.iter().enumerate() {
		let pos = 32 - exponent + i;
		if pos >= 32 {
			break;
		}
		target[pos] = *b;
	}
	Some(target)
}

/// Compress a 32-byte big-endian target back into compact encoding.
pub fn compact_from_target(target: &[u8; 32]) -> u32 {
	let mut size = 32;
	for b in target.iter() {
		if *b != 0 {
			break;
		}
		size -= 1;
	}
	if size == 0 {
		return 0;
	}
	let start = 32 - size;
	let mut mantissa: u32 = 0;
	for i in 0..3 {
		mantissa <<= 8;
		if start + i < 32 {
			mantissa |= target[start + i] as u32;
		}
	}
	let mut size = size as u32;
	// high bit of the mantissa signals sign, bump the exponent instead
	if mantissa & 0x0080_0000 != 0 {
		mantissa >>= 8;
		size += 1;
	}
	(size << 24) | mantissa
}

/// Amount of work a block with the given target contributes to the chain:
/// 2^256 / (target + 1), as 32 big-endian bytes.
pub fn block_work(bits: u32) -> [u8; 32] {
	let target = match target_from_compact(bits) {
		Some(t) => t,
		None => return [0; 32],
	};
	let target = BigUint::from_bytes_be(&target);
	let numerator = BigUint::from(1u8) << 256;
	let work = numerator / (target + BigUint::from(1u8));
	let bytes = work.to_bytes_be();
	let mut out = [0u8; 32];
	if bytes.len() <= 32 {
		out[32 - bytes.len()..].copy_from_slice(&bytes);
	}
	out
}

/// Sum of two 32-byte big-endian work values, saturating at the maximum.
pub fn work_add(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
	let sum = BigUint::from_bytes_be(a) + BigUint::from_bytes_be(b);
	let bytes = sum.to_bytes_be();
	let mut out = [0u8; 32];
	if bytes.len() <= 32 {
		out[32 - bytes.len()..].copy_from_slice(&bytes);
	} else {
		out = [0xff; 32];
	}
	out
}

/// Compute the next compact target from the actual timespan of the last
/// retarget window. The timespan is clamped to a quarter/quadruple of the
/// desired timespan and the result to the network's proof-of-work limit.
pub fn retarget(prev_bits: u32, first_timestamp: i64, last_timestamp: i64, limit_bits: u32) -> u32 {
	let mut timespan = last_timestamp - first_timestamp;
	if timespan < TARGET_TIMESPAN / 4 {
		timespan = TARGET_TIMESPAN / 4;
	}
	if timespan > TARGET_TIMESPAN * 4 {
		timespan = TARGET_TIMESPAN * 4;
	}

	let prev_target = match target_from_compact(prev_bits) {
		Some(t) => t,
		None => return limit_bits,
	};
	let limit = match target_from_compact(limit_bits) {
		Some(t) => t,
		None => return limit_bits,
	};

	let new_target = BigUint::from_bytes_be(&prev_target) * BigUint::from(timespan as u64)
		/ BigUint::from(TARGET_TIMESPAN as u64);

	if new_target > BigUint::from_bytes_be(&limit) {
		return limit_bits;
	}

	let bytes = new_target.to_bytes_be();
	let mut target = [0u8; 32];
	target[32 - bytes.len()..].copy_from_slice(&bytes);
	compact_from_target(&target)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn subsidy_halves() {
		assert_eq!(block_subsidy(0, 210_000), 50 * COIN);
		assert_eq!(block_subsidy(209_999, 210_000), 50 * COIN);
		assert_eq!(block_subsidy(210_000, 210_000), 25 * COIN);
		assert_eq!(block_subsidy(420_000, 210_000), 1_250_000_000);
		assert_eq!(block_subsidy(64 * 210_000, 210_000), 0);
	}

	#[test]
	fn compact_roundtrip() {
		// the classic limit encoding: 0x00000000ffff0000...
		let target = target_from_compact(0x1d00ffff).unwrap();
		assert_eq!(target[4], 0xff);
		assert_eq!(target[5], 0xff);
		assert_eq!(target[3], 0x00);
		assert_eq!(compact_from_target(&target), 0x1d00ffff);

		let easy = target_from_compact(0x207fffff).unwrap();
		assert_eq!(easy[0], 0x7f);
		assert_eq!(compact_from_target(&easy), 0x207fffff);
	}

	#[test]
	fn compact_rejects_negative() {
		assert_eq!(target_from_compact(0x01803456), None);
	}

	#[test]
	fn work_is_monotonic() {
		// a lower target means more work
		let hard = BigUint::from_bytes_be(&block_work(0x1d00ffff));
		let easy = BigUint::from_bytes_be(&block_work(0x207fffff));
		assert!(hard > easy);

		let sum = work_add(&block_work(0x1d00ffff), &block_work(0x1d00ffff));
		assert_eq!(BigUint::from_bytes_be(&sum), hard.clone() + hard);
	}

	#[test]
	fn retarget_clamps() {
		// far too fast a window: difficulty increases fourfold at most
		let bits = retarget(0x1d00ffff, 1_000_000, 1_000_000 + TARGET_TIMESPAN / 100, 0x1d00ffff);
		let new_target = BigUint::from_bytes_be(&target_from_compact(bits).unwrap());
		let old_target = BigUint::from_bytes_be(&target_from_compact(0x1d00ffff).unwrap());
		assert!(new_target < old_target);
		assert!(new_target >= old_target / BigUint::from(5u8));

		// far too slow: clamped at the limit
		let bits = retarget(
			0x1d00ffff,
			1_000_000,
			1_000_000 + TARGET_TIMESPAN * 100,
			0x1d00ffff,
		);
		assert_eq!(bits, 0x1d00ffff);
	}
}
