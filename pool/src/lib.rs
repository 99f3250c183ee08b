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

//! The transaction pool, keeping a view of currently-valid transactions
//! that may be confirmed soon, ordered by economic value, along with the
//! fee estimator fed by their confirmations.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod fees;
mod pool;
mod types;

pub use crate::fees::FeeEstimator;
pub use crate::pool::TransactionPool;
pub use crate::types::{
	BlockChain, ChainInfo, NoopPoolAdapter, PoolAdapter, PoolConfig, PoolEntry, PoolError,
	RemovalReason, TxSource,
};
