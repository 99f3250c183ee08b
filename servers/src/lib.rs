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

//! Node server: glues the blockchain, the transaction pool, the block
//! assembler and the REST API together, owning the shared resource
//! lifecycles (database environment, worker pool, stop state).

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod common;
pub mod mining;
mod node;

pub use crate::common::types::{Error, MinerConfig, ServerConfig};
pub use crate::mining::miner::{BlockAssembler, BlockTemplate};
pub use crate::node::server::Server;
