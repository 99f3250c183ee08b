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

//! RESTful API server exposing the node's query surface as JSON/HTTP
//! endpoints: chain and pool queries, transaction broadcast, chain
//! reset and fee estimation.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]

#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

mod auth;
mod handlers;
mod rest;
mod router;
mod types;
mod web;

pub use crate::auth::BasicAuthMiddleware;
pub use crate::handlers::{build_router, start_node_apis};
pub use crate::rest::{tls_config, ApiServer, Error, TLSConfig};
pub use crate::router::{Handler, ResponseFuture, Router};
