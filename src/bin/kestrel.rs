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

//! Main entry point for the kestrel node binary: parse the command
//! line, resolve configuration, start the server and wait for a
//! termination signal.

#[macro_use]
extern crate log;

use std::process::exit;
use std::sync::mpsc;

use clap::{App, Arg};

use kestrel_config as config;
use kestrel_core::global::ChainTypes;
use kestrel_servers::Server;
use kestrel_util::init_logger;

fn main() {
	let exit_code = real_main();
	exit(exit_code);
}

fn real_main() -> i32 {
	let args = App::new("kestrel")
		.version(env!("CARGO_PKG_VERSION"))
		.about("A Bitcoin full node implementation.")
		.arg(
			Arg::with_name("chain")
				.long("chain")
				.help("Chain to run against: main, test or auto")
				.takes_value(true),
		)
		.arg(
			Arg::with_name("dir")
				.long("dir")
				.help("Data directory, overriding the configured one")
				.takes_value(true),
		)
		.arg(
			Arg::with_name("api_addr")
				.long("api-addr")
				.help("Address the REST API binds to")
				.takes_value(true),
		)
		.arg(
			Arg::with_name("api_secret")
				.long("api-secret")
				.help("Shared secret protecting the REST API")
				.takes_value(true),
		)
		.arg(
			Arg::with_name("mine")
				.long("mine")
				.help("Run the CPU miner (test networks)"),
		)
		.arg(
			Arg::with_name("payout")
				.long("payout")
				.help("Payout address for mined blocks")
				.takes_value(true),
		)
		.get_matches();

	let chain_type = match args.value_of("chain") {
		Some("main") | None => ChainTypes::Mainnet,
		Some("test") => ChainTypes::Testnet,
		Some("auto") => ChainTypes::AutomatedTesting,
		Some(other) => {
			eprintln!("unknown chain type: {}", other);
			return 1;
		}
	};

	let mut global_config = match config::initial_setup_server(chain_type) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("failed to resolve configuration: {}", e);
			return 1;
		}
	};
	let mut server_config = global_config.server_config();
	server_config.chain_type = chain_type;

	if let Some(dir) = args.value_of("dir") {
		server_config.db_root = dir.to_owned();
	}
	if let Some(addr) = args.value_of("api_addr") {
		server_config.api_http_addr = addr.to_owned();
	}
	if let Some(secret) = args.value_of("api_secret") {
		server_config.api_secret = Some(secret.to_owned());
	}
	if args.is_present("mine") {
		server_config.run_test_miner = Some(true);
	}
	if let Some(payout) = args.value_of("payout") {
		server_config.test_miner_payout = Some(payout.to_owned());
	}

	init_logger(server_config.logging_config.clone());
	info!(
		"starting kestrel {} on {:?}, data in {}",
		env!("CARGO_PKG_VERSION"),
		server_config.chain_type,
		server_config.db_root
	);

	let server = match Server::new(server_config) {
		Ok(server) => server,
		Err(e) => {
			error!("failed to start server: {:?}", e);
			return 1;
		}
	};

	// park until a termination signal comes in
	let (signal_tx, signal_rx) = mpsc::channel();
	if let Err(e) = ctrlc::set_handler(move || {
		let _ = signal_tx.send(());
	}) {
		error!("failed to install signal handler: {}", e);
		server.stop();
		return 1;
	}
	let _ = signal_rx.recv();

	warn!("shutdown signal received, stopping");
	server.stop();
	0
}
