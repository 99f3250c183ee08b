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

//! Configuration file discovery and loading. The server config lives in
//! a per-chain data directory; a missing file is generated from the
//! defaults on first start.

use std::env;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;

use kestrel_core::global::ChainTypes;

use crate::types::{ConfigError, ConfigMembers, GlobalConfig};

/// Base home directory name.
pub const KESTREL_HOME: &str = ".kestrel";

/// Name of the server configuration file.
pub const SERVER_CONFIG_FILE_NAME: &str = "kestrel-server.toml";

fn get_kestrel_path(chain_type: ChainTypes) -> Result<PathBuf, ConfigError> {
	let mut kestrel_path = match dirs::home_dir() {
		Some(p) => p,
		None => PathBuf::new(),
	};
	kestrel_path.push(KESTREL_HOME);
	kestrel_path.push(chain_type.shortname());
	fs::create_dir_all(kestrel_path.clone())?;
	Ok(kestrel_path)
}

fn check_config_current_dir(path: &str) -> Option<PathBuf> {
	let p = env::current_dir();
	let mut c = match p {
		Ok(c) => c,
		Err(_) => return None,
	};
	c.push(path);
	if c.exists() {
		return Some(c);
	}
	None
}

/// Handles setup and detection of paths for the node: use the config in
/// the current directory if there is one, fall back to the per-chain
/// home directory, writing a default configuration there if none
/// exists yet.
pub fn initial_setup_server(chain_type: ChainTypes) -> Result<GlobalConfig, ConfigError> {
	if let Some(p) = check_config_current_dir(SERVER_CONFIG_FILE_NAME) {
		return GlobalConfig::new(p);
	}

	let kestrel_path = get_kestrel_path(chain_type)?;
	let mut config_path = kestrel_path.clone();
	config_path.push(SERVER_CONFIG_FILE_NAME);
	if config_path.exists() {
		return GlobalConfig::new(config_path);
	}

	// none found: build a default rooted in the data dir and persist it
	let mut default_config = GlobalConfig::for_chain(chain_type);
	{
		let members = default_config.members.as_mut().unwrap();
		let mut db_root = kestrel_path;
		db_root.push("chain_data");
		members.server.db_root = db_root.to_str().unwrap_or(".kestrel").to_owned();
	}
	default_config.config_file_path = Some(config_path.clone());
	default_config.write_to_file(config_path.to_str().unwrap_or(SERVER_CONFIG_FILE_NAME))?;
	Ok(default_config)
}

impl GlobalConfig {
	/// Default configuration for the given chain type.
	pub fn for_chain(chain_type: ChainTypes) -> GlobalConfig {
		let mut config = GlobalConfig::default();
		if let Some(members) = config.members.as_mut() {
			members.server.chain_type = chain_type;
		}
		config
	}

	/// Requires the path to a config file.
	pub fn new(file_path: PathBuf) -> Result<GlobalConfig, ConfigError> {
		let return_value = GlobalConfig {
			config_file_path: Some(file_path),
			members: None,
		};

		// Config file path is given but not valid
		let config_file = return_value.config_file_path.clone().unwrap();
		if !config_file.exists() {
			return Err(ConfigError::FileNotFoundError(String::from(
				config_file.to_str().unwrap_or(""),
			)));
		}

		// Try to parse the config file if it exists, explode if it does exist but
		// something's wrong with it
		return_value.read_config()
	}

	/// Read the config file and parse it.
	fn read_config(mut self) -> Result<GlobalConfig, ConfigError> {
		let config_file_path = self.config_file_path.clone().unwrap();
		let mut file = File::open(&config_file_path)?;
		let mut contents = String::new();
		file.read_to_string(&mut contents)?;
		let decoded: Result<ConfigMembers, toml::de::Error> = toml::from_str(&contents);
		match decoded {
			Ok(members) => {
				self.members = Some(members);
				Ok(self)
			}
			Err(e) => Err(ConfigError::ParseError(
				String::from(config_file_path.to_str().unwrap_or("")),
				format!("{}", e),
			)),
		}
	}

	/// Serialize the current configuration.
	pub fn ser_config(&self) -> Result<String, ConfigError> {
		let members = self
			.members
			.as_ref()
			.expect("configuration was not initialized");
		toml::to_string(members).map_err(|e| ConfigError::SerializationError(format!("{}", e)))
	}

	/// Write the configuration to the given file.
	pub fn write_to_file(&self, name: &str) -> Result<(), ConfigError> {
		let conf_out = self.ser_config()?;
		let mut file = File::create(name)?;
		file.write_all(conf_out.as_bytes())?;
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn default_config_roundtrips_through_toml() {
		let config = GlobalConfig::for_chain(ChainTypes::AutomatedTesting);
		let serialized = config.ser_config().unwrap();
		let decoded: ConfigMembers = toml::from_str(&serialized).unwrap();
		assert_eq!(decoded, *config.members.as_ref().unwrap());
		assert_eq!(decoded.server.chain_type, ChainTypes::AutomatedTesting);
	}
}
