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

//! A materialized unspent transaction output, carrying the context a
//! spender needs to validate against it.

use crate::core::script::Script;
use crate::ser::{self, Readable, Reader, Writeable, Writer};

/// A materialized unspent output with the context needed to validate a
/// spend of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
	/// Value in atomic units.
	pub value: u64,
	/// The locking script.
	pub script_pubkey: Script,
	/// Height of the block that created the output.
	pub height: u64,
	/// Whether the output was created by a coinbase.
	pub coinbase: bool,
}

impl Writeable for Coin {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.value)?;
		self.script_pubkey.write(writer)?;
		writer.write_u64(self.height)?;
		writer.write_u8(self.coinbase as u8)
	}
}

impl Readable for Coin {
	fn read(reader: &mut dyn Reader) -> Result<Coin, ser::Error> {
		let value = reader.read_u64()?;
		let script_pubkey = Script::read(reader)?;
		let height = reader.read_u64()?;
		let coinbase = reader.read_u8()? != 0;
		Ok(Coin {
			value,
			script_pubkey,
			height,
			coinbase,
		})
	}
}
