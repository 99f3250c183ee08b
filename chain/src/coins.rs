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

//! The in-memory unspent-output view layered over the chain store. A
//! view is scoped to one validation operation: it reads through to the
//! store, tracks spends with undo records, and is committed or dropped
//! as a whole.

use std::collections::HashMap;

use kestrel_core::core::transaction::{OutPoint, Transaction};
use kestrel_core::ser::{self, Readable, Reader, Writeable, Writer};

pub use kestrel_core::core::coin::Coin;

use crate::error::Error;
use crate::store::ChainStore;

/// One spent coin with its outpoint, the unit of the undo record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoCoin {
	/// The outpoint that was spent.
	pub outpoint: OutPoint,
	/// The coin as it existed before the spend.
	pub coin: Coin,
}

impl Writeable for UndoCoin {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.outpoint.write(writer)?;
		self.coin.write(writer)
	}
}

impl Readable for UndoCoin {
	fn read(reader: &mut dyn Reader) -> Result<UndoCoin, ser::Error> {
		let outpoint = OutPoint::read(reader)?;
		let coin = Coin::read(reader)?;
		Ok(UndoCoin { outpoint, coin })
	}
}

/// Everything needed to roll one connected block back out of the UTXO
/// set: the coins it spent, in spend order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoBlock {
	/// Spent coins in the order the block spent them.
	pub spent: Vec<UndoCoin>,
}

impl Writeable for UndoBlock {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_varint(self.spent.len() as u64)?;
		for undo in &self.spent {
			undo.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for UndoBlock {
	fn read(reader: &mut dyn Reader) -> Result<UndoBlock, ser::Error> {
		let count = reader.read_varint()?;
		if count > 1_000_000 {
			return Err(ser::Error::TooLargeReadErr(count));
		}
		let mut spent = Vec::with_capacity(count as usize);
		for _ in 0..count {
			spent.push(UndoCoin::read(reader)?);
		}
		Ok(UndoBlock { spent })
	}
}

#[derive(Debug, Clone)]
enum CoinEntry {
	Unspent(Coin),
	Spent,
}

/// An overlay over the authoritative UTXO set. Reads fall through to the
/// store and are cached; spends and additions stay in the overlay until
/// `commit` folds them into a store batch along with the undo record.
pub struct CoinView {
	map: HashMap<OutPoint, CoinEntry>,
	undo: Vec<UndoCoin>,
}

impl CoinView {
	/// A fresh, empty view.
	pub fn new() -> CoinView {
		CoinView {
			map: HashMap::new(),
			undo: vec![],
		}
	}

	/// Read a coin, through the overlay and falling back to the store.
	pub fn read(&mut self, store: &ChainStore, outpoint: &OutPoint) -> Result<Option<Coin>, Error> {
		if let Some(entry) = self.map.get(outpoint) {
			return Ok(match entry {
				CoinEntry::Unspent(coin) => Some(coin.clone()),
				CoinEntry::Spent => None,
			});
		}
		match store.get_coin(outpoint)? {
			Some(coin) => {
				self.map
					.insert(*outpoint, CoinEntry::Unspent(coin.clone()));
				Ok(Some(coin))
			}
			None => Ok(None),
		}
	}

	/// Spend a coin, recording it in the undo list. Returns the spent
	/// coin, or None if it was not unspent in this view.
	pub fn spend(
		&mut self,
		store: &ChainStore,
		outpoint: &OutPoint,
	) -> Result<Option<Coin>, Error> {
		let coin = match self.read(store, outpoint)? {
			Some(coin) => coin,
			None => return Ok(None),
		};
		self.map.insert(*outpoint, CoinEntry::Spent);
		self.undo.push(UndoCoin {
			outpoint: *outpoint,
			coin: coin.clone(),
		});
		Ok(Some(coin))
	}

	/// Add a freshly created coin to the view.
	pub fn add(&mut self, outpoint: OutPoint, coin: Coin) {
		self.map.insert(outpoint, CoinEntry::Unspent(coin));
	}

	/// Add every output of the given transaction to the view.
	pub fn add_tx(&mut self, tx: &Transaction, height: u64) {
		let hash = tx.hash();
		let coinbase = tx.is_coinbase();
		for (index, output) in tx.outputs.iter().enumerate() {
			if output.script_pubkey.is_op_return() {
				continue;
			}
			self.add(
				OutPoint::new(hash, index as u32),
				Coin {
					value: output.value,
					script_pubkey: output.script_pubkey.clone(),
					height,
					coinbase,
				},
			);
		}
	}

	/// The undo record accumulated by this view so far.
	pub fn undo(&self) -> &[UndoCoin] {
		&self.undo
	}

	/// Consume the view into its undo record.
	pub fn into_undo(self) -> UndoBlock {
		UndoBlock { spent: self.undo }
	}

	/// Whether the overlay holds the outpoint as spent.
	pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
		match self.map.get(outpoint) {
			Some(CoinEntry::Spent) => true,
			_ => false,
		}
	}

	/// Iterate the overlay entries: spent outpoints (with their undo
	/// coins already in `undo`) and added coins.
	pub fn entries(&self) -> impl Iterator<Item = (&OutPoint, Option<&Coin>)> {
		self.map.iter().map(|(outpoint, entry)| match entry {
			CoinEntry::Unspent(coin) => (outpoint, Some(coin)),
			CoinEntry::Spent => (outpoint, None),
		})
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use kestrel_core::core::hash::sha256d;
	use kestrel_core::core::script::Script;

	fn coin(value: u64) -> Coin {
		Coin {
			value,
			script_pubkey: Script::p2pkh(&[1u8; 20]),
			height: 5,
			coinbase: false,
		}
	}

	#[test]
	fn undo_roundtrip() {
		let undo = UndoBlock {
			spent: vec![
				UndoCoin {
					outpoint: OutPoint::new(sha256d(b"a"), 0),
					coin: coin(100),
				},
				UndoCoin {
					outpoint: OutPoint::new(sha256d(b"b"), 2),
					coin: coin(250),
				},
			],
		};
		let bytes = ser::ser_vec(&undo).unwrap();
		let decoded: UndoBlock = ser::deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(decoded, undo);
	}

	#[test]
	fn overlay_add_then_spend_needs_no_store() {
		// a view never touching the store: coins created and spent
		// within the overlay itself
		let mut view = CoinView::new();
		let outpoint = OutPoint::new(sha256d(b"tx"), 0);
		view.add(outpoint, coin(500));
		assert!(!view.is_spent(&outpoint));
	}
}
