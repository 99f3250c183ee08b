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

//! JSON views of the core types returned by the API endpoints.

use kestrel_chain::ChainEntry;
use kestrel_core::core::block::Block;
use kestrel_core::core::coin::Coin;
use kestrel_core::core::hash::Hashed;
use kestrel_core::core::transaction::{OutPoint, Transaction};
use kestrel_core::core::Address;
use kestrel_core::ser;
use kestrel_util as util;

/// Node summary served on the info route.
#[derive(Serialize, Deserialize, Debug)]
pub struct StatusView {
	/// Node version string.
	pub version: String,
	/// Short network name.
	pub chain: String,
	/// Best height.
	pub height: u64,
	/// Best tip hash.
	pub tip: String,
	/// Transactions in the pool.
	pub pool_count: usize,
	/// Bytes held by the pool.
	pub pool_bytes: usize,
	/// Effective minimum relay rate.
	pub min_relay_rate: u64,
}

/// A block header with its contextual height.
#[derive(Serialize, Deserialize, Debug)]
pub struct BlockHeaderView {
	/// Block hash.
	pub hash: String,
	/// Version field.
	pub version: i32,
	/// Previous block hash.
	pub prev_hash: String,
	/// Merkle root over the txids.
	pub merkle_root: String,
	/// Claimed timestamp.
	pub timestamp: u32,
	/// Compact target.
	pub bits: u32,
	/// Proof-of-work nonce.
	pub nonce: u32,
	/// Height in the chain.
	pub height: u64,
}

impl BlockHeaderView {
	/// View of a stored entry.
	pub fn from_entry(entry: &ChainEntry) -> BlockHeaderView {
		BlockHeaderView {
			hash: entry.hash().to_string(),
			version: entry.header.version,
			prev_hash: entry.header.prev_hash.to_string(),
			merkle_root: entry.header.merkle_root.to_string(),
			timestamp: entry.header.timestamp,
			bits: entry.header.bits,
			nonce: entry.header.nonce,
			height: entry.height,
		}
	}
}

/// A block with its transaction ids.
#[derive(Serialize, Deserialize, Debug)]
pub struct BlockView {
	/// The header with context.
	pub header: BlockHeaderView,
	/// Ids of the contained transactions, coinbase first.
	pub txids: Vec<String>,
	/// Total block weight.
	pub weight: usize,
}

impl BlockView {
	/// View of a block and its entry.
	pub fn new(block: &Block, entry: &ChainEntry) -> BlockView {
		BlockView {
			header: BlockHeaderView::from_entry(entry),
			txids: block.txs.iter().map(|tx| tx.hash().to_string()).collect(),
			weight: block.weight(),
		}
	}
}

/// One transaction input.
#[derive(Serialize, Deserialize, Debug)]
pub struct InputView {
	/// The outpoint being spent.
	pub prevout: String,
	/// Sequence number.
	pub sequence: u32,
	/// Whether this is the coinbase null input.
	pub coinbase: bool,
}

/// One transaction output.
#[derive(Serialize, Deserialize, Debug)]
pub struct OutputView {
	/// Value in atomic units.
	pub value: u64,
	/// Standard address form of the locking script, where one exists.
	pub address: Option<String>,
	/// Raw locking script, hex.
	pub script: String,
}

/// A transaction with its confirmation context.
#[derive(Serialize, Deserialize, Debug)]
pub struct TxView {
	/// Transaction id.
	pub txid: String,
	/// Full serialization, hex.
	pub hex: String,
	/// Inputs.
	pub inputs: Vec<InputView>,
	/// Outputs.
	pub outputs: Vec<OutputView>,
	/// Confirming block, absent while unconfirmed.
	pub block_hash: Option<String>,
	/// Confirmation height, absent while unconfirmed.
	pub height: Option<u64>,
	/// Block or arrival timestamp.
	pub time: i64,
}

impl TxView {
	/// View of a transaction with optional confirmation context.
	pub fn new(
		tx: &Transaction,
		block_hash: Option<String>,
		height: Option<u64>,
		time: i64,
	) -> TxView {
		TxView {
			txid: tx.hash().to_string(),
			hex: util::to_hex(ser::ser_vec(tx).unwrap_or_default()),
			inputs: tx
				.inputs
				.iter()
				.map(|input| InputView {
					prevout: input.prevout.to_string(),
					sequence: input.sequence,
					coinbase: input.prevout.is_null(),
				})
				.collect(),
			outputs: tx
				.outputs
				.iter()
				.map(|output| OutputView {
					value: output.value,
					address: Address::from_script(&output.script_pubkey)
						.map(|a| a.to_string()),
					script: util::to_hex(output.script_pubkey.as_bytes().to_vec()),
				})
				.collect(),
			block_hash,
			height,
			time,
		}
	}
}

/// An unspent output.
#[derive(Serialize, Deserialize, Debug)]
pub struct UtxoView {
	/// Creating transaction.
	pub txid: String,
	/// Output index.
	pub vout: u32,
	/// Value in atomic units.
	pub value: u64,
	/// Address form of the locking script, where one exists.
	pub address: Option<String>,
	/// Height of the creating block (next height for pool outputs).
	pub height: u64,
	/// Whether a coinbase created it.
	pub coinbase: bool,
}

impl UtxoView {
	/// View of one coin.
	pub fn new(outpoint: &OutPoint, coin: &Coin) -> UtxoView {
		UtxoView {
			txid: outpoint.hash.to_string(),
			vout: outpoint.index,
			value: coin.value,
			address: Address::from_script(&coin.script_pubkey).map(|a| a.to_string()),
			height: coin.height,
			coinbase: coin.coinbase,
		}
	}
}

/// Pool snapshot.
#[derive(Serialize, Deserialize, Debug)]
pub struct MempoolView {
	/// Transactions in the pool.
	pub count: usize,
	/// Bytes held by the pool.
	pub bytes: usize,
	/// Pool txids, best rate first.
	pub txids: Vec<String>,
}

/// Fee estimate answer.
#[derive(Serialize, Deserialize, Debug)]
pub struct FeeView {
	/// Confirmation target in blocks.
	pub blocks: usize,
	/// Estimated rate, atomic units per kilo-vsize. Zero when no data.
	pub rate: u64,
}

/// Broadcast request body.
#[derive(Serialize, Deserialize, Debug)]
pub struct BroadcastRequest {
	/// Raw transaction, hex.
	pub tx: String,
}

/// Broadcast response body.
#[derive(Serialize, Deserialize, Debug)]
pub struct BroadcastResponse {
	/// Id of the admitted transaction.
	pub txid: String,
}

/// Chain reset request body.
#[derive(Serialize, Deserialize, Debug)]
pub struct ResetRequest {
	/// Height to roll back to.
	pub height: u64,
}
