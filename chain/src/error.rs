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

//! Error types for chain

use failure::{Backtrace, Context, Fail};
use std::fmt::{self, Display};
use std::io;

use kestrel_core::ser;
use kestrel_store as store;

/// A scored consensus or policy failure. The score drives peer
/// discipline in the layers above: 100 marks the block or transaction as
/// intrinsically bad, low scores mark transient contextual conditions.
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
#[fail(display = "verification failed: {} (score {})", reason, score)]
pub struct VerifyError {
	/// Short reject reason, stable across releases.
	pub reason: String,
	/// Ban score in [0, 100].
	pub score: u32,
}

impl VerifyError {
	/// A new scored verification failure.
	pub fn new(reason: &str, score: u32) -> VerifyError {
		VerifyError {
			reason: reason.to_owned(),
			score,
		}
	}
}

/// Error definition
#[derive(Debug, Fail)]
pub struct Error {
	inner: Context<ErrorKind>,
}

/// Chain error definitions
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
	/// The block doesn't fit anywhere in our chain
	#[fail(display = "Block is unfit: {}", _0)]
	Unfit(String),
	/// Special case of orphan blocks
	#[fail(display = "Orphan")]
	Orphan,
	/// Block already known and processed
	#[fail(display = "Duplicate block")]
	DuplicateBlock,
	/// The block contradicts a configured checkpoint
	#[fail(display = "Checkpoint mismatch at height {}", _0)]
	Checkpoint(u64),
	/// A consensus rule was broken, with a score for peer discipline
	#[fail(display = "Invalid block: {}", _0)]
	Verify(VerifyError),
	/// The operation was cancelled through the stop state
	#[fail(display = "Cancelled")]
	Cancelled,
	/// The operation ran past its deadline
	#[fail(display = "Timed out")]
	TimedOut,
	/// Internal issue when trying to save or load data from store
	#[fail(display = "Store Error: {}, {}", _1, _0)]
	StoreErr(store::Error, String),
	/// Error serializing or deserializing a type
	#[fail(display = "Serialization Error: {}", _0)]
	SerErr(ser::Error),
	/// Anything else
	#[fail(display = "Other Error: {}", _0)]
	Other(String),
}

impl Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let cause = match self.cause() {
			Some(c) => format!("{}", c),
			None => String::from("Unknown"),
		};
		let output = format!("{} \n Cause: {}", self.inner, cause);
		Display::fmt(&output, f)
	}
}

impl Error {
	/// get kind
	pub fn kind(&self) -> ErrorKind {
		self.inner.get_context().clone()
	}
	/// get cause
	pub fn cause(&self) -> Option<&dyn Fail> {
		self.inner.cause()
	}
	/// get backtrace
	pub fn backtrace(&self) -> Option<&Backtrace> {
		self.inner.backtrace()
	}

	/// The ban score carried by this error, zero when it carries none.
	pub fn score(&self) -> u32 {
		match self.kind() {
			ErrorKind::Verify(e) => e.score,
			_ => 0,
		}
	}

	/// Whether the error is due to a block that was intrinsically wrong,
	/// as opposed to conditions on our side or transient context.
	pub fn is_bad_data(&self) -> bool {
		match self.kind() {
			ErrorKind::Verify(e) => e.score >= 50,
			ErrorKind::Checkpoint(_) => true,
			_ => false,
		}
	}
}

impl From<ErrorKind> for Error {
	fn from(kind: ErrorKind) -> Error {
		Error {
			inner: Context::new(kind),
		}
	}
}

impl From<Context<ErrorKind>> for Error {
	fn from(inner: Context<ErrorKind>) -> Error {
		Error { inner }
	}
}

impl From<VerifyError> for Error {
	fn from(error: VerifyError) -> Error {
		Error {
			inner: Context::new(ErrorKind::Verify(error)),
		}
	}
}

impl From<store::Error> for Error {
	fn from(error: store::Error) -> Error {
		let ec = error.clone();
		Error {
			inner: error.context(ErrorKind::StoreErr(ec.clone(), format!("{}", ec))),
		}
	}
}

impl From<ser::Error> for Error {
	fn from(error: ser::Error) -> Error {
		Error {
			inner: Context::new(ErrorKind::SerErr(error)),
		}
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error {
			inner: Context::new(ErrorKind::Other(e.to_string())),
		}
	}
}
