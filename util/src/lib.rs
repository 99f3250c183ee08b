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

//! Logging, locking and various low-level utilities that factor Rust
//! patterns that are frequent within the kestrel codebase.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate serde_derive;

use std::sync::atomic::{AtomicBool, Ordering};

// Re-export so only has to be included once
pub use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Logging related
pub mod logger;
pub use crate::logger::{init_logger, init_test_logger};

pub mod types;
pub use crate::types::{LogLevel, LoggingConfig};

pub mod workers;
pub use crate::workers::Workers;

mod hex;
pub use crate::hex::*;

/// Encapsulation of a RwLock<Option<T>> for one-time initialization.
/// This implementation will purposefully fail hard if not used
/// properly, for example if not initialized before being first used
/// (borrowed).
pub struct OneTime<T> {
	inner: RwLock<Option<T>>,
}

impl<T> OneTime<T>
where
	T: Clone,
{
	/// Builds a new uninitialized OneTime.
	pub fn new() -> OneTime<T> {
		OneTime {
			inner: RwLock::new(None),
		}
	}

	/// Initializes the OneTime, should only be called once after construction.
	/// Will panic (via assert) if called more than once.
	pub fn init(&self, value: T) {
		let mut inner = self.inner.write();
		assert!(inner.is_none());
		*inner = Some(value);
	}

	/// Whether the OneTime has been initialized.
	pub fn is_init(&self) -> bool {
		self.inner.read().is_some()
	}

	/// Borrows the OneTime, should only be called after initialization.
	/// Will panic if called before initialization.
	pub fn borrow(&self) -> T {
		let inner = self.inner.read();
		inner
			.clone()
			.expect("Cannot borrow one_time before initialization.")
	}
}

/// Process-wide stop flag, shared by everything that needs to wind down
/// in an orderly fashion. Set once, checked at loop boundaries.
pub struct StopState {
	stopping: AtomicBool,
}

impl StopState {
	/// Create a new stop_state in the "running" state.
	pub fn new() -> StopState {
		StopState {
			stopping: AtomicBool::new(false),
		}
	}

	/// Check if we are stopping.
	pub fn is_stopped(&self) -> bool {
		self.stopping.load(Ordering::Relaxed)
	}

	/// Signal that we are stopping.
	pub fn stop(&self) {
		self.stopping.store(true, Ordering::Relaxed)
	}
}
