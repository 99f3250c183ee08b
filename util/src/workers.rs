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

//! Process-wide worker pool for CPU-heavy jobs, primarily script
//! verification. Jobs are message-passed to a fixed set of threads and
//! results collected by the submitter. The pool has an explicit
//! lifecycle tied to the node's open/close.

use crate::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of worker threads consuming jobs off a shared
/// channel. Stopping the pool drops the channel, which winds the
/// threads down once the queue drains.
pub struct Workers {
	sender: Mutex<Option<mpsc::Sender<Job>>>,
	threads: Mutex<Vec<JoinHandle<()>>>,
	size: usize,
}

impl Workers {
	/// Create a pool of `size` threads (at least one). Threads are
	/// spawned immediately and block on the shared queue.
	pub fn new(size: usize) -> Workers {
		let size = if size == 0 { 1 } else { size };
		let (sender, receiver) = mpsc::channel::<Job>();
		let receiver = Arc::new(Mutex::new(receiver));

		let mut threads = Vec::with_capacity(size);
		for n in 0..size {
			let receiver = receiver.clone();
			let handle = thread::Builder::new()
				.name(format!("worker_{}", n))
				.spawn(move || loop {
					// holding the receiver lock only for the dequeue itself
					let job = {
						let rx = receiver.lock();
						rx.recv()
					};
					match job {
						Ok(job) => job(),
						Err(_) => break,
					}
				})
				.expect("failed to spawn worker thread");
			threads.push(handle);
		}

		Workers {
			sender: Mutex::new(Some(sender)),
			threads: Mutex::new(threads),
			size,
		}
	}

	/// Number of threads in the pool.
	pub fn size(&self) -> usize {
		self.size
	}

	/// Run a batch of jobs across the pool and collect every result.
	/// Blocks until all jobs have completed. Results are returned in
	/// completion order, not submission order.
	pub fn run_batch<T>(&self, jobs: Vec<Box<dyn FnOnce() -> T + Send + 'static>>) -> Vec<T>
	where
		T: Send + 'static,
	{
		let count = jobs.len();
		let (results_tx, results_rx) = mpsc::channel();
		{
			let sender = self.sender.lock();
			let sender = sender.as_ref().expect("worker pool already stopped");
			for job in jobs {
				let results_tx = results_tx.clone();
				sender
					.send(Box::new(move || {
						let _ = results_tx.send(job());
					}))
					.expect("worker pool hung up");
			}
		}
		drop(results_tx);

		let mut results = Vec::with_capacity(count);
		for _ in 0..count {
			if let Ok(res) = results_rx.recv() {
				results.push(res);
			}
		}
		results
	}

	/// Stop the pool, joining all threads. Queued jobs run to
	/// completion first. Safe to call more than once.
	pub fn stop(&self) {
		{
			let mut sender = self.sender.lock();
			sender.take();
		}
		let mut threads = self.threads.lock();
		for handle in threads.drain(..) {
			let _ = handle.join();
		}
	}
}

impl Drop for Workers {
	fn drop(&mut self) {
		self.stop();
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn batch_runs_all_jobs() {
		let workers = Workers::new(4);
		let jobs: Vec<Box<dyn FnOnce() -> u64 + Send>> =
			(0..100u64).map(|n| Box::new(move || n * 2) as Box<_>).collect();
		let mut results = workers.run_batch(jobs);
		results.sort();
		assert_eq!(results.len(), 100);
		assert_eq!(results[0], 0);
		assert_eq!(results[99], 198);
		workers.stop();
	}

	#[test]
	fn stop_is_idempotent() {
		let workers = Workers::new(2);
		workers.stop();
		workers.stop();
	}
}
