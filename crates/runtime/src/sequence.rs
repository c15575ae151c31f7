//! Per-action ordering.
//!
//! A port delivers in FIFO order, but once a relay sits between the two sides
//! that guarantee is gone. Senders therefore stamp every envelope with a
//! per-action sequence number and receivers run it through a
//! [`ReorderBuffer`] that releases messages strictly in order.
//!
//! Messages without a sequence number bypass reordering entirely.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use thiserror::Error;

/// Default number of out-of-order messages buffered per action.
pub const DEFAULT_REORDER_CAPACITY: usize = 256;

/// Reasons a sequenced message is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReorderError {
	/// The sequence number was already delivered or is already buffered.
	#[error("duplicate sequence number {seq} (next expected {expected})")]
	Duplicate { seq: u64, expected: u64 },
	/// Too many messages are waiting for a gap to be filled.
	#[error("reorder buffer full ({capacity} pending) waiting for {expected}")]
	Overflow { capacity: usize, expected: u64 },
}

/// Hands out monotonically increasing sequence numbers for one action.
#[derive(Debug, Default, Clone)]
pub struct SequenceCounter {
	next: u64,
}

impl SequenceCounter {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the next number and advances.
	pub fn next(&mut self) -> u64 {
		let seq = self.next;
		self.next += 1;
		seq
	}
}

/// Buffers out-of-order messages for one action and releases in-order runs.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
	next_seq: u64,
	pending: BTreeMap<u64, T>,
	capacity: usize,
}

impl<T> ReorderBuffer<T> {
	pub fn new(capacity: usize) -> Self {
		Self {
			next_seq: 0,
			pending: BTreeMap::new(),
			capacity,
		}
	}

	/// Accepts `item` tagged `seq` and returns everything now deliverable, in order.
	pub fn push(&mut self, seq: u64, item: T) -> Result<Vec<T>, ReorderError> {
		if seq < self.next_seq || self.pending.contains_key(&seq) {
			return Err(ReorderError::Duplicate {
				seq,
				expected: self.next_seq,
			});
		}

		if seq != self.next_seq {
			if self.pending.len() >= self.capacity {
				return Err(ReorderError::Overflow {
					capacity: self.capacity,
					expected: self.next_seq,
				});
			}
			self.pending.insert(seq, item);
			return Ok(Vec::new());
		}

		let mut ready = vec![item];
		self.next_seq += 1;
		while let Some(next) = self.pending.remove(&self.next_seq) {
			ready.push(next);
			self.next_seq += 1;
		}
		Ok(ready)
	}

	pub fn next_expected(&self) -> u64 {
		self.next_seq
	}

	/// Number of messages waiting for a gap to close.
	pub fn pending(&self) -> usize {
		self.pending.len()
	}
}

/// Reorder buffers for many actions, keyed by whatever identifies an action.
#[derive(Debug)]
pub struct ReorderTable<K, T> {
	buffers: HashMap<K, ReorderBuffer<T>>,
	capacity: usize,
}

impl<K: Eq + Hash + Clone, T> ReorderTable<K, T> {
	pub fn new(capacity: usize) -> Self {
		Self {
			buffers: HashMap::new(),
			capacity,
		}
	}

	/// Runs `item` through the buffer for `key`.
	///
	/// Unsequenced items (`seq == None`) are returned immediately.
	pub fn accept(&mut self, key: &K, seq: Option<u64>, item: T) -> Result<Vec<T>, ReorderError> {
		match seq {
			None => Ok(vec![item]),
			Some(seq) => {
				let capacity = self.capacity;
				self.buffers
					.entry(key.clone())
					.or_insert_with(|| ReorderBuffer::new(capacity))
					.push(seq, item)
			}
		}
	}

	/// Forgets the buffer for `key`, returning how many messages were still waiting.
	pub fn remove(&mut self, key: &K) -> usize {
		self.buffers.remove(key).map(|b| b.pending()).unwrap_or(0)
	}

	pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
		self.buffers.retain(|key, _| keep(key));
	}

	pub fn len(&self) -> usize {
		self.buffers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.buffers.is_empty()
	}
}
