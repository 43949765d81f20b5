//! Monotonic id allocation.
//!
//! `CapturedEntry::id` must increase strictly across the lifetime of the
//! process (spec invariant: "E.id strictly increases"). The store owns
//! one [`EntryIdAllocator`] and hands out ids under its single-writer
//! lock, so a plain [`std::sync::atomic::AtomicU64`] is enough — no
//! persistence is required because the allocator is reseeded from the
//! highest id found in the state file on load.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct EntryIdAllocator {
	next: AtomicU64,
}

impl EntryIdAllocator {
	pub fn new(start_after: u64) -> Self {
		Self {
			next: AtomicU64::new(start_after + 1),
		}
	}

	/// Allocates the next strictly-increasing id.
	pub fn next(&self) -> u64 {
		self.next.fetch_add(1, Ordering::SeqCst)
	}

	/// Reseeds the allocator so subsequent ids are greater than `seen`.
	/// Used while replaying the state file: each `entry` line bumps the
	/// floor so ids never collide with what was already on disk.
	pub fn observe(&self, seen: u64) {
		self.next.fetch_max(seen + 1, Ordering::SeqCst);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn strictly_increasing() {
		let alloc = EntryIdAllocator::new(0);
		let a = alloc.next();
		let b = alloc.next();
		assert!(b > a);
	}

	#[test]
	fn observe_raises_floor() {
		let alloc = EntryIdAllocator::new(0);
		alloc.observe(41);
		assert_eq!(alloc.next(), 42);
	}
}
