//! Heap Memory Source
//!
//! Implements MemorySource with a counting global allocator. Binaries opt in
//! with `#[global_allocator]`; without it the source falls back to the
//! resident set size reported by `sysinfo`.

use crate::domain::ports::MemorySource;
use parking_lot::Mutex;
use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};
use sysinfo::Pid;

static ALLOCATED: AtomicUsize = AtomicUsize::new(0);

/// System allocator wrapper that tracks live heap bytes.
///
/// Only `alloc` and `dealloc` are overridden; the default `alloc_zeroed` and
/// `realloc` go through them, so every byte is counted once.
pub struct TrackingAllocator;

impl TrackingAllocator {
    /// Bytes currently allocated through this allocator.
    pub fn allocated_bytes() -> usize {
        ALLOCATED.load(Ordering::Relaxed)
    }

    /// Whether any allocation went through the tracker, i.e. it is installed.
    pub fn is_installed() -> bool {
        Self::allocated_bytes() > 0
    }
}

// SAFETY: both methods forward to `System` with the caller's arguments
// unchanged, so `System`'s guarantees carry over. The counter is a plain
// atomic and never allocates.
unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            ALLOCATED.fetch_add(layout.size(), Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        ALLOCATED.fetch_sub(layout.size(), Ordering::Relaxed);
    }
}

/// Live heap reading for the working-set gauge.
pub struct HeapMemorySource {
    pid: Pid,
    system: Mutex<sysinfo::System>,
}

impl Default for HeapMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapMemorySource {
    pub fn new() -> Self {
        Self {
            pid: Pid::from_u32(std::process::id()),
            system: Mutex::new(sysinfo::System::new()),
        }
    }

    /// Resident set size of this process in bytes.
    pub fn resident_set_bytes(&self) -> anyhow::Result<u64> {
        let mut system = self.system.lock();
        if !system.refresh_process(self.pid) {
            anyhow::bail!("process {} not found", self.pid);
        }
        system
            .process(self.pid)
            .map(|process| process.memory())
            .ok_or_else(|| anyhow::anyhow!("no memory reading for process {}", self.pid))
    }
}

impl MemorySource for HeapMemorySource {
    fn allocated_bytes(&self) -> anyhow::Result<u64> {
        if TrackingAllocator::is_installed() {
            return Ok(TrackingAllocator::allocated_bytes() as u64);
        }
        self.resident_set_bytes()
    }
}
