//! Object recycling for the worker hot path
//!
//! Best-effort free list of reusable objects on top of crossbeam-queue.
//! `acquire` never fails: an empty pool falls back to the factory.
//! `release` may drop the object when the free list is full, so the pool is
//! not a resource limiter and a released object is not guaranteed to return.

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Generic object pool backed by a bounded lock-free free list
///
/// # Type Parameters
/// - `T`: The type of object to pool. Must be Send for thread safety.
///
/// # Example
/// ```
/// use taskforge::infrastructure::pool::ObjectPool;
///
/// let pool = ObjectPool::new(8, || Vec::<u8>::with_capacity(1024));
///
/// let mut buf = pool.acquire();
/// buf.extend_from_slice(b"scratch");
///
/// // Reset before handing it back; the pool does not
/// buf.clear();
/// pool.release(buf);
/// ```
pub struct ObjectPool<T: Send> {
    free: ArrayQueue<T>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

/// Pool counters for diagnostics (cold path)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub discarded: u64,
    pub available: usize,
}

impl<T: Send> ObjectPool<T> {
    /// Create an empty pool retaining at most `capacity` released objects
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of idle objects kept for reuse
    /// * `factory` - Function to create new objects when the free list is empty
    pub fn new<F>(capacity: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            free: ArrayQueue::new(capacity.max(1)),
            factory: Box::new(factory),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Create a pool with `capacity` objects already built
    pub fn prefilled<F>(capacity: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let pool = Self::new(capacity, factory);
        for _ in 0..pool.free.capacity() {
            let obj = pool.create_new();
            if pool.free.push(obj).is_err() {
                break;
            }
        }
        pool
    }

    /// Take an idle object, or build a fresh one if none are available
    ///
    /// # Performance
    /// Lock-free pop; the factory runs only on an empty free list.
    #[inline]
    pub fn acquire(&self) -> T {
        match self.free.pop() {
            Some(obj) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                obj
            }
            None => self.create_new(),
        }
    }

    /// Hand an object back for reuse
    ///
    /// # Returns
    /// - `true` - Object was retained in the free list
    /// - `false` - Free list was full and the object was dropped
    #[inline]
    pub fn release(&self, obj: T) -> bool {
        match self.free.push(obj) {
            Ok(()) => true,
            Err(_dropped) => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Number of idle objects currently retained
    #[inline]
    pub fn len(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    /// Maximum number of idle objects the pool retains
    #[inline]
    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }

    fn create_new(&self) -> T {
        self.created.fetch_add(1, Ordering::Relaxed);
        (self.factory)()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            available: self.free.len(),
        }
    }
}

/// Reusable byte buffer lent to one worker at a time
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScratchBuffer {
    buf: Vec<u8>,
}

impl ScratchBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Empty the buffer while keeping its allocation
    #[inline]
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    #[inline]
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    #[inline]
    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }
}

/// Specialized pool for worker scratch buffers
pub type ScratchPool = ObjectPool<ScratchBuffer>;

impl ScratchPool {
    /// Create a pool whose fresh buffers reserve `buffer_size` bytes
    pub fn with_buffer_size(pool_capacity: usize, buffer_size: usize) -> Self {
        Self::new(pool_capacity, move || ScratchBuffer::with_capacity(buffer_size))
    }

    /// Acquire and reset in one step
    #[inline]
    pub fn acquire_cleared(&self) -> ScratchBuffer {
        let mut buf = self.acquire();
        buf.reset();
        buf
    }
}
