//! The connection pool.
//!
//! A [`Pool`] owns `max_active` slots. Slots `[0, current)` hold live physical
//! connections and each of them carries up to `max_concurrent_streams`
//! logical borrows. [`Pool::get`] tries, in order:
//!
//! 1. an existing slot, when the outstanding borrows fit the current capacity
//!    (takes only the read side of the slot lock);
//! 2. growing the pool by doubling `current`, capped at `max_active`;
//! 3. oversubscribing an existing slot, if [`PoolOptions::wait`] is set;
//! 4. dialing a transient connection outside the slots.
//!
//! Slots are always picked round-robin. When the last borrow is released, the
//! pool shrinks back to `max_idle` connections.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use serde::Serialize;

use self::shared::SharedPool;
use crate::error::Result;

mod config;
mod connection;
mod options;
mod queue;
mod shared;


pub use self::config::PoolConfig;
pub use self::connection::PoolConnection;
pub use self::options::PoolOptions;
pub use self::queue::{Less, PriorityQueue};

/// A pool of physical connections to a single address.
///
/// Cloning is cheap; every clone refers to the same pool.
pub struct Pool<C: Send + Sync + 'static> {
    shared: Arc<SharedPool<C>>,
}

impl<C: Send + Sync + 'static> Pool<C> {
    /// Validates `options` and dials `max_idle` connections to `address`.
    ///
    /// If any of those dials fails, the connections already opened are closed
    /// and the dial error is returned as [`Error::Warmup`](crate::Error::Warmup).
    pub fn new(address: &str, options: PoolOptions<C>) -> Result<Self> {
        Ok(Self { shared: SharedPool::new(address, options)? })
    }

    /// Borrows a connection.
    ///
    /// Never waits for another borrower. Fails with
    /// [`Error::PoolClosed`](crate::Error::PoolClosed) after [`close`](Self::close),
    /// or with [`Error::Dial`](crate::Error::Dial) if growing the pool or opening
    /// a transient connection failed; a failed call leaves no reservation behind.
    pub fn get(&self) -> Result<PoolConnection<C>> {
        self.shared.acquire()
    }

    /// Closes every pooled connection. Later calls to [`get`](Self::get) fail.
    ///
    /// Borrowed connections stay usable by their holders; releasing them
    /// afterwards only closes transient ones. Returns the first error reported
    /// by the `close` callback, after attempting to close everything.
    pub fn close(&self) -> Result<()> {
        self.shared.close()
    }

    /// `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Runs one maintenance pass.
    ///
    /// Shrinks to `max_idle` if nothing is borrowed, evicts idle slot
    /// connections that fail `ping`, replaces idle ones older than
    /// `idle_timeout` (oldest first), and refills up to `max_idle`. Stops at
    /// the first failed dial and returns it.
    pub fn reap(&self) -> Result<ReapStats> {
        self.shared.reap()
    }

    /// A point-in-time snapshot, for diagnostics.
    pub fn status(&self) -> PoolStatus {
        self.shared.status()
    }

    /// The options this pool was built with.
    pub fn options(&self) -> &PoolOptions<C> {
        self.shared.options()
    }
}

impl<C: Send + Sync + 'static> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<C: Send + Sync + 'static> Display for Pool<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let status = self.status();
        write!(
            f,
            "address:{}, index:{}, current:{}, ref:{}. option:{:?}",
            status.address,
            status.index,
            status.current,
            status.refs,
            self.options()
        )
    }
}

impl<C: Send + Sync + 'static> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("status", &self.status())
            .field("options", self.options())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub address: String,
    /// Round-robin cursor
    pub index: u32,
    /// Live physical connections in slots
    pub current: u32,
    /// Outstanding logical borrows
    pub refs: i32,
    /// Length of the slot array (`max_active`)
    pub slots: usize,
    /// Non-empty slots
    pub populated: usize,
    /// Transient connections parked for reuse
    pub spares: usize,
    pub closed: bool,
}

/// What a [`Pool::reap`] pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReapStats {
    /// Connections closed by shrinking to `max_idle` (including spares)
    pub shrunk: usize,
    /// Idle connections removed after a failed ping
    pub evicted: usize,
    /// Idle connections past `idle_timeout` swapped for a fresh dial
    pub replaced: usize,
    /// Connections dialed to get back up to `max_idle`
    pub refilled: usize,
}
