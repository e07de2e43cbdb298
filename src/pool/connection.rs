use std::fmt::{self, Debug, Formatter};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::queue::Less;
use super::shared::SharedPool;
use crate::error::Result;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A physical connection plus the metadata the pool keeps about it.
///
/// A slot connection is shared by every logical borrow routed to that slot; a
/// transient one belongs to its single borrower until release.
pub(crate) struct Conn<C> {
    raw: C,
    id: u64,
    created_at: Instant,
    transient: AtomicBool,
    // guarded separately from the pool's structural lock
    usable: Mutex<bool>,
    closed: AtomicBool,
    borrows: AtomicUsize,
}

impl<C> Conn<C> {
    pub(crate) fn new(raw: C, transient: bool) -> Self {
        Self {
            raw,
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            created_at: Instant::now(),
            transient: AtomicBool::new(transient),
            usable: Mutex::new(true),
            closed: AtomicBool::new(false),
            borrows: AtomicUsize::new(0),
        }
    }

    pub(crate) fn raw(&self) -> &C {
        &self.raw
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn created_at(&self) -> Instant {
        self.created_at
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn is_transient(&self) -> bool {
        self.transient.load(Ordering::Acquire)
    }

    /// Turns a transient connection into a regular slot connection.
    pub(crate) fn adopt(&self) {
        self.transient.store(false, Ordering::Release);
    }

    pub(crate) fn is_usable(&self) -> bool {
        *self.usable.lock()
    }

    pub(crate) fn mark_unusable(&self) {
        *self.usable.lock() = false;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flips the closed flag; returns `true` for the caller that must run the
    /// close callback.
    pub(crate) fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn borrows(&self) -> usize {
        self.borrows.load(Ordering::Acquire)
    }

    pub(crate) fn borrow(&self) {
        self.borrows.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unborrow(&self) {
        let released = self
            .borrows
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if released.is_err() {
            tracing::error!(id = self.id, "connection released more often than borrowed");
        }
    }
}

/// Least-loaded first, then oldest first.
impl<C> Less for Conn<C> {
    fn less(&self, other: &Self) -> bool {
        let (a, b) = (self.borrows(), other.borrows());
        if a != b {
            return a < b;
        }
        self.created_at < other.created_at
    }
}

impl<C> Debug for Conn<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.id)
            .field("age", &self.age())
            .field("transient", &self.is_transient())
            .field("usable", &self.is_usable())
            .field("closed", &self.is_closed())
            .field("borrows", &self.borrows())
            .finish()
    }
}

/// A connection borrowed from a [`Pool`](super::Pool).
///
/// Dereferences to the raw transport handle. Call [`close`](Self::close) to
/// hand it back; dropping it has the same effect but discards any error.
pub struct PoolConnection<C: Send + Sync + 'static> {
    conn: Option<Arc<Conn<C>>>,
    pool: Arc<SharedPool<C>>,
}

impl<C: Send + Sync + 'static> PoolConnection<C> {
    // `conn` must already be counted as borrowed
    pub(crate) fn new(conn: Arc<Conn<C>>, pool: Arc<SharedPool<C>>) -> Self {
        Self { conn: Some(conn), pool }
    }

    fn inner(&self) -> &Arc<Conn<C>> {
        // only `close` and `drop` take the connection, and both consume `self`
        self.conn.as_ref().expect("BUG: connection already released")
    }

    /// The raw transport handle.
    pub fn value(&self) -> &C {
        self.inner().raw()
    }

    /// Releases this borrow back to the pool.
    ///
    /// This does not terminate the transport unless the connection is
    /// transient or has been marked unusable. An [`Error::is_fatal`] error
    /// means the pool's accounting is broken.
    ///
    /// [`Error::is_fatal`]: crate::Error::is_fatal
    pub fn close(mut self) -> Result<()> {
        match self.conn.take() {
            Some(conn) => self.pool.release(conn),
            None => Ok(()),
        }
    }

    /// Makes the pool close this connection on release instead of keeping it.
    ///
    /// Idempotent. Other borrowers sharing the same slot keep their handle
    /// until they release it.
    pub fn mark_unusable(&self) {
        self.inner().mark_unusable();
    }

    pub fn is_usable(&self) -> bool {
        self.inner().is_usable()
    }

    /// `true` if this connection was dialed outside the slot array because
    /// the pool was at capacity.
    pub fn is_transient(&self) -> bool {
        self.inner().is_transient()
    }

    pub fn created_at(&self) -> Instant {
        self.inner().created_at()
    }

    /// Process-unique id of the underlying physical connection.
    pub fn id(&self) -> u64 {
        self.inner().id()
    }

    /// Ranks two borrowed connections: fewer outstanding borrows first, then
    /// older first.
    pub fn less(&self, other: &Self) -> bool {
        self.inner().less(other.inner())
    }

    #[cfg(test)]
    pub(super) fn borrows(&self) -> usize {
        self.inner().borrows()
    }
}

impl<C: Send + Sync + 'static> Deref for PoolConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.value()
    }
}

impl<C: Send + Sync + 'static> Drop for PoolConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(error) = self.pool.release(conn) {
                tracing::error!(%error, "failed to release dropped connection");
            }
        }
    }
}

impl<C: Send + Sync + 'static> Debug for PoolConnection<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConnection").field("conn", &self.conn).finish()
    }
}
