use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex, RwLock};

use super::connection::{Conn, PoolConnection};
use super::options::PoolOptions;
use super::queue::PriorityQueue;
use super::{PoolStatus, ReapStats};
use crate::error::{Error, Result};

type Slots<C> = [Option<Arc<Conn<C>>>];

pub(crate) struct SharedPool<C> {
    address: String,
    options: PoolOptions<C>,

    // round-robin cursor, taken modulo `current`
    index: AtomicU32,
    // populated slots; only written under the `slots` write lock
    current: AtomicU32,
    // outstanding logical borrows
    refs: AtomicI32,
    closed: AtomicBool,

    // fixed length `max_active`; [0, current) populated, the rest empty
    slots: RwLock<Box<Slots<C>>>,
    // released transient connections kept for the next overflow (`reuse`)
    spares: ArrayQueue<Arc<Conn<C>>>,
    reaper: Arc<ReaperSignal>,
}

impl<C: Send + Sync + 'static> SharedPool<C> {
    pub(super) fn new(address: &str, options: PoolOptions<C>) -> Result<Arc<Self>> {
        validate(address, &options)?;

        let max_active = options.max_active as usize;
        let reap_interval = options.reap_interval;

        let pool = Self {
            address: address.to_owned(),
            index: AtomicU32::new(0),
            current: AtomicU32::new(0),
            refs: AtomicI32::new(0),
            closed: AtomicBool::new(false),
            slots: RwLock::new((0..max_active).map(|_| None).collect()),
            spares: ArrayQueue::new(max_active),
            reaper: Arc::new(ReaperSignal::default()),
            options,
        };

        pool.init_idle_connections()?;

        let pool = Arc::new(pool);
        if let Some(period) = reap_interval {
            spawn_reaper(&pool, period);
        }

        Ok(pool)
    }

    fn init_idle_connections(&self) -> Result<()> {
        let max_idle = self.options.max_idle;
        let mut slots = self.slots.write();

        for i in 0..max_idle as usize {
            match self.dial(false) {
                Ok(conn) => slots[i] = Some(conn),
                Err(error) => {
                    for conn in slots.iter_mut().filter_map(Option::take) {
                        self.discard(&conn);
                    }
                    let error = match error {
                        Error::Dial(source) => Error::Warmup(source),
                        other => other,
                    };
                    tracing::warn!(address = %self.address, %error, "failed to fill the idle floor");
                    return Err(error);
                }
            }
        }

        self.current.store(max_idle, Ordering::Release);
        tracing::info!(address = %self.address, max_idle, "pool ready");
        Ok(())
    }

    pub(super) fn acquire(self: &Arc<Self>) -> Result<PoolConnection<C>> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let reservation = self.incr_ref()?;

        match self.place(reservation) {
            Ok(conn) => {
                tracing::trace!(
                    id = conn.id(),
                    reservation,
                    transient = conn.is_transient(),
                    "borrowed connection"
                );
                Ok(PoolConnection::new(conn, Arc::clone(self)))
            }
            Err(error) => {
                // a failed borrow gives its reservation back
                self.decr_ref()?;
                Err(error)
            }
        }
    }

    /// Finds a connection for the borrow holding `reservation`: spare slot
    /// capacity, then growth, then oversubscription, then a transient dial.
    fn place(&self, reservation: i32) -> Result<Arc<Conn<C>>> {
        {
            let slots = self.slots.read();
            let current = self.current.load(Ordering::Acquire);
            if let Some(conn) = self.within_capacity(&slots, current, reservation) {
                return Ok(conn);
            }

            // nothing to grow into; the write lock is only for growth
            if current >= self.options.max_active {
                if self.options.wait {
                    if let Some(conn) = self.next(&slots, current) {
                        return Ok(conn);
                    }
                }
                drop(slots);
                return self.overflow();
            }
        }

        {
            let mut slots = self.slots.write();
            if self.is_closed() {
                return Err(Error::PoolClosed);
            }

            // another borrower may have grown the pool while we waited
            let current = self.current.load(Ordering::Acquire);
            if let Some(conn) = self.within_capacity(&slots, current, reservation) {
                return Ok(conn);
            }

            if current < self.options.max_active {
                let grown = self.grow(&mut slots, current)?;
                if let Some(conn) = self.next(&slots, grown) {
                    return Ok(conn);
                }
            }

            if self.options.wait {
                if let Some(conn) = self.next(&slots, current) {
                    return Ok(conn);
                }
            }
        }

        self.overflow()
    }

    fn within_capacity(
        &self,
        slots: &Slots<C>,
        current: u32,
        reservation: i32,
    ) -> Option<Arc<Conn<C>>> {
        let limit = u64::from(current) * u64::from(self.options.max_concurrent_streams);
        match u64::try_from(reservation) {
            Ok(n) if n < limit => self.next(slots, current),
            _ => None,
        }
    }

    /// Round-robin over the first `current` slots. Marks the pick as borrowed
    /// while the caller still holds the slot lock.
    fn next(&self, slots: &Slots<C>, current: u32) -> Option<Arc<Conn<C>>> {
        if current == 0 {
            return None;
        }
        let i = self.index.fetch_add(1, Ordering::AcqRel) % current;
        let conn = slots[i as usize].clone()?;
        conn.borrow();
        Some(conn)
    }

    /// Doubles the populated slots (at least one, at most `max_active`).
    ///
    /// Connections are dialed before being published; on failure the ones
    /// opened in this step are closed and `current` is left alone.
    fn grow(&self, slots: &mut Slots<C>, current: u32) -> Result<u32> {
        let target = current
            .saturating_add(current.max(1))
            .min(self.options.max_active);

        let mut dialed = Vec::with_capacity((target - current) as usize);
        for _ in current..target {
            match self.dial(false) {
                Ok(conn) => dialed.push(conn),
                Err(error) => {
                    for conn in &dialed {
                        self.discard(conn);
                    }
                    tracing::debug!(address = %self.address, current, %error, "growth aborted");
                    return Err(error);
                }
            }
        }

        for (slot, conn) in slots[current as usize..target as usize].iter_mut().zip(dialed) {
            *slot = Some(conn);
        }
        self.current.store(target, Ordering::Release);

        tracing::debug!(address = %self.address, from = current, to = target, "pool grew");
        Ok(target)
    }

    fn overflow(&self) -> Result<Arc<Conn<C>>> {
        if self.options.reuse {
            while let Some(conn) = self.spares.pop() {
                if conn.is_usable() && !conn.is_closed() {
                    conn.borrow();
                    return Ok(conn);
                }
                self.discard(&conn);
            }
        }

        let conn = self.dial(true)?;
        conn.borrow();
        tracing::debug!(address = %self.address, id = conn.id(), "dialed transient connection");
        Ok(conn)
    }

    pub(super) fn release(&self, conn: Arc<Conn<C>>) -> Result<()> {
        conn.unborrow();

        if self.is_closed() {
            // slots were already closed with the pool; nothing left to account
            return if conn.is_transient() { self.close_conn(&conn) } else { Ok(()) };
        }

        let disposed = if conn.is_transient() {
            self.recycle(conn)
        } else if !conn.is_usable() {
            self.evict(&conn)
        } else {
            Ok(())
        };

        self.decr_ref()?;
        disposed
    }

    /// Handles a released transient connection: closed, unless `reuse` lets
    /// it take a free slot or wait in the spare queue.
    fn recycle(&self, conn: Arc<Conn<C>>) -> Result<()> {
        if !self.options.reuse || !conn.is_usable() {
            return self.close_conn(&conn);
        }

        {
            let mut slots = self.slots.write();
            let current = self.current.load(Ordering::Acquire);
            if !self.is_closed() && current < self.options.max_active {
                conn.adopt();
                tracing::debug!(
                    address = %self.address,
                    id = conn.id(),
                    slot = current,
                    "transient connection joined the pool"
                );
                slots[current as usize] = Some(conn);
                self.current.store(current + 1, Ordering::Release);
                return Ok(());
            }
        }

        match self.spares.push(conn) {
            Ok(()) => Ok(()),
            Err(conn) => self.close_conn(&conn),
        }
    }

    /// Takes an unusable slot connection out of the rotation and closes it.
    fn evict(&self, conn: &Arc<Conn<C>>) -> Result<()> {
        let removed = {
            let mut slots = self.slots.write();
            self.remove_slot(&mut slots, conn)
        };

        if removed {
            tracing::debug!(address = %self.address, id = conn.id(), "evicted unusable connection");
        }
        self.close_conn(conn)
    }

    // swap-remove keeps [0, current) dense
    fn remove_slot(&self, slots: &mut Slots<C>, conn: &Arc<Conn<C>>) -> bool {
        let current = self.current.load(Ordering::Acquire) as usize;
        let pos = slots[..current]
            .iter()
            .position(|slot| slot.as_ref().map_or(false, |c| Arc::ptr_eq(c, conn)));

        match pos {
            Some(pos) => {
                slots.swap(pos, current - 1);
                slots[current - 1] = None;
                self.current.store((current - 1) as u32, Ordering::Release);
                true
            }
            None => false,
        }
    }

    fn incr_ref(&self) -> Result<i32> {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| refs.checked_add(1))
            .map_err(|refs| {
                tracing::error!(address = %self.address, refs, "reservation counter overflow");
                Error::RefOverflow(refs)
            })
    }

    fn decr_ref(&self) -> Result<()> {
        let previous = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| {
                if refs > 0 {
                    Some(refs - 1)
                } else {
                    None
                }
            })
            .or_else(|refs| {
                // `close` zeroed the counter under a borrow that was still out
                if self.is_closed() {
                    return Ok(0);
                }
                tracing::error!(address = %self.address, refs, "release without a matching borrow");
                Err(Error::NegativeRef)
            })?;

        if previous == 1 {
            let max_idle = self.options.max_idle;
            if self.current.load(Ordering::Acquire) > max_idle || !self.spares.is_empty() {
                self.shrink();
            }
            if self.current.load(Ordering::Acquire) < max_idle {
                if let Err(error) = self.refill() {
                    tracing::warn!(address = %self.address, %error, "failed to refill the idle floor");
                }
            }
        }
        Ok(())
    }

    /// Dials back up to `max_idle` after evictions. Each connection is dialed
    /// without the slot lock and only published if the pool still needs it.
    fn refill(&self) -> Result<usize> {
        let mut added = 0;
        loop {
            if self.is_closed() || self.current.load(Ordering::Acquire) >= self.options.max_idle {
                return Ok(added);
            }

            let conn = self.dial(false)?;

            let mut slots = self.slots.write();
            let current = self.current.load(Ordering::Acquire);
            if self.is_closed() || current >= self.options.max_idle {
                drop(slots);
                self.discard(&conn);
                return Ok(added);
            }
            slots[current as usize] = Some(conn);
            self.current.store(current + 1, Ordering::Release);
            added += 1;
        }
    }

    /// Returns the pool to `max_idle` connections if nothing is borrowed.
    /// Returns the number of connections closed.
    fn shrink(&self) -> usize {
        let mut evicted = Vec::new();

        {
            let mut slots = self.slots.write();
            if self.refs.load(Ordering::Acquire) != 0 || self.is_closed() {
                return 0;
            }

            let max_idle = self.options.max_idle;
            let current = self.current.load(Ordering::Acquire);
            if current > max_idle {
                self.current.store(max_idle, Ordering::Release);
                evicted.extend(
                    slots[max_idle as usize..current as usize]
                        .iter_mut()
                        .filter_map(Option::take),
                );
                tracing::debug!(address = %self.address, from = current, to = max_idle, "pool shrank");
            }
        }

        while let Some(conn) = self.spares.pop() {
            evicted.push(conn);
        }

        for conn in &evicted {
            self.discard(conn);
        }
        evicted.len()
    }

    pub(super) fn reap(&self) -> Result<ReapStats> {
        let mut stats = ReapStats::default();
        if self.is_closed() {
            return Ok(stats);
        }

        if self.refs.load(Ordering::Acquire) == 0 {
            stats.shrunk = self.shrink();
        }

        let mut closing = Vec::new();
        let result = self.reap_slots(&mut stats, &mut closing);

        for conn in &closing {
            self.discard(conn);
        }

        tracing::debug!(address = %self.address, ?stats, "reaped");
        result.map(|()| stats)
    }

    /// Pings and dials with no lock held; the write lock is taken per slot
    /// change, after checking the slot still holds the same idle connection.
    fn reap_slots(&self, stats: &mut ReapStats, closing: &mut Vec<Arc<Conn<C>>>) -> Result<()> {
        let idle: Vec<_> = {
            let slots = self.slots.read();
            let current = self.current.load(Ordering::Acquire) as usize;
            // borrowed connections are left to their borrowers
            slots[..current]
                .iter()
                .flatten()
                .filter(|conn| conn.borrows() == 0)
                .cloned()
                .collect()
        };

        let mut expired = PriorityQueue::with_capacity(idle.len());
        for conn in idle {
            if !self.is_alive(&conn) {
                let removed = {
                    let mut slots = self.slots.write();
                    conn.borrows() == 0 && !self.is_closed() && self.remove_slot(&mut slots, &conn)
                };
                if removed {
                    stats.evicted += 1;
                    closing.push(conn);
                }
            } else if self.is_expired(&conn) {
                expired.push(conn);
            }
        }

        // oldest first, so a failing endpoint costs the stalest connections
        while let Some(old) = expired.pop() {
            let fresh = self.dial(false)?;

            let mut slots = self.slots.write();
            let current = self.current.load(Ordering::Acquire) as usize;
            let slot = slots[..current]
                .iter_mut()
                .find(|slot| slot.as_ref().map_or(false, |c| Arc::ptr_eq(c, &old)));

            match slot {
                Some(slot) if old.borrows() == 0 && !self.is_closed() => {
                    *slot = Some(fresh);
                    closing.push(old);
                    stats.replaced += 1;
                }
                _ => closing.push(fresh),
            }
        }

        // evictions may have dipped below the floor
        stats.refilled = self.refill()?;
        Ok(())
    }

    fn is_alive(&self, conn: &Conn<C>) -> bool {
        match &self.options.ping {
            Some(ping) => match ping(conn.raw()) {
                Ok(()) => true,
                Err(error) => {
                    tracing::debug!(address = %self.address, id = conn.id(), %error, "ping failed");
                    false
                }
            },
            None => true,
        }
    }

    fn is_expired(&self, conn: &Conn<C>) -> bool {
        self.options.idle_timeout.map_or(false, |timeout| conn.age() > timeout)
    }

    pub(super) fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.reaper.shutdown();

        let mut conns: Vec<_> = {
            let mut slots = self.slots.write();
            self.index.store(0, Ordering::Release);
            self.refs.store(0, Ordering::Release);
            self.current.store(0, Ordering::Release);
            slots.iter_mut().filter_map(Option::take).collect()
        };
        while let Some(conn) = self.spares.pop() {
            conns.push(conn);
        }

        let mut result = Ok(());
        for conn in &conns {
            if let Err(error) = self.close_conn(conn) {
                tracing::warn!(address = %self.address, id = conn.id(), %error, "error closing connection");
                if result.is_ok() {
                    result = Err(error);
                }
            }
        }

        tracing::info!(address = %self.address, closed = conns.len(), "pool closed");
        result
    }

    fn dial(&self, transient: bool) -> Result<Arc<Conn<C>>> {
        let dial = self.options.dial.as_ref().ok_or(Error::MissingDial)?;
        let raw = dial(&self.address).map_err(Error::Dial)?;
        Ok(Arc::new(Conn::new(raw, transient)))
    }

    /// Runs the close callback once per connection.
    fn close_conn(&self, conn: &Conn<C>) -> Result<()> {
        if !conn.begin_close() {
            return Ok(());
        }
        match &self.options.close {
            Some(close) => close(conn.raw()).map_err(Error::Close),
            None => Ok(()),
        }
    }

    fn discard(&self, conn: &Conn<C>) {
        if let Err(error) = self.close_conn(conn) {
            tracing::warn!(address = %self.address, id = conn.id(), %error, "error closing connection");
        }
    }

    pub(super) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(super) fn status(&self) -> PoolStatus {
        let slots = self.slots.read();
        PoolStatus {
            address: self.address.clone(),
            index: self.index.load(Ordering::Acquire),
            current: self.current.load(Ordering::Acquire),
            refs: self.refs.load(Ordering::Acquire),
            slots: slots.len(),
            populated: slots.iter().filter(|slot| slot.is_some()).count(),
            spares: self.spares.len(),
            closed: self.is_closed(),
        }
    }

    pub(super) fn options(&self) -> &PoolOptions<C> {
        &self.options
    }

    /// Ids of the connection in each slot, `None` for an empty slot.
    #[cfg(test)]
    pub(super) fn slot_ids(&self) -> Vec<Option<u64>> {
        self.slots.read().iter().map(|slot| slot.as_ref().map(|c| c.id())).collect()
    }

    /// Holds a read lock on the slots until the returned guard is dropped.
    #[cfg(test)]
    pub(super) fn pin_slots(&self) -> impl Sized + '_ {
        self.slots.read()
    }

    #[cfg(test)]
    pub(super) fn force_refs(&self, refs: i32) {
        self.refs.store(refs, Ordering::Release);
    }
}

impl<C> Drop for SharedPool<C> {
    fn drop(&mut self) {
        self.reaper.shutdown();
    }
}

fn validate<C>(address: &str, options: &PoolOptions<C>) -> Result<()> {
    if address.is_empty() {
        return Err(Error::InvalidAddress);
    }
    if options.dial.is_none() {
        return Err(Error::MissingDial);
    }
    if options.max_active == 0 || options.max_idle > options.max_active {
        return Err(Error::InvalidCapacity {
            max_idle: options.max_idle,
            max_active: options.max_active,
        });
    }
    if options.max_concurrent_streams == 0 {
        return Err(Error::InvalidConcurrentStreams(options.max_concurrent_streams));
    }
    Ok(())
}

#[derive(Default)]
struct ReaperSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl ReaperSignal {
    fn shutdown(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }

    /// Sleeps for `period` or until shut down; `false` once shut down.
    fn sleep(&self, period: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            let _ = self.wake.wait_for(&mut stopped, period);
        }
        !*stopped
    }
}

fn spawn_reaper<C: Send + Sync + 'static>(pool: &Arc<SharedPool<C>>, period: Duration) {
    let weak: Weak<SharedPool<C>> = Arc::downgrade(pool);
    let signal = Arc::clone(&pool.reaper);

    let spawned = thread::Builder::new()
        .name("muxpool-reaper".into())
        .spawn(move || {
            while signal.sleep(period) {
                let pool = match weak.upgrade() {
                    Some(pool) => pool,
                    None => break,
                };
                if let Err(error) = pool.reap() {
                    tracing::warn!(address = %pool.address, %error, "reaper pass failed");
                }
            }
        });

    if let Err(error) = spawned {
        tracing::error!(address = %pool.address, %error, "failed to spawn reaper thread");
    }
}
