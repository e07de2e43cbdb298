#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use muxpool::{BoxDynError, PoolOptions};
use parking_lot::Mutex;

pub const ADDRESS: &str = "127.0.0.1:50000";

/// Stand-in for an RPC channel.
#[derive(Debug)]
pub struct MockConn {
    pub serial: usize,
    pub address: String,
    closed: AtomicBool,
}

impl MockConn {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Counts dials and closes, and fails on demand.
#[derive(Debug, Default)]
pub struct Transport {
    dialed: AtomicUsize,
    closed: AtomicUsize,
    failing: AtomicBool,
    // successful dials left before failing, unlimited when `None`
    budget: Mutex<Option<usize>>,
    dead: Mutex<HashSet<usize>>,
}

impl Transport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn dialed(&self) -> usize {
        self.dialed.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Let `n` more dials succeed, then fail every one after.
    pub fn fail_after(&self, n: usize) {
        *self.budget.lock() = Some(n);
    }

    /// Make `ping` fail for the connection with this serial.
    pub fn kill(&self, serial: usize) {
        self.dead.lock().insert(serial);
    }

    fn dial(&self, address: &str) -> Result<MockConn, BoxDynError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err("connection refused".into());
        }
        if let Some(budget) = self.budget.lock().as_mut() {
            if *budget == 0 {
                return Err("connection refused".into());
            }
            *budget -= 1;
        }

        let serial = self.dialed.fetch_add(1, Ordering::SeqCst);
        Ok(MockConn {
            serial,
            address: address.to_owned(),
            closed: AtomicBool::new(false),
        })
    }

    fn close(&self, conn: &MockConn) -> Result<(), BoxDynError> {
        if conn.closed.swap(true, Ordering::SeqCst) {
            return Err(format!("connection {} closed twice", conn.serial).into());
        }
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn ping(&self, conn: &MockConn) -> Result<(), BoxDynError> {
        if conn.is_closed() || self.dead.lock().contains(&conn.serial) {
            return Err(format!("connection {} is dead", conn.serial).into());
        }
        Ok(())
    }
}

/// Options wired to `transport`, with the default capacity settings.
pub fn options(transport: &Arc<Transport>) -> PoolOptions<MockConn> {
    let dial = Arc::clone(transport);
    let close = Arc::clone(transport);
    let ping = Arc::clone(transport);

    PoolOptions::new()
        .dial(move |address: &str| dial.dial(address))
        .close(move |conn: &MockConn| close.close(conn))
        .ping(move |conn: &MockConn| ping.ping(conn))
}
