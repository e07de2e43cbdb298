use std::fmt::{self, Debug, Formatter};
use std::time::Duration;

use super::config::PoolConfig;
use super::Pool;
use crate::error::{BoxDynError, Result};

pub(crate) type DialFn<C> = Box<dyn Fn(&str) -> Result<C, BoxDynError> + Send + Sync + 'static>;
pub(crate) type CheckFn<C> = Box<dyn Fn(&C) -> Result<(), BoxDynError> + Send + Sync + 'static>;

pub struct PoolOptions<C> {
    // capacity
    pub(crate) max_idle: u32,
    pub(crate) max_active: u32,
    pub(crate) max_concurrent_streams: u32,

    // behaviour at capacity
    pub(crate) wait: bool,
    pub(crate) reuse: bool,

    // lifecycle
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) reap_interval: Option<Duration>,

    // transport callbacks
    pub(crate) dial: Option<DialFn<C>>,
    pub(crate) close: Option<CheckFn<C>>,
    pub(crate) ping: Option<CheckFn<C>>,
}

impl<C> Default for PoolOptions<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> PoolOptions<C> {
    /// Create a new `PoolOptions` with some arbitrary, but sane, default values.
    ///
    /// See the source of this method for the current values. No `dial`
    /// callback is set; one is required before connecting.
    pub fn new() -> Self {
        Self {
            max_idle: 8,
            max_active: 64,
            max_concurrent_streams: 64,
            wait: true,
            reuse: false,
            idle_timeout: None,
            reap_interval: None,
            dial: None,
            close: None,
            ping: None,
        }
    }

    /// Set the number of physical connections dialed at construction and kept
    /// once every borrow has been released.
    pub fn max_idle(mut self, max: u32) -> Self {
        self.max_idle = max;
        self
    }

    /// Set the maximum number of physical connections kept in the pool's slots.
    ///
    /// Transient connections opened at capacity are not counted.
    pub fn max_active(mut self, max: u32) -> Self {
        self.max_active = max;
        self
    }

    /// Set the number of logical borrows each physical connection carries
    /// before the pool grows.
    pub fn max_concurrent_streams(mut self, streams: u32) -> Self {
        self.max_concurrent_streams = streams;
        self
    }

    /// If true, a borrow arriving when every slot is full and busy shares an
    /// existing connection (round-robin) instead of dialing a transient one.
    ///
    /// Defaults to `true`.
    pub fn wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    /// If true, a transient connection that is still usable on release is
    /// moved into a free slot or kept as a spare for the next overflow,
    /// instead of being closed.
    ///
    /// Defaults to `false`.
    pub fn reuse(mut self, reuse: bool) -> Self {
        self.reuse = reuse;
        self
    }

    /// Set a maximum age for idle slot connections.
    ///
    /// Enforced by [`Pool::reap`], either called by the application or by the
    /// background reaper (see [`reap_interval`](Self::reap_interval)).
    pub fn idle_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.idle_timeout = timeout.into();
        self
    }

    /// Spawn a background thread that calls [`Pool::reap`] at this interval.
    pub fn reap_interval(mut self, interval: impl Into<Option<Duration>>) -> Self {
        self.reap_interval = interval.into();
        self
    }

    /// Set the function that opens a physical connection to an address.
    ///
    /// It may be called from several threads at once and is expected to
    /// enforce its own deadline.
    pub fn dial<F>(mut self, dial: F) -> Self
    where
        F: Fn(&str) -> Result<C, BoxDynError> + Send + Sync + 'static,
    {
        self.dial = Some(Box::new(dial));
        self
    }

    /// Set the function that terminates a physical connection.
    ///
    /// Without it, a connection is released by dropping its handle once the
    /// last borrower lets go of it.
    pub fn close<F>(mut self, close: F) -> Self
    where
        F: Fn(&C) -> Result<(), BoxDynError> + Send + Sync + 'static,
    {
        self.close = Some(Box::new(close));
        self
    }

    /// Set a liveness probe, consulted by [`Pool::reap`].
    pub fn ping<F>(mut self, ping: F) -> Self
    where
        F: Fn(&C) -> Result<(), BoxDynError> + Send + Sync + 'static,
    {
        self.ping = Some(Box::new(ping));
        self
    }

    /// Overwrite the plain settings with values loaded from configuration.
    /// Callbacks are left untouched.
    pub fn apply_config(mut self, config: &PoolConfig) -> Self {
        self.max_idle = config.max_idle;
        self.max_active = config.max_active;
        self.max_concurrent_streams = config.max_concurrent_streams;
        self.wait = config.wait;
        self.reuse = config.reuse;
        self.idle_timeout = config.idle_timeout();
        self.reap_interval = config.reap_interval();
        self
    }
}

impl<C: Send + Sync + 'static> PoolOptions<C> {
    /// Creates a new pool from this configuration and immediately dials
    /// [`max_idle`](Self::max_idle) connections to `address`.
    ///
    /// Returns an error if the configuration is invalid or any of those dials
    /// fails; connections opened so far are closed again in that case.
    pub fn connect(self, address: &str) -> Result<Pool<C>> {
        Pool::new(address, self)
    }
}

impl<C> Debug for PoolOptions<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("max_idle", &self.max_idle)
            .field("max_active", &self.max_active)
            .field("max_concurrent_streams", &self.max_concurrent_streams)
            .field("wait", &self.wait)
            .field("reuse", &self.reuse)
            .field("idle_timeout", &self.idle_timeout)
            .field("reap_interval", &self.reap_interval)
            .field("dial", &self.dial.is_some())
            .field("close", &self.close.is_some())
            .field("ping", &self.ping.is_some())
            .finish()
    }
}
