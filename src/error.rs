//! Error and Result types.

use std::error::Error as StdError;

/// A specialized `Result` type for pool operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error returned by the transport callbacks (`dial`, `close`, `ping`).
pub type BoxDynError = Box<dyn StdError + Send + Sync + 'static>;

/// Represents all the ways a pool operation can fail.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The pool was constructed with an empty address.
    #[error("invalid address settings")]
    InvalidAddress,

    /// The pool was constructed without a `dial` callback.
    #[error("invalid dial settings")]
    MissingDial,

    /// `max_active` is zero or smaller than `max_idle`.
    #[error("invalid maximum settings: max_idle={max_idle}, max_active={max_active}")]
    InvalidCapacity { max_idle: u32, max_active: u32 },

    /// `max_concurrent_streams` is zero.
    #[error("invalid max_concurrent_streams: {0}")]
    InvalidConcurrentStreams(u32),

    /// Dialing failed while filling the idle floor during construction.
    #[error("dial is not able to fill the pool: {0}")]
    Warmup(#[source] BoxDynError),

    /// Dialing failed while growing the pool or opening a transient connection.
    #[error("error dialing connection: {0}")]
    Dial(#[source] BoxDynError),

    /// The `close` callback reported an error.
    #[error("error closing connection: {0}")]
    Close(#[source] BoxDynError),

    /// [`Pool::close`](crate::Pool::close) was called on this pool.
    #[error("pool is closed")]
    PoolClosed,

    /// The reservation counter is saturated.
    #[error("overflow ref: {0}")]
    RefOverflow(i32),

    /// A release was not matched by a borrow.
    #[error("negative ref")]
    NegativeRef,
}

impl Error {
    /// Returns `true` if the pool's accounting can no longer be trusted.
    ///
    /// Callers are expected to treat these as unrecoverable and stop the
    /// process rather than keep using the pool.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::RefOverflow(_) | Error::NegativeRef)
    }

    /// Returns `true` for errors produced by validating [`PoolOptions`](crate::PoolOptions).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::InvalidAddress
                | Error::MissingDial
                | Error::InvalidCapacity { .. }
                | Error::InvalidConcurrentStreams(_)
        )
    }
}
