//! A client-side connection pool that multiplexes many logical borrowers over a
//! bounded set of physical transport connections.
//!
//! Each physical connection carries up to `max_concurrent_streams` logical
//! borrows. The pool starts with `max_idle` connections, doubles toward
//! `max_active` under load, and shrinks back to `max_idle` once every borrow
//! has been released. A borrower is never parked: at capacity the pool either
//! oversubscribes an existing connection or dials a transient one.
//!
//! ```no_run
//! use std::net::TcpStream;
//!
//! let pool = muxpool::PoolOptions::new()
//!     .max_idle(2)
//!     .max_active(8)
//!     .max_concurrent_streams(16)
//!     .dial(|addr: &str| Ok(TcpStream::connect(addr)?))
//!     .connect("127.0.0.1:50000")?;
//!
//! let conn = pool.get()?;
//! let _peer = conn.peer_addr();
//! conn.close()?;
//! # Ok::<(), muxpool::Error>(())
//! ```

#![forbid(unsafe_code)]

mod error;
pub mod pool;

pub use error::{BoxDynError, Error, Result};
pub use pool::{
    Less, Pool, PoolConfig, PoolConnection, PoolOptions, PoolStatus, PriorityQueue, ReapStats,
};
