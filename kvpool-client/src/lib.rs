//! # kvpool Client
//!
//! Purpose: A minimal key-value client that checks out pooled connections,
//! writes RESP2-framed commands, and hands the connections back.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: All traffic goes through `kvpool::ConnPool`.
//! 2. **Protocol Clarity**: Commands are framed explicitly in `resp`.
//! 3. **Defaults Up Front**: Options are completed once, before the pool exists.

mod client;
mod options;
pub mod resp;

pub use client::{Client, ClientError, ClientResult};
pub use options::{
    network_dialer, ClientOptions, Network, DEFAULT_ADDR, DEFAULT_DIAL_TIMEOUT,
    DEFAULT_POOL_SIZE, DEFAULT_POOL_TIMEOUT,
};
