//! Client for the Presto distributed SQL engine's HTTP query protocol.
//!
//! This crate implements the coordinator protocol as a state-driven engine:
//! - Submit a statement with `POST /v1/statement`
//! - Follow the server-provided `nextUri` until the server omits it,
//!   collecting paged result rows
//! - Apply session mutations carried in response headers
//!   (`X-Presto-Set-Session`, `X-Presto-Clear-Session`,
//!   `X-Presto-Added-Prepare`) so they take effect on the very next request
//! - Retry transient failures (connection errors, timeouts, HTTP 503) with
//!   exponential backoff
//! - Optionally resolve coordinator redirects on submission and install
//!   refreshed bearer credentials per request
//! - Optionally convert result cells to native typed values (decimals,
//!   dates, times and timestamps with or without zones, nested arrays)
//!
//! # Example
//!
//! ```ignore
//! use presto_client::Client;
//!
//! let client = Client::builder("coordinator.example.com", "etl")
//!     .catalog("hive")
//!     .schema("default")
//!     .build()?;
//!
//! let mut query = client.query("SELECT id, amount FROM payments LIMIT 5");
//! let result = query.execute().await?;
//! for row in result.typed() {
//!     println!("{:?}", row?);
//! }
//! ```
//!
//! Queries are single-caller: each [`Query`] is driven through `&mut`
//! methods by one logical task. The session is shared across the queries
//! of one [`Client`], which is what the protocol requires — the server
//! mutates session state mid-query via response headers.

mod auth;
mod client;
mod config;
mod error;
mod protocol;
mod query;
mod session;
#[cfg(test)]
mod testserver;
mod transport;
mod typed;

pub use auth::{
    Authenticator, BasicAuthenticator, CredentialProvider, PassthroughResolver, RedirectResolver,
};
pub use client::{Client, ClientBuilder};
pub use config::{
    ClientConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT, RetryPolicy, Scheme,
};
pub use error::ClientError;
pub use protocol::{Column, ErrorInfo, QueryStatus, TypeArgument, TypeSignature};
pub use query::{Query, ResultSet, TypedResultSet};
pub use session::{ClientSession, NO_TRANSACTION};
pub use transport::DEFAULT_USER_AGENT;
pub use typed::{TypedValue, map_cell, map_row};
