//! # sqlgate
//!
//! Declarative SQL-to-API gateway: REST and MCP (JSON-RPC tools/resources/
//! prompts) endpoints, each a named mapping from a transport operation to a
//! parameterised SQL template, executed against an embedded analytical
//! engine (Apache DataFusion) through a single fair shared/exclusive lock.
//!
//! ## Architecture
//!
//! ```text
//! REST / MCP transport → RequestPipeline → CacheStore / QueryExecutor → Engine
//!                                                 ^
//!                                   RefreshScheduler (background)
//! ```
//!
//! - [`config`] — the materialised configuration model and its YAML loader.
//! - [`registry`] — live, copy-on-write indices of endpoints and connections.
//! - [`template`] — the logic-less `{{ }}`/`{{{ }}}` tag expander templates render through.
//! - [`validator`] — typed parameter validation, including the SQL-injection guard.
//! - [`auth`] — the auth decision contract the pipeline enforces per endpoint.
//! - [`engine`] — the embedded engine's query + versioned-catalog contract, and its
//!   DataFusion-backed implementation.
//! - [`executor`] — serialises engine access behind one shared/exclusive lock.
//! - [`cache`] — the versioned refresh cache: full/append/merge modes, coalesced
//!   refreshes, retention, and a bounded audit log.
//! - [`scheduler`] — the background driver that keeps cache-enabled endpoints warm.
//! - [`pipeline`] — the transport-agnostic request orchestration, with REST and MCP
//!   transport adapters.
//! - [`management`] — the operator surface over endpoints, templates, cache specs,
//!   and the audit log.
//! - [`server`] — axum application wiring for both transports.
//! - [`cmd`] — the CLI and server bootstrap.

pub use errors::{GatewayError, Result};

pub mod auth;
pub mod cache;
pub mod cmd;
pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod log;
pub mod management;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod template;
pub mod validator;
