//! Agent Client Protocol (ACP) stream handling.
//!
//! JSON-RPC 2.0 over newline-delimited JSON between the bridge (client)
//! and the spawned CLI agent (server). The transport owns the child's
//! stdin/stdout pair; everything above it works with typed messages.
//!
//! # Submodules
//!
//! - [`codec`]: [`tokio_util::codec::LinesCodec`]-based NDJSON framing with
//!   a 1 MiB per-line limit.
//! - [`protocol`]: frame classification, session-update parsing, permission
//!   policy, and stop-reason decoding.
//! - [`transport`]: the bidirectional session transport with request/response
//!   correlation and the client-side responder for agent-initiated requests.

pub mod codec;
pub mod protocol;
pub mod transport;
