//! Kewen · lesson generation backend
//!
//! Turns plain source text (already extracted client-side) into a structured
//! Mandarin lesson document by calling an external LLM, behind an ingress
//! guard (validation + per-client rate limit).
//!
//! Pipeline: request → `ingress` → `prompt` → `backend` (with `retry` and
//! fallback, orchestrated in `proxy`) → JSON salvage → `domain` schema check.

pub mod backend;
pub mod config;
pub mod domain;
pub mod error;
pub mod ingress;
pub mod prompt;
pub mod protocol;
pub mod proxy;
pub mod retry;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod util;
