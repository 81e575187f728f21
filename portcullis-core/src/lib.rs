//! Core functionality for portcullis
//!
//! This crate holds the engine behind portcullis: the attempt ledger and
//! lockout decisions, one-time recovery codes, the bearer token lifecycle,
//! and sliding-window rate limiting.
//!
//! Storage is reached only through the traits in [`repositories`]. An
//! in-memory backend lives in [`memory`]; durable backends live in their own
//! crates (see `portcullis-storage-sqlite`).
//!
//! See [`services`] for the engine components, [`Settings`] for tunables and
//! [`Error`] for the error taxonomy exposed to transport layers.
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod id;
pub mod memory;
pub mod repositories;
pub mod services;
pub mod storage;
pub mod subject;
pub mod token;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigProvider, EnvConfig, Settings, StaticConfig};
pub use error::{Error, ErrorKind};
pub use storage::{AttemptOutcome, Identity, Lockout, LockoutScope, Origin};
pub use subject::{NewSubject, Subject, SubjectId};
pub use token::{JwtConfig, TokenClaims, TokenKind, TokenPair};
