//! # lazysmtp
//!
//! lazysmtp is a local SMTP server that captures every message sent to it.
//!
//! Point an application's outgoing mail settings at it and inspect what
//! would have been sent, without delivering anything.
//!
//! ## Quick Start
//!
//! ```rust
//! use lazysmtp::{CaptureBackend, MemoryStore, MessageStore, ServiceConfig, SmtpService};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let store = Arc::new(MemoryStore::new());
//! let (notifier, arrivals) = lazysmtp::arrival_channel();
//! let backend = CaptureBackend::new(store.clone(), notifier);
//!
//! let config = ServiceConfig {
//!     port: 0,
//!     bind_address: "127.0.0.1".to_string(),
//!     ..ServiceConfig::default()
//! };
//! let service = SmtpService::new(config, backend);
//! service.start().unwrap();
//!
//! // Application sends email to service.local_addr()
//! // ...
//!
//! // Re-read the store whenever something arrives
//! if arrivals.wait_timeout(Duration::from_millis(100)).is_ok() {
//!     for message in store.list().unwrap() {
//!         println!("{} {}", message.id, message.subject);
//!     }
//! }
//!
//! service.stop();
//! ```
//!
//! ## Protocol
//!
//! The listener speaks a minimal subset of SMTP: `HELO`/`EHLO`, `MAIL`,
//! `RCPT`, `DATA`, `RSET`, `NOOP` and `QUIT`. Only the last `RCPT TO`
//! address of a transaction is recorded. There is no authentication, TLS
//! or relaying; every accepted message lands in the [`MessageStore`],
//! either [`SqliteStore`] on disk or [`MemoryStore`].
//!
//! ## Limits
//!
//! Each connection has a 10 second read and write timeout. Messages may be
//! at most 1 MiB, with at most 50 recipients per transaction.
//!
//! ## Arrival notifications
//!
//! Every stored message sends a token on a bounded channel. Tokens carry no
//! payload and may be dropped under load; consumers re-read the store.

pub mod config;
pub mod message;
pub mod notify;
pub mod paths;
pub mod smtp;
pub mod store;

pub use message::{Message, NO_SUBJECT, extract_subject, generate_id};
pub use notify::{ArrivalNotifier, ArrivalReceiver, arrival_channel};
pub use smtp::{
    CaptureBackend, CaptureSession, ServiceConfig, ServiceError, SessionState, SmtpError,
    SmtpLimits, SmtpResponse, SmtpService,
};
pub use store::{MemoryStore, MessageStore, SqliteStore, StoreError};
