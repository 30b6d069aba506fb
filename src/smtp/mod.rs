//! SMTP listener and capture sessions

pub mod commands;
pub mod error;
pub mod response;
pub mod server;
pub mod session;

pub use commands::{Conversation, DataReader, SmtpCommandHandler};
pub use error::{ServiceError, SmtpError, SmtpLimits};
pub use response::SmtpResponse;
pub use server::{ServiceConfig, SmtpService};
pub use session::{CaptureBackend, CaptureSession, SessionState};
