//! Capture session state management

use std::io::Read;
use std::sync::Arc;

use crate::message::Message;
use crate::notify::ArrivalNotifier;
use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::store::MessageStore;

/// Represents the current state of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transaction open - waiting for MAIL
    Idle,
    /// MAIL FROM received - waiting for RCPT
    SenderSet,
    /// RCPT TO received - ready for DATA or another RCPT
    RecipientSet,
    /// DATA received - body is being read and committed
    Committing,
}

/// Mints one [`CaptureSession`] per accepted connection
#[derive(Clone)]
pub struct CaptureBackend {
    store: Arc<dyn MessageStore>,
    notifier: ArrivalNotifier,
}

impl CaptureBackend {
    pub fn new(store: Arc<dyn MessageStore>, notifier: ArrivalNotifier) -> Self {
        Self { store, notifier }
    }

    /// Create a fresh session sharing this backend's store and notifier
    pub fn new_session(&self) -> CaptureSession {
        CaptureSession::new(Arc::clone(&self.store), self.notifier.clone())
    }
}

/// Accumulates one envelope and its body, then commits it to the store.
///
/// Only the most recent recipient is kept.
pub struct CaptureSession {
    state: SessionState,
    from: String,
    to: String,
    body: Vec<u8>,
    store: Arc<dyn MessageStore>,
    notifier: ArrivalNotifier,
}

impl CaptureSession {
    /// Create a new capture session
    pub fn new(store: Arc<dyn MessageStore>, notifier: ArrivalNotifier) -> Self {
        Self {
            state: SessionState::Idle,
            from: String::new(),
            to: String::new(),
            body: Vec::new(),
            store,
            notifier,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Record the envelope sender
    pub fn on_sender(&mut self, address: &str) {
        self.from = address.to_string();
        self.state = SessionState::SenderSet;
    }

    /// Record the envelope recipient, replacing any earlier one
    pub fn on_recipient(&mut self, address: &str) {
        self.to = address.to_string();
        self.state = SessionState::RecipientSet;
    }

    /// Read the whole message from `stream`, store it, and signal arrival.
    ///
    /// Nothing is stored if reading fails or the data exceeds
    /// [`SmtpLimits::MAX_DATA_SIZE`]. Store failures are returned to the
    /// caller and no arrival is signalled for them. The session stays in
    /// [`SessionState::Committing`] until [`reset`](Self::reset).
    pub fn on_data<R: Read>(&mut self, stream: R) -> Result<Message, SmtpError> {
        self.state = SessionState::Committing;
        self.body.clear();

        let limit = SmtpLimits::MAX_DATA_SIZE as u64 + 1;
        stream.take(limit).read_to_end(&mut self.body)?;
        if self.body.len() > SmtpLimits::MAX_DATA_SIZE {
            return Err(SmtpError::TooMuchData {
                max: SmtpLimits::MAX_DATA_SIZE,
            });
        }

        let message = Message::capture(
            self.from.clone(),
            self.to.clone(),
            std::mem::take(&mut self.body),
        );
        self.store.insert(&message)?;

        tracing::info!(
            id = %message.id,
            from = %message.from,
            to = %message.to,
            subject = %message.subject,
            size = message.size(),
            "Captured message"
        );
        self.notifier.notify();

        Ok(message)
    }

    /// Clear the envelope and body, returning to [`SessionState::Idle`]
    pub fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.from.clear();
        self.to.clear();
        self.body.clear();
    }

    /// End the session
    pub fn logout(self) {
        tracing::trace!(state = ?self.state, "Session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::NO_SUBJECT;
    use crate::notify::{ArrivalReceiver, arrival_channel};
    use crate::store::{MemoryStore, StoreError};
    use std::io;
    use std::time::Duration;

    fn create_session() -> (CaptureSession, Arc<MemoryStore>, ArrivalReceiver) {
        let store = Arc::new(MemoryStore::new());
        let (notifier, receiver) = arrival_channel();
        let session = CaptureSession::new(store.clone(), notifier);
        (session, store, receiver)
    }

    /// Store whose inserts always collide
    struct ConflictingStore;

    impl MessageStore for ConflictingStore {
        fn insert(&self, message: &Message) -> Result<(), StoreError> {
            Err(StoreError::Conflict(message.id.clone()))
        }
        fn list(&self) -> Result<Vec<Message>, StoreError> {
            Ok(Vec::new())
        }
        fn get(&self, id: &str) -> Result<Message, StoreError> {
            Err(StoreError::NotFound(id.to_string()))
        }
        fn delete(&self, _id: &str) -> Result<(), StoreError> {
            Ok(())
        }
        fn delete_all(&self) -> Result<(), StoreError> {
            Ok(())
        }
        fn count(&self) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    /// Reader that fails after yielding some bytes
    struct BrokenStream {
        sent: bool,
    }

    impl Read for BrokenStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
            }
            self.sent = true;
            let chunk = b"Subject: partial\r\n";
            buf[..chunk.len()].copy_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn test_new_session() {
        let (session, _, _) = create_session();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.from().is_empty());
        assert!(session.to().is_empty());
        assert!(session.body().is_empty());
    }

    #[test]
    fn test_envelope_transitions() {
        let (mut session, _, _) = create_session();

        session.on_sender("sender@example.com");
        assert_eq!(session.state(), SessionState::SenderSet);
        assert_eq!(session.from(), "sender@example.com");

        session.on_recipient("first@example.com");
        assert_eq!(session.state(), SessionState::RecipientSet);

        session.on_recipient("second@example.com");
        assert_eq!(session.state(), SessionState::RecipientSet);
        assert_eq!(session.to(), "second@example.com");
    }

    #[test]
    fn test_data_commits_message() {
        let (mut session, store, receiver) = create_session();
        session.on_sender("sender@example.com");
        session.on_recipient("recipient@example.com");

        let body = b"Subject: Test Email\r\n\r\nBody content\r\n";
        let message = session.on_data(&body[..]).unwrap();
        assert_eq!(session.state(), SessionState::Committing);

        assert_eq!(message.subject, "Test Email");
        assert_eq!(message.body, body.to_vec());

        let stored = store.get(&message.id).unwrap();
        assert_eq!(stored.from, "sender@example.com");
        assert_eq!(stored.to, "recipient@example.com");
        assert_eq!(stored.subject, "Test Email");
        assert_eq!(stored.body, body.to_vec());

        assert!(receiver.wait_timeout(Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn test_data_without_subject() {
        let (mut session, store, _) = create_session();
        session.on_sender("a@example.com");
        session.on_recipient("b@example.com");

        let message = session.on_data(&b"Body content\nMore body"[..]).unwrap();
        assert_eq!(store.get(&message.id).unwrap().subject, NO_SUBJECT);
    }

    #[test]
    fn test_stream_failure_commits_nothing() {
        let (mut session, store, receiver) = create_session();
        session.on_sender("a@example.com");
        session.on_recipient("b@example.com");

        let result = session.on_data(BrokenStream { sent: false });
        assert!(matches!(result, Err(SmtpError::Io(_))));
        assert_eq!(store.count().unwrap(), 0);
        assert!(receiver.wait_timeout(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_too_much_data_commits_nothing() {
        let (mut session, store, _) = create_session();
        session.on_sender("a@example.com");
        session.on_recipient("b@example.com");

        let data = vec![b'a'; SmtpLimits::MAX_DATA_SIZE + 1];
        let result = session.on_data(&data[..]);
        assert!(matches!(result, Err(SmtpError::TooMuchData { .. })));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_data_at_size_limit_is_accepted() {
        let (mut session, store, _) = create_session();
        session.on_sender("a@example.com");
        session.on_recipient("b@example.com");

        let data = vec![b'a'; SmtpLimits::MAX_DATA_SIZE];
        session.on_data(&data[..]).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_store_failure_propagates() {
        let (notifier, receiver) = arrival_channel();
        let mut session = CaptureSession::new(Arc::new(ConflictingStore), notifier);
        session.on_sender("a@example.com");
        session.on_recipient("b@example.com");

        let result = session.on_data(&b"Subject: lost\r\n"[..]);
        assert!(matches!(
            result,
            Err(SmtpError::Storage(StoreError::Conflict(_)))
        ));
        assert!(receiver.wait_timeout(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_reset_is_idempotent() {
        let (mut session, _, _) = create_session();
        session.on_sender("a@example.com");
        session.on_recipient("b@example.com");

        session.reset();
        session.reset();

        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.from().is_empty());
        assert!(session.to().is_empty());
        assert!(session.body().is_empty());
    }

    #[test]
    fn test_envelopes_do_not_leak_across_reset() {
        let (mut session, store, _) = create_session();

        session.on_sender("first@example.com");
        session.on_recipient("one@example.com");
        session.on_data(&b"Subject: first\r\n"[..]).unwrap();
        session.reset();

        session.on_sender("second@example.com");
        session.on_recipient("two@example.com");
        session.on_data(&b"Subject: second\r\n"[..]).unwrap();
        session.reset();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].from, "second@example.com");
        assert_eq!(listed[0].to, "two@example.com");
        assert_eq!(listed[0].body, b"Subject: second\r\n".to_vec());
        assert_eq!(listed[1].from, "first@example.com");
    }

    #[test]
    fn test_backend_mints_independent_sessions() {
        let store: Arc<dyn MessageStore> = Arc::new(MemoryStore::new());
        let (notifier, _receiver) = arrival_channel();
        let backend = CaptureBackend::new(store, notifier);

        let mut first = backend.new_session();
        let second = backend.new_session();
        first.on_sender("a@example.com");

        assert_eq!(first.state(), SessionState::SenderSet);
        assert_eq!(second.state(), SessionState::Idle);

        first.logout();
        second.logout();
    }
}
