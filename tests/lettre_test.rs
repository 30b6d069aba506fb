use lazysmtp::{CaptureBackend, MemoryStore, MessageStore, ServiceConfig, SmtpService, arrival_channel};
use lettre::message::{Mailbox, Message};
use lettre::{SmtpTransport, Transport};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn basic_lettre_send() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(MemoryStore::new());
    let (notifier, arrivals) = arrival_channel();
    let config = ServiceConfig {
        port: 0,
        bind_address: "127.0.0.1".to_string(),
        ..ServiceConfig::default()
    };
    let service = SmtpService::new(config, CaptureBackend::new(store.clone(), notifier));
    service.start()?;
    let port = service.local_addr().ok_or("service not running")?.port();

    let message = Message::builder()
        .from("花子 <hanako@example.com>".parse::<Mailbox>()?)
        .to("太郎 <tarou@example.com>".parse::<Mailbox>()?)
        .subject("Weekly report")
        .body("本文".to_owned())?;

    let mailer = SmtpTransport::builder_dangerous("127.0.0.1")
        .port(port)
        .build();

    mailer.send(&message)?;

    arrivals.wait_timeout(Duration::from_secs(2))?;
    let captured = store.list()?;
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].from, "hanako@example.com");
    assert_eq!(captured[0].to, "tarou@example.com");
    assert_eq!(captured[0].subject, "Weekly report");

    service.stop();
    Ok(())
}
