#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use portcullis::{
    Error, Identity, LoginSession, ManualClock, Notifier, Origin, Portcullis, PortcullisBuilder,
    SqliteRepositoryProvider, StaticConfig, Subject,
};
use portcullis_core::error::StorageError;
use tokio::sync::mpsc;

pub const PASSWORD: &str = "correct-horse-battery";

pub struct Harness {
    pub portcullis: Portcullis<SqliteRepositoryProvider>,
    pub clock: Arc<ManualClock>,
    pub config: Arc<StaticConfig>,
}

impl Harness {
    pub async fn register(&self, email: &str, document: Option<&str>) -> Subject {
        self.portcullis
            .register_subject(email, document, PASSWORD)
            .await
            .expect("Failed to register subject")
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginSession, Error> {
        self.portcullis
            .login(&Identity::email(email), password, &origin())
            .await
    }
}

pub fn origin() -> Origin {
    Origin::new(Some("203.0.113.7"), Some("integration-test"))
}

pub async fn harness() -> Harness {
    harness_with(Arc::new(portcullis::TracingNotifier)).await
}

pub async fn harness_with(notifier: Arc<dyn Notifier>) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let clock = Arc::new(ManualClock::starting_now());
    let config = Arc::new(StaticConfig::new());

    let portcullis = PortcullisBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite")
        .apply_migrations(true)
        .with_config_provider(config.clone())
        .with_clock(clock.clone())
        .with_notifier(notifier)
        .build()
        .await
        .expect("Failed to build Portcullis");

    Harness {
        portcullis,
        clock,
        config,
    }
}

/// Forwards every notification to a channel.
pub struct ChannelNotifier(pub mpsc::UnboundedSender<(String, String, String)>);

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), Error> {
        let _ = self
            .0
            .send((recipient.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

pub fn channel_notifier() -> (
    Arc<ChannelNotifier>,
    mpsc::UnboundedReceiver<(String, String, String)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelNotifier(tx)), rx)
}

/// A transport that is always down.
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _recipient: &str, _subject: &str, _body: &str) -> Result<(), Error> {
        Err(StorageError::Connection("mail relay unreachable".to_string()).into())
    }
}
