//! Outbound notification seam
//!
//! The engine decides *when* a lockout or recovery message should go out; the
//! [`Notifier`] implementation decides how. Every send is fire-and-forget: it
//! runs on its own task and a failure is logged, never returned.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Error;

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), Error>;
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, recipient: &str, subject: &str, _body: &str) -> Result<(), Error> {
        tracing::info!(recipient, subject, "Notification dispatched");
        Ok(())
    }
}

/// Builds engine notifications and dispatches them in the background.
#[derive(Clone)]
pub struct NotificationService {
    notifier: Arc<dyn Notifier>,
}

impl NotificationService {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Send on a background task. Returns immediately.
    pub fn dispatch(&self, recipient: &str, subject: &str, body: String) {
        let notifier = Arc::clone(&self.notifier);
        let recipient = recipient.to_string();
        let subject = subject.to_string();

        tokio::spawn(async move {
            if let Err(e) = notifier.send(&recipient, &subject, &body).await {
                tracing::warn!(
                    error = %e,
                    recipient = %recipient,
                    subject = %subject,
                    "Failed to deliver notification"
                );
            }
        });
    }

    pub fn account_locked(&self, email: &str, expires_at: Option<DateTime<Utc>>) {
        let body = match expires_at {
            Some(until) => format!(
                "Your account was locked after repeated failed sign-in attempts. \
                 You can try again after {}.",
                until.format("%Y-%m-%d %H:%M UTC")
            ),
            None => "Your account was locked. Reset your password to regain access.".to_string(),
        };
        self.dispatch(email, "Your account has been locked", body);
    }

    pub fn recovery_code(&self, email: &str, code: &str, expires_at: DateTime<Utc>) {
        let body = format!(
            "Your recovery code is {code}. It expires at {}.",
            expires_at.format("%H:%M UTC")
        );
        self.dispatch(email, "Your recovery code", body);
    }

    pub fn password_changed(&self, email: &str) {
        self.dispatch(
            email,
            "Your password was changed",
            "Your password was changed and every other session was signed out.".to_string(),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::error::StorageError;

    struct ChannelNotifier(mpsc::UnboundedSender<(String, String, String)>);

    #[async_trait]
    impl Notifier for ChannelNotifier {
        async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), Error> {
            let _ = self
                .0
                .send((recipient.to_string(), subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn send(&self, _: &str, _: &str, _: &str) -> Result<(), Error> {
            Err(StorageError::Connection("smtp unreachable".to_string()).into())
        }
    }

    #[tokio::test]
    async fn test_recovery_code_notification_contains_code() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = NotificationService::new(Arc::new(ChannelNotifier(tx)));

        service.recovery_code("a@x.com", "4821", Utc::now());

        let (recipient, subject, body) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recipient, "a@x.com");
        assert_eq!(subject, "Your recovery code");
        assert!(body.contains("4821"));
    }

    #[tokio::test]
    async fn test_failing_notifier_does_not_propagate() {
        let service = NotificationService::new(Arc::new(FailingNotifier));
        service.account_locked("a@x.com", None);
        tokio::task::yield_now().await;
    }
}
