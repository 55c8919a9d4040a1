use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Asks the user whether the wallet may sign a login message.
#[async_trait]
pub trait SignConsent: Send + Sync {
    async fn confirm(&self, account: &str) -> bool;
}

/// Approves every request. For headless use and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl SignConsent for AutoApprove {
    async fn confirm(&self, _account: &str) -> bool {
        true
    }
}

/// A pending confirmation shown to the user. Resolving it answers the login
/// that raised it; dropping it counts as a decline.
#[derive(Debug)]
pub struct ConsentRequest {
    pub account: String,
    responder: oneshot::Sender<bool>,
}

impl ConsentRequest {
    pub fn accept(self) {
        let _ = self.responder.send(true);
    }

    pub fn cancel(self) {
        let _ = self.responder.send(false);
    }
}

/// Forwards each confirmation to a dialog front end over a channel.
#[derive(Debug, Clone)]
pub struct DialogConsent {
    requests: mpsc::Sender<ConsentRequest>,
}

impl DialogConsent {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ConsentRequest>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { requests: tx }, rx)
    }
}

#[async_trait]
impl SignConsent for DialogConsent {
    async fn confirm(&self, account: &str) -> bool {
        let (responder, answer) = oneshot::channel();
        let request = ConsentRequest {
            account: account.to_string(),
            responder,
        };

        if self.requests.send(request).await.is_err() {
            debug!("Consent dialog is gone, treating as declined");
            return false;
        }
        answer.await.unwrap_or(false)
    }
}
