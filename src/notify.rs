//! Push-notification seam.
//!
//! Dispatch is fire-and-forget: the sweep reports failures to the caller's
//! logs and never lets them touch committed financial state.

use tracing::info;
use uuid::Uuid;

/// Delivers a push notification to every device of a user.
pub trait PushNotifier {
    fn send_push(&self, user_id: Uuid, title: &str, body: &str) -> Result<(), String>;
}

/// Notifier that only writes to the log. Used by the CLI, where no push
/// gateway is wired up.
#[derive(Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl PushNotifier for LogNotifier {
    fn send_push(&self, user_id: Uuid, title: &str, body: &str) -> Result<(), String> {
        info!(user = %user_id, title, body, "push notification");
        Ok(())
    }
}
