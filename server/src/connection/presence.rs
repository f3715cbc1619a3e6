//! Auto-Unavailable Presence Timer
//!
//! Announcing `available` keeps an account online upstream until told
//! otherwise. Each connection owns at most one pending timer that flips it
//! back to `unavailable` after [`AUTO_UNAVAILABLE_AFTER`].

use std::sync::Arc;
use std::time::Duration;

use relay_common::{PhoneNumber, Presence};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::session::SessionHandle;

/// Delay before an `available` presence is withdrawn.
pub const AUTO_UNAVAILABLE_AFTER: Duration = Duration::from_secs(60);

#[derive(Default)]
pub struct PresenceTimer {
    pending: Option<JoinHandle<()>>,
}

impl PresenceTimer {
    /// Apply the timer rules after `presence` was sent successfully.
    pub fn on_presence_sent(
        &mut self,
        phone: &PhoneNumber,
        presence: Presence,
        handle: Arc<dyn SessionHandle>,
        to_jid: Option<String>,
    ) {
        if presence.is_online_state() {
            self.cancel();
        }
        if presence == Presence::Available {
            self.schedule(phone.clone(), handle, to_jid);
        }
    }

    fn schedule(&mut self, phone: PhoneNumber, handle: Arc<dyn SessionHandle>, to_jid: Option<String>) {
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(AUTO_UNAVAILABLE_AFTER).await;
            match handle
                .send_presence(Presence::Unavailable, to_jid.as_deref())
                .await
            {
                Ok(()) => debug!(phone = %phone, "Presence reset to unavailable"),
                Err(e) => error!(
                    phone = %phone,
                    handler = "presenceTimer",
                    error = %e,
                    "Failed to reset presence"
                ),
            }
        }));
    }

    /// Drop the pending timer, if any.
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }

    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl Drop for PresenceTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
