use std::time::Duration;

use tokio::time::Instant;

/// Tokens held by the coordinator.
#[derive(Debug, Clone, Default)]
pub(crate) struct AuthSession {
    pub(crate) access_token: Option<String>,
    pub(crate) refresh_token: Option<String>,
    pub(crate) last_logout_at: Option<Instant>,
}

impl AuthSession {
    pub(crate) fn clear_tokens(&mut self) {
        self.access_token = None;
        self.refresh_token = None;
    }

    /// Marks a logout at `now` unless one happened less than `cooldown` ago.
    pub(crate) fn begin_logout(&mut self, now: Instant, cooldown: Duration) -> bool {
        let cooling = self
            .last_logout_at
            .is_some_and(|last| now.saturating_duration_since(last) < cooldown);
        if cooling {
            return false;
        }
        self.last_logout_at = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logout_is_skipped_within_cooldown() {
        let mut session = AuthSession::default();
        let start = Instant::now();
        let cooldown = Duration::from_secs(5);

        assert!(session.begin_logout(start, cooldown));
        assert!(!session.begin_logout(start + Duration::from_secs(1), cooldown));
        assert!(!session.begin_logout(start + Duration::from_millis(4999), cooldown));
        assert!(session.begin_logout(start + Duration::from_secs(5), cooldown));
    }
}
