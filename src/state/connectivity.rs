use tokio::time::Instant;

/// Link and session flags plus the time of the last successful data publish.
///
/// A session can only be up over an established link: marking the link
/// down drops the session with it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectivityState {
    link_up: bool,
    session_up: bool,
    last_publish: Option<Instant>,
}

impl ConnectivityState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link_up(&self) -> bool {
        self.link_up
    }

    pub fn session_up(&self) -> bool {
        self.session_up
    }

    pub fn last_publish(&self) -> Option<Instant> {
        self.last_publish
    }

    pub fn mark_link_up(&mut self) {
        self.link_up = true;
    }

    pub fn mark_link_down(&mut self) {
        self.link_up = false;
        self.session_up = false;
    }

    /// Returns false (and leaves the session down) when the link is down
    pub fn mark_session_up(&mut self) -> bool {
        if self.link_up {
            self.session_up = true;
        }
        self.session_up
    }

    pub fn mark_session_down(&mut self) {
        self.session_up = false;
    }

    pub(crate) fn record_publish(&mut self, at: Instant) {
        self.last_publish = Some(at);
    }
}
