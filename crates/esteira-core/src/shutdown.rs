use tokio_util::sync::CancellationToken;

/// Two-phase shutdown coordinator shared by the reader, its loops, and any
/// `Acker` still held by a consumer.
///
/// The soft token asks the loops to drain and exit; the hard token cuts off
/// the remote calls that are still allowed during the drain (final deletes
/// and visibility resets). The stopped token fires once both loops have
/// exited. Cancelling hard implies soft.
#[derive(Debug, Clone, Default)]
pub(crate) struct Signaller {
    soft: CancellationToken,
    hard: CancellationToken,
    stopped: CancellationToken,
}

impl Signaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn soft_stop(&self) {
        self.soft.cancel();
    }

    pub fn hard_stop(&self) {
        self.soft.cancel();
        self.hard.cancel();
    }

    pub fn mark_stopped(&self) {
        self.stopped.cancel();
    }

    pub fn soft(&self) -> &CancellationToken {
        &self.soft
    }

    pub fn hard(&self) -> &CancellationToken {
        &self.hard
    }

    pub fn stopped(&self) -> &CancellationToken {
        &self.stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_independent_until_triggered() {
        let signaller = Signaller::new();
        assert!(!signaller.soft().is_cancelled());
        assert!(!signaller.hard().is_cancelled());
        assert!(!signaller.stopped().is_cancelled());

        signaller.soft_stop();
        assert!(signaller.soft().is_cancelled());
        assert!(!signaller.hard().is_cancelled());
    }

    #[test]
    fn hard_stop_implies_soft_stop() {
        let signaller = Signaller::new();
        signaller.hard_stop();
        assert!(signaller.soft().is_cancelled());
        assert!(signaller.hard().is_cancelled());
        assert!(!signaller.stopped().is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let signaller = Signaller::new();
        let other = signaller.clone();
        other.mark_stopped();
        assert!(signaller.stopped().is_cancelled());
    }
}
