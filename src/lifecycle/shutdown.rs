//! Programmatic shutdown requests.

use tokio::sync::broadcast;

use crate::lifecycle::signals::TerminationSignals;

/// Requests shutdown of one or more servers without an OS signal.
///
/// Each server run takes its own [`TerminationSignals`] from
/// [`Shutdown::termination`]; a trigger reaches every one of them. Dropping
/// every handle leaves those sources pending rather than firing.
#[derive(Debug, Clone)]
pub struct Shutdown {
    requests: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (requests, _) = broadcast::channel(1);
        Self { requests }
    }

    /// A termination source that fires on every [`Shutdown::trigger`].
    pub fn termination(&self) -> TerminationSignals {
        TerminationSignals::requested(self.requests.subscribe())
    }

    /// Ask every subscribed server to drain. Returns how many were reached.
    pub fn trigger(&self) -> usize {
        self.requests.send(()).unwrap_or(0)
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Termination;

    #[test]
    fn trigger_without_servers_reaches_none() {
        assert_eq!(Shutdown::new().trigger(), 0);
    }

    #[tokio::test]
    async fn clones_share_one_channel() {
        let shutdown = Shutdown::new();
        let mut first = shutdown.termination();
        let mut second = shutdown.clone().termination();

        assert_eq!(shutdown.clone().trigger(), 2);
        assert_eq!(first.recv().await, Termination::Requested);
        assert_eq!(second.recv().await, Termination::Requested);
    }
}
