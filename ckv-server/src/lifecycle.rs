//! # Connection Lifecycle
//!
//! Hooks the transport calls at admission, closure and detach. Admission is a
//! pure yes/no question; closure and detach are observation points.

use std::sync::Arc;

use tracing::{debug, info};

use crate::connection::PeerInfo;
use crate::error::TransportError;
use crate::metrics::Metrics;

/// Callbacks invoked by the transport for every connection.
pub trait ConnectionHooks: Send + Sync {
    /// Decides whether a new connection is admitted. Must not have side effects.
    fn accept(&self, peer: &PeerInfo) -> bool;

    /// A connection owned by the dispatch loop ended. `cause` is `None` for a
    /// clean close (client EOF or `quit`).
    fn closed(&self, peer: &PeerInfo, cause: Option<&TransportError>);

    /// A connection left the dispatch loop for a detached handler.
    fn detached(&self, peer: &PeerInfo);
}

/// Default hooks: optional cap on live connections, structured logs.
pub struct LifecycleManager {
    max_connections: Option<u64>,
    metrics: Arc<Metrics>,
}

impl LifecycleManager {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        LifecycleManager {
            max_connections: None,
            metrics,
        }
    }

    /// Denies new connections once `max` are live.
    pub fn with_max_connections(mut self, max: Option<u64>) -> Self {
        self.max_connections = max;
        self
    }
}

impl ConnectionHooks for LifecycleManager {
    fn accept(&self, peer: &PeerInfo) -> bool {
        let open = self.metrics.open_connections();
        let admitted = self.max_connections.is_none_or(|max| open < max);
        if admitted {
            debug!(%peer, open, "accept");
        } else {
            info!(%peer, open, max = ?self.max_connections, "connection denied");
        }
        admitted
    }

    fn closed(&self, peer: &PeerInfo, cause: Option<&TransportError>) {
        match cause {
            None => debug!(%peer, "closed"),
            Some(err) => info!(%peer, error = %err, category = ?err.category(), "closed"),
        }
    }

    fn detached(&self, peer: &PeerInfo) {
        debug!(%peer, "left the dispatch loop");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_everything_without_a_cap() {
        let metrics = Arc::new(Metrics::new());
        for _ in 0..100 {
            metrics.record_accepted();
        }
        let hooks = LifecycleManager::new(metrics);
        assert!(hooks.accept(&PeerInfo::new(1, None)));
    }

    #[test]
    fn denies_at_the_cap_without_side_effects() {
        let metrics = Arc::new(Metrics::new());
        let hooks = LifecycleManager::new(Arc::clone(&metrics)).with_max_connections(Some(1));
        let peer = PeerInfo::new(1, None);

        assert!(hooks.accept(&peer));
        assert!(hooks.accept(&peer));
        assert_eq!(metrics.snapshot().connections.accepted, 0);

        metrics.record_accepted();
        assert!(!hooks.accept(&peer));

        metrics.record_closed();
        assert!(hooks.accept(&peer));
    }
}
