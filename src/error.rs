use crate::ledger::LedgerError;
use crate::store::StoreError;
use std::fmt;

/// Errors surfaced by the monitoring service and its components
#[derive(Debug)]
pub enum MonitorError {
    Ledger(LedgerError),
    Store(StoreError),
    /// The service is not running; only `start()` is accepted
    NotRunning,
}

impl MonitorError {
    /// Upstream hiccup the next cycle may recover from
    pub fn is_transient(&self) -> bool {
        match self {
            MonitorError::Ledger(e) => e.is_transient(),
            MonitorError::Store(_) | MonitorError::NotRunning => false,
        }
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Ledger(e) => write!(f, "Ledger error: {}", e),
            MonitorError::Store(e) => write!(f, "Store error: {}", e),
            MonitorError::NotRunning => write!(f, "Monitoring service is not running"),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Ledger(e) => Some(e),
            MonitorError::Store(e) => Some(e),
            MonitorError::NotRunning => None,
        }
    }
}

impl From<LedgerError> for MonitorError {
    fn from(err: LedgerError) -> Self {
        MonitorError::Ledger(err)
    }
}

impl From<StoreError> for MonitorError {
    fn from(err: StoreError) -> Self {
        MonitorError::Store(err)
    }
}
