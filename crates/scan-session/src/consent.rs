//! Consent Oracle

/// Reports whether data collection is currently authorized
pub trait ConsentOracle: Send + Sync {
    fn has_valid_consent(&self) -> bool;
}

/// Fixed answer, for tests and non-research deployments
#[derive(Debug, Clone, Copy)]
pub struct StaticConsent(pub bool);

impl ConsentOracle for StaticConsent {
    fn has_valid_consent(&self) -> bool {
        self.0
    }
}

impl<F> ConsentOracle for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn has_valid_consent(&self) -> bool {
        self()
    }
}
