use async_trait::async_trait;

/// Decides whether enterprise features, StackConfigPolicy included, may be used.
#[async_trait]
pub trait LicenseChecker: Send + Sync {
    async fn enterprise_features_enabled(&self) -> bool;
}

/// License state fixed at startup from `ENTERPRISE_FEATURES_ENABLED`
#[derive(Debug, Clone, Copy)]
pub struct StaticLicenseChecker {
    pub enabled: bool,
}

#[async_trait]
impl LicenseChecker for StaticLicenseChecker {
    async fn enterprise_features_enabled(&self) -> bool {
        self.enabled
    }
}
