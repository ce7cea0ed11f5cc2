//! Gateway shared state.

use std::sync::Arc;

use preceptor_core::config::Config;
use preceptor_rtc::TokenIssuer;
use preceptor_session::SessionRegistry;

/// Shared state accessible from all handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    /// Standalone issuer for the token endpoint; session starts issue
    /// through the registry.
    pub issuer: TokenIssuer,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, registry: Arc<SessionRegistry>, issuer: TokenIssuer) -> Self {
        Self {
            config,
            registry,
            issuer,
        }
    }
}
