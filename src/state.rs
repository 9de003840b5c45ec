//! Shared application state.

use std::sync::Arc;

use crate::config::WebhookPolicy;
use crate::gateway::GatewayClient;
use crate::services::reconciliation::Reconciler;
use crate::services::signature::SignatureVerifier;
use crate::store::PaymentStore;

/// Everything a handler needs, built once in `main` and cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PaymentStore>,
    pub gateway: Arc<dyn GatewayClient>,
    pub reconciler: Arc<Reconciler>,
    pub verifier: Arc<SignatureVerifier>,
    pub policy: Arc<WebhookPolicy>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn GatewayClient>,
        verifier: SignatureVerifier,
        policy: WebhookPolicy,
    ) -> Self {
        Self {
            reconciler: Arc::new(Reconciler::new(store.clone())),
            store,
            gateway,
            verifier: Arc::new(verifier),
            policy: Arc::new(policy),
        }
    }
}
