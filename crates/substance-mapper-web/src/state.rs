//! Shared application state.
//!
//! The mapping service (encoder + index) is constructed once in `main`
//! and shared read-only across requests; the optional store handle is
//! used by the review endpoints.

use std::sync::Arc;
use substance_mapper::{CertificationStore, MappingService};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MappingService>,
    pub store: Option<Arc<dyn CertificationStore>>,
}

impl AppState {
    pub fn new(service: Arc<MappingService>, store: Option<Arc<dyn CertificationStore>>) -> Self {
        Self { service, store }
    }
}
