pub mod handlers;
pub mod routes;

use std::sync::Arc;

use crate::admission::AdmissionPipeline;
use crate::observability::HealthChecker;

#[derive(Clone)]
pub struct AppState {
    pub admission: Arc<AdmissionPipeline>,
    pub health: Arc<HealthChecker>,
}

pub use routes::build_router;
