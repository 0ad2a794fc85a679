use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::AppConfig;
use crate::services::{HealthCheckService, ProductService, ReservationService, StorageService};

#[derive(Clone)]
pub struct AppState {
    pub health_check_service: Arc<dyn HealthCheckService>,
    pub storage_service: Arc<StorageService>,
    pub product_service: Arc<ProductService>,
    pub reservation_service: Arc<ReservationService>,
    pub config: AppConfig,
    pub start_time: Instant,
    pub metrics_handle: Option<PrometheusHandle>,
}
