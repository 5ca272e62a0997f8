//! Controller metrics, exposed over a small `warp` HTTP endpoint the same way the
//! teacher's scheduler crate exposes Prometheus metrics.

#![cfg(feature = "prometheus-metrics")]

use std::sync::Arc;

use hyper::header::CONTENT_TYPE;
use once_cell::sync::OnceCell;
use prometheus::{
    register_counter_with_registry, register_gauge_with_registry, Counter, Gauge, Registry,
};
use prometheus::{Encoder, TextEncoder};
use warp::Reply;

use crate::error::{MackenzieError, Result};

pub trait ControllerMetricsCollector: Send + Sync {
    fn record_task_added(&self);
    fn record_task_completed(&self);
    fn record_task_failed(&self);
    fn set_pending_tasks(&self, value: u64);
    fn set_assigned_tasks(&self, value: u64);
}

pub struct PrometheusMetricsCollector {
    tasks_added: Counter,
    tasks_completed: Counter,
    tasks_failed: Counter,
    pending_tasks: Gauge,
    assigned_tasks: Gauge,
}

static COLLECTOR: OnceCell<Arc<dyn ControllerMetricsCollector>> = OnceCell::new();

impl PrometheusMetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let wrap = |e: prometheus::Error| MackenzieError::Transient(format!("registering metric: {e}"));

        Ok(Self {
            tasks_added: register_counter_with_registry!(
                "mackenzie_tasks_added_total",
                "Counter of tasks added to the controller queue",
                registry
            )
            .map_err(wrap)?,
            tasks_completed: register_counter_with_registry!(
                "mackenzie_tasks_completed_total",
                "Counter of tasks marked completed",
                registry
            )
            .map_err(wrap)?,
            tasks_failed: register_counter_with_registry!(
                "mackenzie_tasks_failed_total",
                "Counter of tasks marked failed",
                registry
            )
            .map_err(wrap)?,
            pending_tasks: register_gauge_with_registry!(
                "mackenzie_pending_tasks",
                "Number of tasks currently available for assignment",
                registry
            )
            .map_err(wrap)?,
            assigned_tasks: register_gauge_with_registry!(
                "mackenzie_assigned_tasks",
                "Number of tasks currently assigned to an agent",
                registry
            )
            .map_err(wrap)?,
        })
    }

    pub fn current() -> Result<Arc<dyn ControllerMetricsCollector>> {
        COLLECTOR
            .get_or_try_init(|| {
                let collector = Self::new(prometheus::default_registry())?;
                Ok(Arc::new(collector) as Arc<dyn ControllerMetricsCollector>)
            })
            .map(Arc::clone)
    }
}

impl ControllerMetricsCollector for PrometheusMetricsCollector {
    fn record_task_added(&self) {
        self.tasks_added.inc();
    }

    fn record_task_completed(&self) {
        self.tasks_completed.inc();
    }

    fn record_task_failed(&self) {
        self.tasks_failed.inc();
    }

    fn set_pending_tasks(&self, value: u64) {
        self.pending_tasks.set(value as f64);
    }

    fn set_assigned_tasks(&self, value: u64) {
        self.assigned_tasks.set(value as f64);
    }
}

pub fn get_metrics() -> Result<impl Reply> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| MackenzieError::Transient(format!("encoding metrics: {e}")))?;
    Ok(warp::reply::with_header(
        buffer,
        CONTENT_TYPE,
        encoder.format_type(),
    ))
}
