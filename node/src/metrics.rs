//! # Prometheus Metrics
//!
//! Operational metrics for the vault node, scraped by Prometheus at
//! `/metrics` on the metrics port.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] under the
//! `chequebook` namespace so they do not collide with the default global
//! registry.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use chequebook_contracts::VaultEvent;

/// Holds all Prometheus metric handles for the node.
///
/// prometheus handles are `Arc`s internally, so cloning is cheap.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Successful deposits.
    pub deposits_total: IntCounter,
    /// Successfully cashed cheques.
    pub cheques_cashed_total: IntCounter,
    /// Successful issuer withdrawals.
    pub withdrawals_total: IntCounter,
    /// Rejected calls, labelled by error kind.
    pub calls_rejected_total: IntCounterVec,
    /// Escrowed balance after the last accepted call.
    pub vault_balance: IntGauge,
    /// Sum of all cheque redemptions.
    pub total_paid_out: IntGauge,
    /// Time spent handling `POST /calls`, in seconds.
    pub call_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("chequebook".into()), None)
            .expect("failed to create prometheus registry");

        let deposits_total = IntCounter::new("deposits_total", "Total number of accepted deposits")
            .expect("metric creation");
        registry
            .register(Box::new(deposits_total.clone()))
            .expect("metric registration");

        let cheques_cashed_total =
            IntCounter::new("cheques_cashed_total", "Total number of cheques cashed")
                .expect("metric creation");
        registry
            .register(Box::new(cheques_cashed_total.clone()))
            .expect("metric registration");

        let withdrawals_total =
            IntCounter::new("withdrawals_total", "Total number of issuer withdrawals")
                .expect("metric creation");
        registry
            .register(Box::new(withdrawals_total.clone()))
            .expect("metric registration");

        let calls_rejected_total = IntCounterVec::new(
            Opts::new("calls_rejected_total", "Total number of rejected calls by reason"),
            &["reason"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(calls_rejected_total.clone()))
            .expect("metric registration");

        let vault_balance = IntGauge::new("vault_balance", "Value currently escrowed in the vault")
            .expect("metric creation");
        registry
            .register(Box::new(vault_balance.clone()))
            .expect("metric registration");

        let total_paid_out =
            IntGauge::new("total_paid_out", "Sum of all cheque redemptions to date")
                .expect("metric creation");
        registry
            .register(Box::new(total_paid_out.clone()))
            .expect("metric registration");

        let call_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "call_latency_seconds",
                "Signed call handling latency in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(call_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            deposits_total,
            cheques_cashed_total,
            withdrawals_total,
            calls_rejected_total,
            vault_balance,
            total_paid_out,
            call_latency_seconds,
        }
    }

    /// Seed the gauges from a vault loaded at startup.
    pub fn observe_totals(&self, balance: u64, paid_out: u64) {
        self.vault_balance.set(clamp(balance));
        self.total_paid_out.set(clamp(paid_out));
    }

    /// Record an accepted call.
    pub fn observe_event(&self, event: &VaultEvent) {
        match event {
            VaultEvent::Deposited { total_balance, .. } => {
                self.deposits_total.inc();
                self.vault_balance.set(clamp(*total_balance));
            }
            VaultEvent::ChequeCashed {
                total_balance,
                total_paid_out,
                ..
            } => {
                self.cheques_cashed_total.inc();
                self.observe_totals(*total_balance, *total_paid_out);
            }
            VaultEvent::Withdrawn { total_balance, .. } => {
                self.withdrawals_total.inc();
                self.vault_balance.set(clamp(*total_balance));
            }
        }
    }

    /// Record a rejected call.
    pub fn observe_rejection(&self, reason: &str) {
        self.calls_rejected_total.with_label_values(&[reason]).inc();
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Gauges are `i64`; amounts are `u64`.
fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Shared metrics handle passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
