use anyhow::Context;
use prometheus::{Encoder, IntCounterVec, Registry, TextEncoder};

#[derive(Clone)]
pub struct MetricsState {
    registry: Registry,
    pub resolver_requests_total: IntCounterVec,
    pub resolver_errors_total: IntCounterVec,
    pub data_entry_upserts_total: IntCounterVec,
    pub negotiation_rules_hit_total: IntCounterVec,
}

impl MetricsState {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let resolver_requests_total = IntCounterVec::new(
            prometheus::Opts::new("resolver_requests_total", "Resolver requests total"),
            &["route", "status"],
        )
        .context("create resolver_requests_total")?;
        let resolver_errors_total = IntCounterVec::new(
            prometheus::Opts::new("resolver_errors_total", "Resolver errors total"),
            &["kind"],
        )
        .context("create resolver_errors_total")?;
        let data_entry_upserts_total = IntCounterVec::new(
            prometheus::Opts::new("data_entry_upserts_total", "Data-Entry upserts total"),
            &["status"],
        )
        .context("create data_entry_upserts_total")?;
        let negotiation_rules_hit_total = IntCounterVec::new(
            prometheus::Opts::new(
                "resolver_negotiation_rules_hit_total",
                "Which content-negotiation fallback rule produced the final result",
            ),
            &["rule"],
        )
        .context("create negotiation_rules_hit_total")?;

        registry.register(Box::new(resolver_requests_total.clone())).context("register resolver_requests_total")?;
        registry.register(Box::new(resolver_errors_total.clone())).context("register resolver_errors_total")?;
        registry.register(Box::new(data_entry_upserts_total.clone())).context("register data_entry_upserts_total")?;
        registry
            .register(Box::new(negotiation_rules_hit_total.clone()))
            .context("register negotiation_rules_hit_total")?;

        Ok(Self {
            registry,
            resolver_requests_total,
            resolver_errors_total,
            data_entry_upserts_total,
            negotiation_rules_hit_total,
        })
    }

    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).context("encode metrics")?;
        String::from_utf8(buffer).context("metrics utf8")
    }
}
