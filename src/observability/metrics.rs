use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub eta_calculations_total: IntCounterVec,
    pub eta_calculation_latency_seconds: HistogramVec,
    pub eta_writes_total: IntCounterVec,
    pub eta_push_clients: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let eta_calculations_total = IntCounterVec::new(
            Opts::new("eta_calculations_total", "ETA calculations by result code"),
            &["code"],
        )
        .expect("valid eta_calculations_total metric");

        let eta_calculation_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "eta_calculation_latency_seconds",
                "Latency of ETA calculations in seconds",
            ),
            &["outcome"],
        )
        .expect("valid eta_calculation_latency_seconds metric");

        let eta_writes_total = IntCounterVec::new(
            Opts::new("eta_writes_total", "ETA writes to the order store by result"),
            &["result"],
        )
        .expect("valid eta_writes_total metric");

        let eta_push_clients =
            IntGauge::new("eta_push_clients", "Open websocket ETA push subscribers")
                .expect("valid eta_push_clients metric");

        registry
            .register(Box::new(eta_calculations_total.clone()))
            .expect("register eta_calculations_total");
        registry
            .register(Box::new(eta_calculation_latency_seconds.clone()))
            .expect("register eta_calculation_latency_seconds");
        registry
            .register(Box::new(eta_writes_total.clone()))
            .expect("register eta_writes_total");
        registry
            .register(Box::new(eta_push_clients.clone()))
            .expect("register eta_push_clients");

        Self {
            registry,
            eta_calculations_total,
            eta_calculation_latency_seconds,
            eta_writes_total,
            eta_push_clients,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
