use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};

/// Engine counters, exported in the Prometheus text format.
pub struct EngineMetrics {
    registry: Registry,
    pub bookings_created: IntCounter,
    pub bookings_cancelled: IntCounter,
    pub trips_scheduled: IntCounter,
    pub trips_cancelled: IntCounter,
    pub repricing_adjustments: IntCounter,
    pub ledger_rejections: IntCounter,
    pub calendar_degraded: IntCounter,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            let counter = IntCounter::with_opts(Opts::new(name, help).namespace("shuttle"))?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        Ok(Self {
            bookings_created: counter("bookings_created_total", "Bookings confirmed")?,
            bookings_cancelled: counter("bookings_cancelled_total", "Bookings cancelled")?,
            trips_scheduled: counter("trips_scheduled_total", "Trips scheduled")?,
            trips_cancelled: counter("trips_cancelled_total", "Trips cancelled by an operator")?,
            repricing_adjustments: counter(
                "repricing_adjustments_total",
                "Existing bookings settled to a new per-passenger rate",
            )?,
            ledger_rejections: counter(
                "ledger_rejections_total",
                "Mutations aborted for insufficient credits",
            )?,
            calendar_degraded: counter(
                "calendar_degraded_total",
                "Availability or scheduling checks made without the external calendar",
            )?,
            registry,
        })
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
