use opentelemetry::metrics::{Counter, Gauge, Meter};

/// OTel instruments for the reader. Created once at connect time and shared
/// by both loops. If no global meter provider is configured the instruments
/// are no-op.
pub struct Metrics {
    pub messages_received: Counter<u64>,
    pub messages_delivered: Counter<u64>,
    pub messages_acked: Counter<u64>,
    pub messages_nacked: Counter<u64>,
    pub visibility_refreshed: Counter<u64>,
    pub in_flight: Gauge<u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("esteira");
        Self::from_meter(&meter)
    }

    /// Create metrics from a specific meter (used in tests with an in-memory
    /// exporter).
    pub fn from_meter(meter: &Meter) -> Self {
        Self {
            messages_received: meter
                .u64_counter("esteira.messages.received")
                .with_description("Total messages received from the queue")
                .build(),
            messages_delivered: meter
                .u64_counter("esteira.messages.delivered")
                .with_description("Total messages handed to the consumer")
                .build(),
            messages_acked: meter
                .u64_counter("esteira.messages.acked")
                .with_description("Total messages acknowledged")
                .build(),
            messages_nacked: meter
                .u64_counter("esteira.messages.nacked")
                .with_description("Total messages negatively acknowledged")
                .build(),
            visibility_refreshed: meter
                .u64_counter("esteira.visibility.refreshed")
                .with_description("Total visibility extensions issued")
                .build(),
            in_flight: meter
                .u64_gauge("esteira.messages.in_flight")
                .with_description("Messages received but not yet acked or nacked")
                .build(),
        }
    }
}
