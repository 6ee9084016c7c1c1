use prometheus::{IntCounter, Registry, TextEncoder};

/// Booking counters exposed at `GET /metrics`.
pub struct ApiMetrics {
    registry: Registry,
    pub reservations_created: IntCounter,
    pub reservation_conflicts: IntCounter,
    pub cancellations: IntCounter,
    pub token_verification_failures: IntCounter,
}

impl ApiMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reservations_created = IntCounter::new(
            "innkeep_reservations_created_total",
            "Reservations committed to the ledger",
        )?;
        let reservation_conflicts = IntCounter::new(
            "innkeep_reservation_conflicts_total",
            "Creation attempts rejected because the dates were taken",
        )?;
        let cancellations = IntCounter::new(
            "innkeep_cancellations_total",
            "Guest cancellation calls that returned an outcome",
        )?;
        let token_verification_failures = IntCounter::new(
            "innkeep_token_verification_failures_total",
            "Guest access requests refused",
        )?;

        registry.register(Box::new(reservations_created.clone()))?;
        registry.register(Box::new(reservation_conflicts.clone()))?;
        registry.register(Box::new(cancellations.clone()))?;
        registry.register(Box::new(token_verification_failures.clone()))?;

        Ok(Self {
            registry,
            reservations_created,
            reservation_conflicts,
            cancellations,
            token_verification_failures,
        })
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        let metrics = ApiMetrics::new().unwrap();
        metrics.reservations_created.inc();
        let text = metrics.render().unwrap();
        assert!(text.contains("innkeep_reservations_created_total 1"));
        assert!(text.contains("innkeep_token_verification_failures_total 0"));
    }
}
