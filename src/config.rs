use chrono::Duration;

/// Tunables of the payment engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Currency assigned to payments created without one.
    pub default_currency: String,
    /// How long a payment attempt may stay processing before the sweep asks
    /// the channel about it.
    pub payment_expiry: Duration,
    /// Minimum age of a processing refund (or of a payment attempt without
    /// expiry) before the sweep overrides it with the channel's answer.
    pub reconciliation_grace: Duration,
    /// Interval of the periodic reconciliation sweep.
    pub sweep_interval: std::time::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_currency: "CNY".to_string(),
            payment_expiry: Duration::minutes(30),
            reconciliation_grace: Duration::minutes(5),
            sweep_interval: std::time::Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    pub fn with_payment_expiry_minutes(mut self, minutes: i64) -> Self {
        self.payment_expiry = Duration::minutes(minutes);
        self
    }

    pub fn with_reconciliation_grace_minutes(mut self, minutes: i64) -> Self {
        self.reconciliation_grace = Duration::minutes(minutes);
        self
    }
}
