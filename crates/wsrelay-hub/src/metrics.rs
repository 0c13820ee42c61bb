//! Metric names recorded by the relay engine.
//!
//! Recorded through the `metrics` facade; they cost nothing until a
//! recorder is installed.

/// Relay connections registered (counter).
pub const CONNECTIONS_OPENED_TOTAL: &str = "relay_connections_opened_total";
/// Relay connections torn down (counter, labels: cause).
pub const CONNECTIONS_CLOSED_TOTAL: &str = "relay_connections_closed_total";
/// Relay connections currently registered (gauge).
pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Connection lifetime in seconds (histogram).
pub const CONNECTION_DURATION_SECONDS: &str = "relay_connection_duration_seconds";
/// Complete messages read from sources (counter).
pub const MESSAGES_RECEIVED_TOTAL: &str = "relay_messages_received_total";
/// Messages queued into a peer mailbox (counter).
pub const DELIVERIES_QUEUED_TOTAL: &str = "relay_deliveries_queued_total";
/// Messages dropped at a peer mailbox (counter, labels: reason).
pub const DELIVERIES_DROPPED_TOTAL: &str = "relay_deliveries_dropped_total";
/// Messages written to a socket (counter).
pub const MESSAGES_SENT_TOTAL: &str = "relay_messages_sent_total";
/// Socket writes that failed (counter).
pub const SEND_FAILURES_TOTAL: &str = "relay_send_failures_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_prefixed_snake_case() {
        let names = [
            CONNECTIONS_OPENED_TOTAL,
            CONNECTIONS_CLOSED_TOTAL,
            CONNECTIONS_ACTIVE,
            CONNECTION_DURATION_SECONDS,
            MESSAGES_RECEIVED_TOTAL,
            DELIVERIES_QUEUED_TOTAL,
            DELIVERIES_DROPPED_TOTAL,
            MESSAGES_SENT_TOTAL,
            SEND_FAILURES_TOTAL,
        ];
        for name in names {
            assert!(name.starts_with("relay_"), "{name}");
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name}"
            );
        }
    }
}
