//! Integration tests for telemetry initialization and item span helpers.

use seqload::telemetry::{TelemetryConfig, init_telemetry, item};

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process, so a second
    // initialization in the same binary may fail; both outcomes are fine.
    let config = TelemetryConfig {
        endpoint: None,
        service_name: "seqload-test".to_string(),
        log_level: "debug".to_string(),
    };
    if let Ok(guard) = init_telemetry(config) {
        guard.force_flush();
    }
}

#[test]
fn item_span_records_stages_and_outcome() {
    let span = item::start_item_span("USER001", 3);
    item::record_stage(&span, "01_Create_User", true, 12.5);
    item::record_stage(&span, "02_Get_User", false, 3.0);
    item::record_outcome(&span, "failure");
}
