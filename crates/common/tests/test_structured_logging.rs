use common::{
    init_structured_logging, ExecutionContext, LoggingConfig, OperationTimer, PerformanceMetrics,
    StructuredLogEntry,
};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_structured_log_entry_round_trip() {
    let mut fields = HashMap::new();
    fields.insert("strategy_id".to_string(), Value::from("renderer-reduce-quality"));

    let entry = StructuredLogEntry {
        timestamp: chrono::Utc::now().to_rfc3339(),
        level: "INFO".to_string(),
        target: "resilience::recovery::executor".to_string(),
        message: "Recovery attempt succeeded".to_string(),
        fields,
        context: None,
        performance: Some(PerformanceMetrics {
            duration_ms: Some(42),
            attempts: Some(1),
            timeout_ms: None,
        }),
    };

    let json = serde_json::to_string(&entry).unwrap();
    assert!(!json.contains("\"context\""));

    let parsed: StructuredLogEntry = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.message, "Recovery attempt succeeded");
    assert_eq!(
        parsed.fields.get("strategy_id"),
        Some(&Value::from("renderer-reduce-quality"))
    );
    assert_eq!(parsed.performance.and_then(|p| p.duration_ms), Some(42));
}

#[test]
fn test_execution_context_defaults() {
    let context = ExecutionContext::default();
    assert_eq!(context.pid, std::process::id());
    assert!(!context.hostname.is_empty());
    assert!(!context.app_version.is_empty());
}

#[test]
fn test_logging_config_from_verbosity() {
    assert_eq!(LoggingConfig::from_verbosity(0).level, Level::WARN);
    assert_eq!(LoggingConfig::from_verbosity(1).level, Level::INFO);
    assert_eq!(LoggingConfig::from_verbosity(2).level, Level::DEBUG);
    assert_eq!(LoggingConfig::from_verbosity(9).level, Level::TRACE);

    let json = LoggingConfig::from_verbosity(1).json(true);
    assert!(json.json_output);
}

#[test]
fn test_operation_timer_success_and_failure() {
    let mut timer = OperationTimer::new("health_check.renderer");
    timer.add_field("component", "renderer");
    std::thread::sleep(Duration::from_millis(10));
    assert!(timer.elapsed() >= Duration::from_millis(10));

    let ok: Result<u32, String> = Ok(1);
    assert!(timer.finish_with_result(&ok) >= Duration::from_millis(10));

    let timer = OperationTimer::new("health_check.network");
    assert_eq!(timer.operation_name(), "health_check.network");
    let _ = timer.finish();
}

#[test]
fn test_init_structured_logging_second_call_fails() {
    let config = LoggingConfig::from_verbosity(0);
    // Another test binary thread may have set a subscriber first; only the
    // second call here is guaranteed to fail.
    let _ = init_structured_logging(config.clone());
    assert!(init_structured_logging(config).is_err());
}
