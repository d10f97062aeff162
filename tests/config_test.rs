//! Configuration system tests.

use asserts_processor::core::{Config, ConfigBuilder, ProcessorError};
use std::io::Write;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert!(config.asserts_server.is_none());
    assert_eq!(config.receiver.grpc_port, 4317);
    assert_eq!(config.prometheus_exporter_port, 9465);
    assert_eq!(config.limit_per_request_per_service, 5);
    assert_eq!(config.trace_flush_interval().as_secs(), 30);
    assert_eq!(config.periodic_sampling_interval().as_secs(), 300);
}

#[test]
fn test_config_builder() {
    let config = ConfigBuilder::new()
        .endpoint("https://control.example.com")
        .env("prod")
        .site("eu-central-1")
        .latency_threshold(0.75)
        .limits(50, 3)
        .grpc_port(14317)
        .prometheus_port(0)
        .build()
        .unwrap();

    assert_eq!(config.asserts_server.unwrap().endpoint, "https://control.example.com");
    assert_eq!(config.asserts_env, "prod");
    assert_eq!(config.asserts_site, "eu-central-1");
    assert_eq!(config.sampling_latency_threshold_seconds, 0.75);
    assert_eq!(config.limit_per_service, 50);
    assert_eq!(config.limit_per_request_per_service, 3);
    assert_eq!(config.receiver.grpc_port, 14317);
}

#[test]
fn test_yaml_config() {
    let yaml = r#"
asserts_server:
  endpoint: https://control.example.com
  user: processor
  password: secret
asserts_env: staging
asserts_site: ap-south-1
request_context_regex:
  "shop#cart":
    - attr_name: http.url
      span_kind: Server
      regexp: "https?://[^/]+(/[^?]*).*"
      replacement: "$1"
error_type_configs:
  http.status_code:
    - value_match_regex: "5.."
      error_type: server_errors
attributes_as_metric_labels:
  - rpc.system
sampling_latency_threshold_seconds: 0.5
limit_per_service: 20
limit_per_request_per_service: 2
exporter:
  endpoint: http://collector:4317
"#;

    let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();

    let server = config.asserts_server.as_ref().unwrap();
    assert_eq!(server.user.as_deref(), Some("processor"));
    assert_eq!(server.password.as_deref(), Some("secret"));
    assert_eq!(config.asserts_env, "staging");
    assert_eq!(config.request_context_regex["shop#cart"][0].replacement, "$1");
    assert_eq!(config.error_type_configs["http.status_code"][0].error_type, "server_errors");
    assert_eq!(config.attributes_as_metric_labels, vec!["rpc.system".to_string()]);
    assert_eq!(config.limit_per_service, 20);
    assert_eq!(config.exporter.endpoint.as_deref(), Some("http://collector:4317"));

    // omitted fields keep their defaults
    assert_eq!(config.receiver.grpc_port, 4317);
    assert_eq!(config.threshold_sync_interval().as_secs(), 60);
}

#[test]
fn test_password_is_not_printed() {
    let config = ConfigBuilder::new()
        .from_yaml("asserts_server:\n  endpoint: http://cp\n  user: u\n  password: hunter2\n")
        .unwrap()
        .build()
        .unwrap();
    let debug = format!("{:?}", config);
    assert!(!debug.contains("hunter2"));
    assert!(!serde_json::to_string(&config).unwrap().contains("hunter2"));
}

#[test]
fn test_config_validation() {
    assert!(Config::default().validate().is_ok());

    // per-service limit below the per-request limit
    let result = ConfigBuilder::new().limits(2, 3).build();
    assert!(matches!(result, Err(ProcessorError::Config(_))));

    let result = ConfigBuilder::new().limits(0, 0).build();
    assert!(result.is_err());

    let result = ConfigBuilder::new().latency_threshold(0.0).build();
    assert!(result.is_err());

    let result = ConfigBuilder::new().latency_threshold(f64::NAN).build();
    assert!(result.is_err());

    let result = ConfigBuilder::new().endpoint("  ").build();
    assert!(result.is_err());
}

#[test]
fn test_invalid_rules_are_rejected() {
    let yaml = r#"
request_context_regex:
  default:
    - attr_name: http.url
      span_kind: Server
      regexp: "(unclosed"
"#;
    let result = ConfigBuilder::new().from_yaml(yaml).unwrap().build();
    assert!(matches!(result, Err(ProcessorError::InvalidRegex { .. })));

    let yaml = r#"
error_type_configs:
  http.status_code:
    - value_match_regex: "[5"
      error_type: server_errors
"#;
    let result = ConfigBuilder::new().from_yaml(yaml).unwrap().build();
    assert!(result.is_err());
}

#[test]
fn test_error_handling() {
    let result = ConfigBuilder::new().from_yaml("invalid: yaml: content: [");
    assert!(result.is_err());

    let result = ConfigBuilder::new().from_yaml("limit_per_service: not_a_number");
    assert!(result.is_err());
}

#[test]
fn test_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "asserts_env: qa\nprometheus_exporter_port: 0").unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.asserts_env, "qa");
    assert_eq!(config.prometheus_exporter_port, 0);
}

#[test]
fn test_remote_config_keeps_local_connection_settings() {
    let local = ConfigBuilder::new()
        .endpoint("https://control.example.com")
        .prometheus_port(19465)
        .forward_endpoint("http://collector:4317")
        .build()
        .unwrap();
    let remote: Config =
        serde_json::from_str(r#"{"asserts_env": "prod", "limit_per_service": 10, "prometheus_exporter_port": 1}"#)
            .unwrap();

    let merged = local.merge_remote(remote);
    assert_eq!(merged.asserts_env, "prod");
    assert_eq!(merged.limit_per_service, 10);
    assert_eq!(merged.prometheus_exporter_port, 19465);
    assert_eq!(merged.asserts_server, local.asserts_server);
    assert_eq!(merged.exporter, local.exporter);
}
