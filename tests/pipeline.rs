//! Cross-stage integration tests.
//!
//! # What this covers
//!
//! - **Envelope → parser → decoder** chains assembled through the registry
//!   from the same list form hosts pass in.
//! - **Routing**: one router serving several handlers, the way shippers tag
//!   records with `fields.handler` and `fields.collector`.
//! - **Dispositions**: drops and errors stop the chain; tolerated input passes
//!   through untouched.
//!
//! # Running
//!
//! ```sh
//! cargo test --test pipeline
//! RUST_LOG=debug cargo test --test pipeline -- --nocapture
//! ```

use lograft_core::{Error, Outcome, Processor, Record, Registry};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::{json, Value};

const ILOGTAIL_SERVERLOG: &str = r###"{"contents":{"content":"2023-09-18 11:32:58.511 ai-repair-common ai-repair-common-69685c846c-kr47m INFO [http-nio-8080-exec-1] com.jidu.postsale.config.LogAspect doAround [66] [4652dc92fb8240777ad468f1623aaaff] [f9567a128ed25419] request done##JIDU##{\"order\":{\"id\":\"42\"},\"cost\":12}##JIDU## tail"},"tags":{"container.ip":"10.80.224.116","k8s.namespace.name":"develop","k8s.node.ip":"10.80.11.20","log.file.path":"/app/logs/ai-repair-common/serverlog.log"},"time":1695007978}"###;

const FILEBEAT_TABLOG: &str = r#"{"@timestamp":"2023-09-27T10:55:53.798Z","log":{"file":{"path":"/var/log/app.log"},"offset":12},"message":"2023-09-27 18:55:53.798\tinfo\tnode-7\t{\"user\":\"{\\\"id\\\":7}\",\"action\":\"login\"}","fields":{"servicetype":"app"}}"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}

fn run(pipeline: Value, fields: Value) -> lograft_core::Result<Outcome> {
    init_tracing();
    Registry::builtin()
        .build_pipeline(&pipeline)
        .expect("pipeline config is valid")
        .run(Record::from_json(fields))
}

#[test]
fn ilogtail_service_log_end_to_end() {
    let out = run(
        json!([
            {"unwrap_envelope": {"kind": "ilogtail"}},
            {"parse_serverlog": {"time_field": "logtime"}},
        ]),
        json!({"message": ILOGTAIL_SERVERLOG, "input": {"type": "log"}}),
    )
    .unwrap()
    .into_record()
    .unwrap();

    assert_eq!(
        Value::Object(out.fields),
        json!({
            "namespace": "develop",
            "nodeip": "10.80.11.20",
            "podip": "10.80.224.116",
            "log": {"file": {"path": "/app/logs/ai-repair-common/serverlog.log"}},
            "logtime": "2023-09-18T03:32:58.511Z",
            "service": "ai-repair-common",
            "host": "ai-repair-common-69685c846c-kr47m",
            "level": "INFO",
            "thread": "http-nio-8080-exec-1",
            "class": "com.jidu.postsale.config.LogAspect",
            "method": "doAround",
            "line": 66,
            "trace_id": "4652dc92fb8240777ad468f1623aaaff",
            "span_id": "f9567a128ed25419",
            "message": r#"{"order":{"id":"42"},"cost":12}##JIDU## tail"#,
            "order": {"id": "42"},
            "cost": 12,
        })
    );
}

#[test]
fn filebeat_tab_log_with_json_message() {
    let out = run(
        json!([
            {"unwrap_envelope": {"kind": "filebeat"}},
            {"parse_filebeat_log": null},
            {"decode_json_fields": {"fields": ["message"], "max_depth": 2, "target": "payload"}},
        ]),
        json!({"message": FILEBEAT_TABLOG}),
    )
    .unwrap()
    .into_record()
    .unwrap();

    assert_eq!(out.fields["level"], json!("INFO"));
    assert_eq!(out.fields["host"], json!("node-7"));
    assert_eq!(out.fields["payload"], json!({"user": {"id": 7}, "action": "login"}));
    assert_eq!(out.get_value("log.file.path"), Some(&json!("/var/log/app.log")));
    assert_eq!(
        out.timestamp.map(|ts| ts.to_rfc3339()),
        Some("2023-09-27T10:55:53.798+00:00".to_string())
    );
}

#[test]
fn decoder_feeds_document_id_and_metadata() {
    let out = run(
        json!([{"decode_json_fields": {
            "fields": "msg",
            "target": "",
            "overwrite_keys": true,
            "document_id": "meta.id",
        }}]),
        json!({"msg": r#"{"@metadata":{"index":"logs-a"},"meta":{"id":"doc-9","k":1},"level":"warn"}"#}),
    )
    .unwrap()
    .into_record()
    .unwrap();

    assert_eq!(out.id(), Some("doc-9"));
    assert_eq!(out.metadata["index"], json!("logs-a"));
    assert_eq!(out.fields["meta"], json!({"k": 1}));
    assert_eq!(out.fields["level"], json!("warn"));
}

#[rstest]
#[case::benchmark_trace(
    json!([{"parse_serverlog": null}]),
    "2023-09-18 11:32:58.511 svc host info [t] C m [7] [00000000ffff] [def] hi"
)]
#[case::health_check(
    json!([{"parse_accesslog": null}]),
    "2023-09-20 15:46:18.052 gw host INFO [f.go] - h [1] [abc] [def] ##JIDU##\u{1f} request=/misc/ping"
)]
#[case::not_a_trace_line(
    json!([{"parse_vehicle_tracelog": null}]),
    "plain text"
)]
fn filtered_records_are_dropped(#[case] pipeline: Value, #[case] message: &str) {
    let out = run(
        pipeline,
        json!({
            "message": message,
            "log": {"file": {"path": "/v/a.log@ecu@vid@trace@1703159620000@1703160317000"}},
        }),
    )
    .unwrap();
    assert!(out.is_drop());
}

#[test]
fn drop_stops_later_stages() {
    let out = run(
        json!([
            {"parse_serverlog": null},
            {"decode_json_fields": {"fields": "message", "add_error_key": true}},
        ]),
        json!({"message": "too short"}),
    )
    .unwrap();
    assert_eq!(out, Outcome::Drop);
}

#[test]
fn strict_errors_surface_to_the_host() {
    let err = run(
        json!([
            {"unwrap_envelope": {"kind": "filebeat"}},
            {"parse_filebeat_log": null},
        ]),
        json!({"message": "not an envelope"}),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Decode(_)));

    let err = run(json!([{"parse_cdc_alog": null}]), json!({"other": 1})).unwrap_err();
    assert!(matches!(err, Error::MissingField { .. }));
}

#[test]
fn router_dispatches_by_handler_and_collector() {
    init_tracing();
    let registry = Registry::builtin();
    let router = registry
        .build_router(
            "fields.handler",
            &json!({
                "parse_serverlog": [
                    {"unwrap_envelope": {"kind_field": "fields.collector"}},
                    {"parse_serverlog": {"time_field": "logtime"}},
                ],
                "parse_filebeat_log": [
                    {"unwrap_envelope": {"kind_field": "fields.collector"}},
                    {"parse_filebeat_log": null},
                ],
            }),
        )
        .unwrap();
    assert_eq!(router.handlers(), vec!["parse_filebeat_log", "parse_serverlog"]);

    let service = router
        .run(Record::from_json(json!({
            "message": ILOGTAIL_SERVERLOG,
            "fields": {"handler": "parse_serverlog", "collector": "ilogtail"},
        })))
        .unwrap()
        .into_record()
        .unwrap();
    assert_eq!(service.fields["service"], json!("ai-repair-common"));
    assert_eq!(service.fields["namespace"], json!("develop"));

    let tab = router
        .run(Record::from_json(json!({
            "message": FILEBEAT_TABLOG,
            "fields": {"handler": "parse_filebeat_log", "collector": "filebeat"},
        })))
        .unwrap()
        .into_record()
        .unwrap();
    assert_eq!(tab.fields["host"], json!("node-7"));

    let other = Record::from_json(json!({"message": "x", "fields": {"handler": "nobody"}}));
    assert_eq!(router.run(other.clone()).unwrap(), Outcome::Continue(other));
}

#[test]
fn unknown_processor_fails_assembly() {
    let err = Registry::builtin()
        .build_pipeline(&json!([{"parse_syslog": null}]))
        .err()
        .unwrap();
    assert!(matches!(err, Error::Config { .. }));
}
