//! Agent facade tests.

pub(crate) mod helpers;

use std::sync::Arc;
use std::thread;

use http::{Method, StatusCode, Uri};

use self::helpers::{LICENSE_KEY, LOCAL_COLLECTOR, RecordingBackend};
use super::Agent;
use crate::backend::{BackendKind, Handle, HandleKind, SaasAdapter};
use crate::config::Config;
use crate::datastore::DataStoreSegment;
use crate::web::{ResponseWriter, WebRequest};
use crate::Error;

fn saas_config() -> Config {
    Config::new()
        .with_app_name("iam")
        .with_license_key(LICENSE_KEY)
        .with_server_url(LOCAL_COLLECTOR)
}

fn self_hosted_config() -> Config {
    Config::new()
        .with_service_name("users-api")
        .with_server_url(LOCAL_COLLECTOR)
}

fn enabled_agents() -> Vec<Agent> {
    vec![
        Agent::new(BackendKind::Saas, true, saas_config()).unwrap(),
        Agent::new(BackendKind::SelfHosted, true, self_hosted_config()).unwrap(),
    ]
}

#[test]
fn test_disabled_agent_is_silent() {
    for kind in [BackendKind::Saas, BackendKind::SelfHosted] {
        let agent = Agent::new(kind, false, Config::new()).unwrap();
        assert!(!agent.is_enabled());
        assert!(agent.backend_kind().is_none());

        let garbage = Handle::opaque("not-a-handle");
        let err = std::io::Error::other("ignored");

        assert!(agent.start_transaction("x").unwrap().is_none());
        assert!(
            agent
                .start_web_transaction("x", None, &WebRequest::default())
                .unwrap()
                .is_none()
        );
        assert!(agent.start_segment(&garbage, "s").unwrap().is_none());
        assert!(
            agent
                .start_data_store_segment(&Handle::none(), &DataStoreSegment::default())
                .unwrap()
                .is_none()
        );
        assert!(agent.start_external_segment(&garbage, "::bad::").unwrap().is_none());
        assert!(
            agent
                .start_external_web_segment(&garbage, &WebRequest::default())
                .unwrap()
                .is_none()
        );

        agent.end_transaction(&garbage, Some(&err)).unwrap();
        agent.end_segment(&Handle::none()).unwrap();
        agent.end_data_store_segment(&garbage).unwrap();
        agent.end_external_segment(&garbage).unwrap();
        agent.notice_error(&Handle::none(), &err).unwrap();
        agent.add_attribute(&garbage, "k", "v").unwrap();
        agent.flush().unwrap();
        agent.shutdown().unwrap();
    }
}

#[test]
fn test_saas_requires_credentials_only_when_enabled() {
    let err = Agent::new(BackendKind::Saas, true, Config::new()).unwrap_err();
    assert!(matches!(
        err,
        Error::BackendInit {
            backend: BackendKind::Saas,
            ..
        }
    ));

    let agent = Agent::new(BackendKind::Saas, false, Config::new()).unwrap();
    let txn = agent.start_transaction("x").unwrap();
    assert!(txn.is_none());
}

#[test]
fn test_unsupported_backend_name() {
    for enabled in [true, false] {
        for config in [Config::new(), saas_config(), self_hosted_config()] {
            assert!(matches!(
                Agent::from_kind_name("", enabled, config.clone()),
                Err(Error::UnsupportedBackend(_))
            ));
            assert!(matches!(
                Agent::from_kind_name("zipkin", enabled, config),
                Err(Error::UnsupportedBackend(_))
            ));
        }
    }

    let agent = Agent::from_kind_name("Elastic", true, self_hosted_config()).unwrap();
    assert_eq!(agent.backend_kind(), Some(BackendKind::SelfHosted));
    assert_eq!(agent.app_name(), "users-api");
}

#[test]
fn test_end_transaction_handle_validation() {
    let err = std::io::Error::other("request failed");
    for agent in enabled_agents() {
        assert!(matches!(
            agent.end_transaction(&Handle::none(), Some(&err)),
            Err(Error::MissingHandle {
                expected: HandleKind::Transaction
            })
        ));
        assert!(matches!(
            agent.end_transaction(&Handle::opaque("not-a-handle"), Some(&err)),
            Err(Error::InvalidHandle {
                expected: HandleKind::Transaction,
                ..
            })
        ));
    }
}

#[test]
fn test_transaction_round_trip() {
    for agent in enabled_agents() {
        let txn = agent.start_transaction("/user").unwrap();
        assert!(txn.is_some());
        agent.end_transaction(&txn, None).unwrap();
    }
}

#[test]
fn test_data_store_scenario() {
    for agent in enabled_agents() {
        let h1 = agent.start_transaction("/user").unwrap();
        let h2 = agent
            .start_data_store_segment(&h1, &DataStoreSegment::new("Mongo", "find", "tblUsers"))
            .unwrap();
        agent.end_data_store_segment(&h2).unwrap();
        agent.end_transaction(&h1, None).unwrap();
    }
}

#[test]
fn test_segment_from_other_instance_fails() {
    let first = Agent::new(BackendKind::Saas, true, saas_config()).unwrap();
    let second = Agent::new(BackendKind::Saas, true, saas_config()).unwrap();
    let other_kind = Agent::new(BackendKind::SelfHosted, true, self_hosted_config()).unwrap();

    let txn = first.start_transaction("/user").unwrap();
    assert!(matches!(
        second.start_segment(&txn, "hash"),
        Err(Error::InvalidHandle { .. })
    ));
    assert!(matches!(
        other_kind.start_segment(&txn, "hash"),
        Err(Error::InvalidHandle { .. })
    ));

    let segment = first.start_segment(&txn, "hash").unwrap();
    first.end_segment(&segment).unwrap();
    first.end_transaction(&txn, None).unwrap();
}

#[test]
fn test_segment_handle_kinds_are_distinct() {
    for agent in enabled_agents() {
        let txn = agent.start_transaction("/user").unwrap();
        let external = agent
            .start_external_segment(&txn, "https://billing.example.com/invoices")
            .unwrap();

        assert!(matches!(
            agent.end_segment(&external),
            Err(Error::InvalidHandle {
                expected: HandleKind::Segment,
                ..
            })
        ));
        assert!(matches!(
            agent.notice_error(&external, &std::io::Error::other("x")),
            Err(Error::InvalidHandle {
                expected: HandleKind::Transaction,
                ..
            })
        ));
        assert!(matches!(
            agent.end_external_segment(&Handle::none()),
            Err(Error::MissingHandle {
                expected: HandleKind::ExternalSegment
            })
        ));

        agent.end_external_segment(&external).unwrap();
        agent.end_transaction(&txn, None).unwrap();
    }
}

#[test]
fn test_web_transaction_with_writer_and_outbound_call() {
    for agent in enabled_agents() {
        let writer = ResponseWriter::new();
        let request = WebRequest::new(Method::GET, Uri::from_static("https://iam.example.com/users"));

        let txn = agent
            .start_web_transaction("/users", Some(&writer), &request)
            .unwrap();
        agent.add_attribute(&txn, "feature", "iam.manage.user.r").unwrap();
        agent.add_attribute(&txn, "retries", 2i64).unwrap();

        let outbound = agent
            .start_external_web_segment(
                &txn,
                &WebRequest::new(Method::POST, Uri::from_static("http://billing:9000/charge")),
            )
            .unwrap();
        agent.end_external_segment(&outbound).unwrap();

        writer.write_status(StatusCode::INTERNAL_SERVER_ERROR);
        agent.end_transaction(&txn, None).unwrap();
    }
}

#[test]
fn test_external_web_segment_requires_absolute_url() {
    for agent in enabled_agents() {
        let txn = agent.start_transaction("/user").unwrap();
        let relative = WebRequest::new(Method::GET, Uri::from_static("/relative"));
        assert!(matches!(
            agent.start_external_web_segment(&txn, &relative),
            Err(Error::InvalidRequest(_))
        ));
        agent.end_transaction(&txn, None).unwrap();
    }
}

#[test]
fn test_enable_toggle_affects_later_calls() {
    let backend = RecordingBackend::new();
    let calls = Arc::clone(&backend.calls);
    let agent = Agent::from_backend("iam", Box::new(backend), true);

    let txn = agent.start_transaction("/user").unwrap();
    agent.enable(false);
    assert!(agent.start_transaction("/ignored").unwrap().is_none());
    agent.end_transaction(&Handle::none(), None).unwrap();

    agent.enable(true);
    agent.end_transaction(&txn, None).unwrap();

    assert_eq!(
        *calls.lock().unwrap(),
        vec!["start_transaction:/user".to_string(), "end_transaction".to_string()]
    );
}

#[test]
fn test_agent_checks_zero_handle_before_dispatch() {
    let backend = RecordingBackend::new();
    let calls = Arc::clone(&backend.calls);
    let agent = Agent::from_backend("iam", Box::new(backend), true);

    assert!(matches!(
        agent.start_segment(&Handle::none(), "hash"),
        Err(Error::MissingHandle {
            expected: HandleKind::Transaction
        })
    ));
    assert!(matches!(
        agent.end_data_store_segment(&Handle::none()),
        Err(Error::MissingHandle {
            expected: HandleKind::DataStoreSegment
        })
    ));
    assert!(calls.lock().unwrap().is_empty());
}

#[test]
fn test_dispatch_to_injected_backend() {
    let backend = RecordingBackend::new();
    let calls = Arc::clone(&backend.calls);
    let agent = Agent::from_backend("iam", Box::new(backend), true);

    let txn = agent.start_transaction("/user").unwrap();
    agent.add_attribute(&txn, "feature", "iam.manage.user.r").unwrap();
    let query = agent
        .start_data_store_segment(&txn, &DataStoreSegment::new("MongoDB", "find", "tblUsers"))
        .unwrap();
    agent.end_data_store_segment(&query).unwrap();
    agent
        .notice_error(&txn, &std::io::Error::other("timeout"))
        .unwrap();
    agent
        .end_transaction(&txn, Some(&std::io::Error::other("timeout")))
        .unwrap();

    assert_eq!(
        *calls.lock().unwrap(),
        vec![
            "start_transaction:/user",
            "add_attribute:feature=iam.manage.user.r",
            "start_data_store_segment:find",
            "end_data_store_segment",
            "notice_error:timeout",
            "end_transaction:timeout",
        ]
    );
}

#[test]
fn test_detached_backend_surfaces_not_initialized() {
    let agent = Agent::from_backend("iam", Box::new(SaasAdapter::detached("iam")), true);
    assert!(matches!(
        agent.start_transaction("/user"),
        Err(Error::NotInitialized {
            backend: BackendKind::Saas
        })
    ));
}

#[test]
fn test_inert_agent_stays_inert_when_enabled() {
    let agent = Agent::inert("iam");
    agent.enable(true);
    assert!(agent.is_enabled());
    assert!(agent.start_transaction("/user").unwrap().is_none());
    agent
        .end_transaction(&Handle::opaque("stale"), None)
        .unwrap();
}

#[test]
fn test_concurrent_use() {
    let agent = Arc::new(Agent::new(BackendKind::SelfHosted, true, self_hosted_config()).unwrap());

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let agent = Arc::clone(&agent);
            thread::spawn(move || {
                for j in 0..10 {
                    // The toggler may disable the agent between calls, leaving a
                    // zero handle that a later enabled call rejects.
                    let txn = agent.start_transaction(&format!("/job/{i}/{j}")).unwrap();
                    if let Ok(segment) = agent.start_segment(&txn, "work") {
                        let ended = agent.end_segment(&segment);
                        assert!(ended.is_ok() || ended.is_err_and(|e| e.is_handle_error()));
                    }
                    let ended = agent.end_transaction(&txn, None);
                    assert!(ended.is_ok() || ended.is_err_and(|e| e.is_handle_error()));
                }
            })
        })
        .collect();

    let toggler = {
        let agent = Arc::clone(&agent);
        thread::spawn(move || {
            for _ in 0..10 {
                agent.enable(false);
                agent.enable(true);
            }
        })
    };

    for worker in workers {
        worker.join().unwrap();
    }
    toggler.join().unwrap();
    assert!(agent.is_enabled());
}

#[test]
fn test_debug_output() {
    let agent = Agent::new(BackendKind::Saas, true, saas_config()).unwrap();
    let debug = format!("{agent:?}");
    assert!(debug.contains("Agent"));
    assert!(debug.contains("SaasAdapter"));
    assert!(!debug.contains(LICENSE_KEY));
}
