use std::net::{IpAddr, Ipv4Addr};

use portfwd_engine::{
    Engine, EngineConfig, ForwardRule, InvalidRule, Protocol, StartRuleError, StopRuleError,
};

fn test_config() -> EngineConfig {
    EngineConfig {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        connect_timeout_ms: 500,
        drain_timeout_ms: 1_000,
        ..Default::default()
    }
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn port_is_listening_when_start_returns() {
    let port = free_port();
    let engine = Engine::new(test_config());
    engine
        .start_rule(ForwardRule::tcp("web", port, "127.0.0.1", 9))
        .await
        .unwrap();

    // No waiting: the bind happened inside start_rule
    let _client = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
    assert_eq!(
        engine.local_addr("web").await.map(|a| a.port()),
        Some(port)
    );

    engine.stop_all().await;
}

#[tokio::test]
async fn starting_a_running_name_fails() {
    let engine = Engine::new(test_config());
    engine
        .start_rule(ForwardRule::tcp("web", free_port(), "127.0.0.1", 80))
        .await
        .unwrap();

    let err = engine
        .start_rule(ForwardRule::tcp("web", free_port(), "127.0.0.1", 80))
        .await
        .unwrap_err();
    assert!(matches!(err, StartRuleError::AlreadyRunning { ref name } if name == "web"));
    assert_eq!(engine.status().await.len(), 1);

    engine.stop_all().await;
}

#[tokio::test]
async fn port_conflict_is_a_bind_error() {
    let port = free_port();
    let engine = Engine::new(test_config());
    engine
        .start_rule(ForwardRule::tcp("first", port, "127.0.0.1", 80))
        .await
        .unwrap();

    let err = engine
        .start_rule(ForwardRule::tcp("second", port, "127.0.0.1", 81))
        .await
        .unwrap_err();
    match err {
        StartRuleError::Bind {
            name,
            protocol,
            addr,
            ..
        } => {
            assert_eq!(name, "second");
            assert_eq!(protocol, Protocol::Tcp);
            assert_eq!(addr.port(), port);
        }
        other => panic!("expected bind error, got {other:?}"),
    }
    assert!(!engine.is_running("second").await);
    assert!(engine.is_running("first").await);

    engine.stop_all().await;
}

#[tokio::test]
async fn invalid_rule_is_rejected_before_binding() {
    let engine = Engine::new(test_config());
    let err = engine
        .start_rule(ForwardRule::tcp("web", 0, "127.0.0.1", 80))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StartRuleError::InvalidRule {
            source: InvalidRule::ZeroLocalPort,
            ..
        }
    ));
    assert!(engine.status().await.is_empty());
}

#[tokio::test]
async fn stopping_an_unknown_rule_fails() {
    let engine = Engine::new(test_config());
    let err = engine.stop_rule("ghost").await.unwrap_err();
    assert!(matches!(err, StopRuleError::NoSuchRule { ref name } if name == "ghost"));
}

#[tokio::test]
async fn stopped_name_can_start_again_on_same_port() {
    let port = free_port();
    let engine = Engine::new(test_config());
    let rule = ForwardRule::tcp("web", port, "127.0.0.1", 80);

    engine.start_rule(rule.clone()).await.unwrap();
    engine.stop_rule("web").await.unwrap();
    assert!(engine.stop_rule("web").await.is_err());

    engine.start_rule(rule).await.unwrap();
    assert!(engine.is_running("web").await);

    engine.stop_all().await;
}

#[tokio::test]
async fn start_all_isolates_failures_and_skips_inactive() {
    let shared = free_port();
    let engine = Engine::new(test_config());

    let failures = engine
        .start_all(vec![
            ForwardRule::tcp("a", shared, "127.0.0.1", 80),
            ForwardRule::tcp("b", shared, "127.0.0.1", 81),
            ForwardRule::udp("c", free_port(), "127.0.0.1", 53),
            ForwardRule::tcp("d", free_port(), "127.0.0.1", 82).with_active(false),
        ])
        .await;

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "b");
    assert!(matches!(failures[0].1, StartRuleError::Bind { .. }));

    let running: Vec<_> = engine
        .status()
        .await
        .into_iter()
        .map(|s| (s.name, s.protocol))
        .collect();
    assert_eq!(
        running,
        vec![("a".to_string(), Protocol::Tcp), ("c".to_string(), Protocol::Udp)]
    );

    engine.stop_all().await;
}

#[tokio::test]
async fn stop_all_releases_every_port() {
    let tcp_port = free_port();
    let udp_port = free_port();
    let engine = Engine::new(test_config());

    let failures = engine
        .start_all(vec![
            ForwardRule::tcp("web", tcp_port, "127.0.0.1", 80),
            ForwardRule::udp("dns", udp_port, "127.0.0.1", 53),
        ])
        .await;
    assert!(failures.is_empty());

    engine.stop_all().await;
    assert!(engine.status().await.is_empty());

    drop(std::net::TcpListener::bind(("127.0.0.1", tcp_port)).unwrap());
    drop(std::net::UdpSocket::bind(("127.0.0.1", udp_port)).unwrap());
}

#[tokio::test]
async fn clones_share_the_registry() {
    let engine = Engine::new(test_config());
    let other = engine.clone();

    engine
        .start_rule(ForwardRule::tcp("web", free_port(), "127.0.0.1", 80))
        .await
        .unwrap();
    assert!(other.is_running("web").await);

    other.stop_rule("web").await.unwrap();
    assert!(!engine.is_running("web").await);
}
