use crate::mqtt::{classify, classify_code, BrokerConfig, MqttSession};
use pzem_core::{BrokerSession, ConnectFailure, PublishError};
use rumqttc::{ConnectReturnCode, ConnectionError};
use std::io;
use std::time::{Duration, Instant};

#[test]
fn refusal_codes_map_to_failure_causes() {
    let cases = [
        (ConnectReturnCode::RefusedProtocolVersion, ConnectFailure::Protocol),
        (ConnectReturnCode::BadClientId, ConnectFailure::BadClientId),
        (ConnectReturnCode::ServiceUnavailable, ConnectFailure::Unavailable),
        (ConnectReturnCode::BadUserNamePassword, ConnectFailure::Credentials),
        (ConnectReturnCode::NotAuthorized, ConnectFailure::Unauthorized),
    ];

    for (code, expected) in cases {
        assert_eq!(classify_code(code), expected, "code {code:?}");
        assert_eq!(classify(&ConnectionError::ConnectionRefused(code)), expected, "refused {code:?}");
    }
}

#[test]
fn success_code_is_not_a_known_cause() {
    assert!(matches!(classify_code(ConnectReturnCode::Success), ConnectFailure::Unknown(_)));
}

#[test]
fn socket_errors_are_network_failures() {
    // Arrange
    let err = ConnectionError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));

    // Act
    let cause = classify(&err);

    // Assert
    match cause {
        ConnectFailure::Network(message) => assert!(message.contains("connection refused"), "{message}"),
        other => panic!("expected network failure, got {other:?}"),
    }
}

#[test]
fn other_connection_errors_are_unknown() {
    assert!(matches!(classify(&ConnectionError::RequestsDone), ConnectFailure::Unknown(_)));
    assert!(matches!(classify(&ConnectionError::NetworkTimeout), ConnectFailure::Unknown(_)));
}

#[test]
fn publish_without_session_is_rejected() {
    // Arrange
    let mut session = MqttSession::new(BrokerConfig::default());

    // Act
    let result = session.publish("pzem/test", b"{}".to_vec());

    // Assert
    assert!(!session.is_connected());
    assert!(matches!(result, Err(PublishError::NotConnected)), "got {result:?}");
}

#[tokio::test]
async fn pump_without_session_returns_at_once() {
    // Arrange
    let mut session = MqttSession::new(BrokerConfig {
        pump_budget: Duration::from_secs(5),
        ..BrokerConfig::default()
    });
    let started = Instant::now();

    // Act
    session.pump().await;

    // Assert
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!session.is_connected());
}

#[tokio::test]
async fn unreachable_broker_leaves_session_down() {
    // Arrange
    let mut session = MqttSession::new(BrokerConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        connect_timeout: Duration::from_millis(500),
        ..BrokerConfig::default()
    });

    // Act
    let result = session.connect().await;

    // Assert
    assert!(
        matches!(result, Err(ConnectFailure::Network(_)) | Err(ConnectFailure::Timeout)),
        "got {result:?}"
    );
    assert!(!session.is_connected());
    assert!(matches!(
        session.publish("pzem/test", Vec::new()),
        Err(PublishError::NotConnected)
    ));
}
