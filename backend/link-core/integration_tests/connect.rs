use crate::helpers::{
    IssuingTransport, SilentListener, StaticSigner, WIRE_TOKEN, eventually, health_check,
    spawn_tcp_daemon,
};

use link_core::{
    AuthOptions, ClientError, ClientOptions, DialMode, ErrorKind, LinkClient, TlsOptions,
};
use models::TargetKind;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tonic_health::pb::health_check_response::ServingStatus;

// ============================================================================
// Public API tests for LinkClient against an in-process daemon
// These test the PUBLIC interface from an external consumer's perspective
// ============================================================================

fn plaintext() -> TlsOptions {
    TlsOptions {
        enabled: false,
        ..TlsOptions::default()
    }
}

fn missing_socket(dir: &tempfile::TempDir) -> String {
    dir.path().join("linkd.sock").to_string_lossy().into_owned()
}

// ----------------------------------------------------------------------------
// connect() - target selection
// ----------------------------------------------------------------------------

/// **VALUE**: Verifies a plaintext network target connects and serves RPCs.
///
/// **WHY THIS MATTERS**: This is the happy path every command takes.
///
/// **BUG THIS CATCHES**: Would catch if:
/// - The custom connector ignores the target address
/// - The pipeline channel cannot drive a real tonic client
/// - The request-id stage does not reach the wire
#[tokio::test]
async fn given_running_daemon_when_connecting_over_tcp_then_health_check_serves() {
    // GIVEN: A daemon on an ephemeral port
    let (daemon, addr) = spawn_tcp_daemon().await;
    let options = ClientOptions::builder()
        .with_network_address(addr.to_string())
        .with_tls(plaintext())
        .build()
        .expect("options");
    let client = LinkClient::new(options);

    // WHEN: Connecting and calling
    client.connect().await.expect("connect");
    let status = health_check(&client).await.expect("health check");

    // THEN: Serving, with a request id and no credentials on the wire
    assert_eq!(status, ServingStatus::Serving);
    let calls = daemon.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].request_id.as_deref().is_some_and(|id| !id.is_empty()));
    assert!(calls[0].authorization.is_none());
}

/// **VALUE**: Verifies sequential mode falls through a dead local socket to the network target.
///
/// **WHY THIS MATTERS**: The local socket is preferred but the daemon is often remote.
///
/// **BUG THIS CATCHES**: Would catch if:
/// - The first failure aborts the whole connect
/// - Priority order is ignored and the wrong target is reported
#[tokio::test]
async fn given_missing_socket_and_live_tcp_when_sequential_then_connected_over_tcp() {
    // GIVEN: A socket path with nothing listening and a live TCP daemon
    let dir = tempfile::tempdir().expect("temp dir");
    let (_daemon, addr) = spawn_tcp_daemon().await;
    let options = ClientOptions::builder()
        .with_local_socket(missing_socket(&dir))
        .with_network_address(addr.to_string())
        .with_dial_mode(DialMode::Sequential)
        .with_retries(0)
        .with_tls(plaintext())
        .build()
        .expect("options");
    let client = LinkClient::new(options);

    // WHEN: Connecting
    client.connect().await.expect("connect");

    // THEN: The network target won
    let target = client.connected_target().expect("target");
    assert_eq!(target.kind(), TargetKind::NetworkAddress);
    assert_eq!(target.address(), addr.to_string());
}

/// **VALUE**: Verifies racing mode connects through the one reachable target.
///
/// **WHY THIS MATTERS**: Racing exists to hide slow or dead targets.
///
/// **BUG THIS CATCHES**: Would catch a failed racer cancelling the winner.
#[tokio::test]
async fn given_one_reachable_target_when_racing_then_connected() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (_daemon, addr) = spawn_tcp_daemon().await;
    let options = ClientOptions::builder()
        .with_local_socket(missing_socket(&dir))
        .with_network_address(addr.to_string())
        .with_dial_mode(DialMode::Racing)
        .with_retries(1)
        .with_backoff_seed(Duration::from_millis(20))
        .with_tls(plaintext())
        .build()
        .expect("options");
    let client = LinkClient::new(options);

    client.connect().await.expect("connect");

    assert_eq!(
        client.connected_target().map(|target| target.kind()),
        Some(TargetKind::NetworkAddress)
    );
    assert_eq!(
        health_check(&client).await.expect("health"),
        ServingStatus::Serving
    );
}

/// **VALUE**: Verifies racing does not wait on a hanging higher-priority target.
///
/// **WHY THIS MATTERS**: A firewalled address that swallows packets would otherwise
/// stall every command for the whole dial timeout.
///
/// **BUG THIS CATCHES**: Would catch if:
/// - Targets are dialed one after another despite racing mode
/// - The losing dial keeps its socket open after the winner is chosen
#[cfg(unix)]
#[tokio::test]
async fn given_hanging_network_target_when_racing_then_local_socket_wins_quickly() {
    // GIVEN: A network target whose TLS handshake never completes, and a live socket
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("linkd.sock");
    let _daemon = crate::helpers::spawn_unix_daemon(&path).await;
    let silent = SilentListener::spawn().await;
    let options = ClientOptions::builder()
        .with_local_socket(path.to_string_lossy())
        .with_network_address(silent.addr.to_string())
        .with_dial_mode(DialMode::Racing)
        .with_retries(0)
        .with_timeout(Duration::from_secs(10))
        .with_tls(TlsOptions {
            skip_verify: true,
            ..TlsOptions::default()
        })
        .build()
        .expect("options");
    let client = LinkClient::new(options);

    // WHEN: Racing both
    let started = Instant::now();
    client.connect().await.expect("connect");

    // THEN: The socket won well inside the hanging target's timeout
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        client.connected_target().map(|target| target.kind()),
        Some(TargetKind::LocalSocket)
    );

    // THEN: The network attempt was abandoned and its socket closed
    assert!(eventually(|| silent.accepted() >= 1 && silent.closed() == silent.accepted()).await);
}

/// **VALUE**: Verifies caller cancellation stops an in-flight racing dial.
///
/// **WHY THIS MATTERS**: Ctrl-C during connect must not leave dials running in
/// the background.
///
/// **BUG THIS CATCHES**: Would catch if:
/// - Racers ignore the caller's token and run to their own timeout
/// - Cancellation surfaces as a connection failure
#[tokio::test]
async fn given_hanging_target_when_caller_cancels_racing_dial_then_cancelled_promptly() {
    // GIVEN: A racing client stuck on a target that never answers
    let silent = SilentListener::spawn().await;
    let options = ClientOptions::builder()
        .with_network_address(silent.addr.to_string())
        .with_dial_mode(DialMode::Racing)
        .with_retries(0)
        .with_timeout(Duration::from_secs(30))
        .with_tls(TlsOptions {
            skip_verify: true,
            ..TlsOptions::default()
        })
        .build()
        .expect("options");
    let client = Arc::new(LinkClient::new(options));
    let cancel = CancellationToken::new();

    let connecting = tokio::spawn({
        let client = Arc::clone(&client);
        let cancel = cancel.clone();
        async move { client.connect_with_cancel(&cancel).await }
    });
    assert!(eventually(|| silent.accepted() >= 1).await);

    // WHEN: The caller cancels
    let started = Instant::now();
    cancel.cancel();
    let result = connecting.await.expect("connect task");

    // THEN: Cancelled quickly, disconnected, and the socket released
    let error = result.expect_err("cancelled");
    assert!(matches!(error, ClientError::Cancelled { .. }), "got {error}");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!client.is_connected());
    assert!(eventually(|| silent.closed() == silent.accepted()).await);
}

/// **VALUE**: Verifies a Unix socket target connects.
///
/// **WHY THIS MATTERS**: The local socket is the default transport on the daemon host.
///
/// **BUG THIS CATCHES**: Would catch the socket path being treated as a host:port.
#[cfg(unix)]
#[tokio::test]
async fn given_daemon_on_unix_socket_when_connecting_then_serves_without_tls() {
    // GIVEN: A daemon on a socket; TLS left enabled (local sockets skip it)
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("linkd.sock");
    let daemon = crate::helpers::spawn_unix_daemon(&path).await;
    let options = ClientOptions::builder()
        .with_local_socket(path.to_string_lossy())
        .build()
        .expect("options");
    let client = LinkClient::new(options);

    // WHEN: Connecting and calling
    client.connect().await.expect("connect");
    let status = health_check(&client).await.expect("health");

    // THEN: Served over the socket
    assert_eq!(status, ServingStatus::Serving);
    assert_eq!(daemon.accepted_connections(), 1);
    assert_eq!(
        client.connected_target().map(|target| target.kind()),
        Some(TargetKind::LocalSocket)
    );
}

/// **VALUE**: Verifies all targets failing reports connection-failed.
///
/// **WHY THIS MATTERS**: `linkctl status` maps this to "daemon not running".
///
/// **BUG THIS CATCHES**: Would catch a hang or the wrong kind when nothing listens.
#[tokio::test]
async fn given_no_daemon_when_connecting_then_connection_failed_and_disconnected() {
    let dir = tempfile::tempdir().expect("temp dir");
    let options = ClientOptions::builder()
        .with_local_socket(missing_socket(&dir))
        .with_retries(0)
        .with_timeout(Duration::from_secs(2))
        .build()
        .expect("options");
    let client = LinkClient::new(options);

    let error = client.connect().await.expect_err("nothing listening");

    assert_eq!(error.kind(), ErrorKind::ConnectionFailed);
    assert!(!client.is_connected());
}

// ----------------------------------------------------------------------------
// Pool and lifecycle
// ----------------------------------------------------------------------------

/// **VALUE**: Verifies the pool opens `pool_size` connections and calls spread over them.
///
/// **WHY THIS MATTERS**: Pooling is how concurrent commands avoid head-of-line blocking.
///
/// **BUG THIS CATCHES**: Would catch if:
/// - Extra channels are never dialed
/// - Every call lands on one channel
#[tokio::test]
async fn given_pool_size_three_when_connected_then_three_connections_serve_calls() {
    // GIVEN: A client with three pooled channels
    let (daemon, addr) = spawn_tcp_daemon().await;
    let options = ClientOptions::builder()
        .with_network_address(addr.to_string())
        .with_pool_size(3)
        .with_tls(plaintext())
        .build()
        .expect("options");
    let client = LinkClient::new(options);

    // WHEN: Connecting and making several calls
    client.connect().await.expect("connect");
    for _ in 0..6 {
        assert_eq!(
            health_check(&client).await.expect("health"),
            ServingStatus::Serving
        );
    }

    // THEN: Three connections, every call tagged with its own request id
    assert_eq!(client.pool_size(), 3);
    assert_eq!(daemon.accepted_connections(), 3);
    let mut ids: Vec<String> = daemon
        .calls()
        .into_iter()
        .filter_map(|call| call.request_id)
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 6);
}

/// **VALUE**: Verifies connect is a no-op when already connected.
///
/// **WHY THIS MATTERS**: Commands call connect defensively; each extra dial is a wasted
/// handshake.
///
/// **BUG THIS CATCHES**: Would catch a second connect replacing the pool.
#[tokio::test]
async fn given_connected_client_when_connecting_again_then_no_new_connections() {
    let (daemon, addr) = spawn_tcp_daemon().await;
    let options = ClientOptions::builder()
        .with_network_address(addr.to_string())
        .with_tls(plaintext())
        .build()
        .expect("options");
    let client = LinkClient::new(options);

    client.connect().await.expect("connect");
    client.connect().await.expect("connect again");

    // A served call proves the server has registered every connection.
    health_check(&client).await.expect("health");
    assert_eq!(daemon.accepted_connections(), 1);
}

/// **VALUE**: Verifies service access fails before connect and after close.
///
/// **WHY THIS MATTERS**: A call on a closed client must fail loudly, not hang on an
/// empty pool.
///
/// **BUG THIS CATCHES**: Would catch `close` leaving stale channels behind.
#[tokio::test]
async fn given_unconnected_or_closed_client_when_accessing_channel_then_not_connected() {
    // GIVEN: A client that has not connected
    let (_daemon, addr) = spawn_tcp_daemon().await;
    let options = ClientOptions::builder()
        .with_network_address(addr.to_string())
        .with_tls(plaintext())
        .build()
        .expect("options");
    let client = LinkClient::new(options);

    // THEN: Not connected
    let before = client.channel().expect_err("not connected yet");
    assert_eq!(before.kind(), ErrorKind::NotConnected);

    // WHEN: Connected then closed
    client.connect().await.expect("connect");
    assert!(client.is_connected());
    client.close().await;

    // THEN: Not connected again, and reconnecting works
    assert!(!client.is_connected());
    assert_eq!(
        client.channel().expect_err("closed").kind(),
        ErrorKind::NotConnected
    );
    client.connect().await.expect("reconnect");
    assert_eq!(
        health_check(&client).await.expect("health"),
        ServingStatus::Serving
    );
}

// ----------------------------------------------------------------------------
// Session metadata
// ----------------------------------------------------------------------------

/// **VALUE**: Verifies an authenticated client sends its bearer token on every call.
///
/// **WHY THIS MATTERS**: The daemon authorizes each RPC from this header alone.
///
/// **BUG THIS CATCHES**: Would catch if:
/// - The auth stage reads a different session than the authenticator writes
/// - The `Bearer ` prefix is missing
#[tokio::test]
async fn given_authenticated_client_when_calling_then_bearer_token_on_wire() {
    // GIVEN: A connected client with an issued session
    let dir = tempfile::tempdir().expect("temp dir");
    let (daemon, addr) = spawn_tcp_daemon().await;
    let options = ClientOptions::builder()
        .with_network_address(addr.to_string())
        .with_tls(plaintext())
        .with_auth(AuthOptions {
            signers: vec![Arc::new(StaticSigner)],
            token_path: Some(dir.path().join("session.token")),
            ..AuthOptions::default()
        })
        .build()
        .expect("options");
    let client = LinkClient::new(options);
    client.connect().await.expect("connect");
    client
        .ensure_authenticated_with(&IssuingTransport { token: "tok-int" })
        .await
        .expect("authenticated");

    // WHEN: Making a call
    health_check(&client).await.expect("health");

    // THEN: Token on the wire
    assert!(client.is_authenticated());
    assert_eq!(
        daemon.calls()[0].authorization.as_deref(),
        Some("Bearer tok-int")
    );
}

/// **VALUE**: Verifies the handshake works over real gRPC and a second client
/// reuses the cached session.
///
/// **WHY THIS MATTERS**: The stub client and the transport trait share method
/// names; only a wire-level run shows the right ones are called.
///
/// **BUG THIS CATCHES**: Would catch if:
/// - The transport impl recurses into itself instead of issuing the RPC
/// - The cached token is not refreshed and reused across processes
#[tokio::test]
async fn given_daemon_auth_service_when_authenticating_then_session_issued_and_reused() {
    // GIVEN: Two clients sharing one session file
    let dir = tempfile::tempdir().expect("temp dir");
    let (daemon, addr) = spawn_tcp_daemon().await;
    let new_client = || {
        let options = ClientOptions::builder()
            .with_network_address(addr.to_string())
            .with_tls(plaintext())
            .with_auth(AuthOptions {
                signers: vec![Arc::new(StaticSigner)],
                token_path: Some(dir.path().join("session.token")),
                ..AuthOptions::default()
            })
            .build()
            .expect("options");
        LinkClient::new(options)
    };

    // WHEN: The first client authenticates over the daemon's AuthService
    let first = new_client();
    first.connect().await.expect("connect");
    let token = first.ensure_authenticated().await.expect("authenticated");
    health_check(&first).await.expect("health");

    // THEN: One challenge issued and the token sent on later calls
    assert_eq!(token.as_str(), WIRE_TOKEN);
    assert_eq!(daemon.challenges_issued(), 1);
    let expected = format!("Bearer {WIRE_TOKEN}");
    assert_eq!(
        daemon.calls().last().and_then(|call| call.authorization.clone()),
        Some(expected)
    );

    // WHEN: A second client starts from the cached session
    let second = new_client();
    second.connect().await.expect("connect");
    let reused = second.ensure_authenticated().await.expect("reused");

    // THEN: Same token, no new challenge
    assert_eq!(reused.as_str(), WIRE_TOKEN);
    assert_eq!(daemon.challenges_issued(), 1);
}
