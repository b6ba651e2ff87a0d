//! Test helpers for link-core integration tests.
//!
//! This module provides in-process daemons for the client to dial:
//! - A plaintext gRPC health server on a loopback TCP port
//! - The same server on a Unix domain socket
//! - A TLS-terminating variant with a freshly generated certificate
//! - A silent listener that accepts TCP connections and never answers
//!
//! Every server also mounts a small `AuthService` and records the metadata it
//! received so tests can assert on what the client's pipeline attached.

use link_core::auth::signer::AuthSigner;
use link_core::auth::transport::{AuthTransport, Challenge};
use link_core::error::SignerError;
use link_core::proto::auth_service_server::{AuthService, AuthServiceServer};
use link_core::proto::{
    GetChallengeRequest, GetChallengeResponse, RefreshSessionRequest, RefreshSessionResponse,
    VerifyChallengeRequest, VerifyChallengeResponse,
};
use link_core::{AUTHORIZATION_HEADER, ClientError, REQUEST_ID_HEADER};

use common::RedactedToken;

use std::io::Result as IoResult;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::service::InterceptorLayer;
use tonic::transport::Server;
use tonic::transport::server::Connected;
use tonic::{Request, Response, Status};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

/// Metadata one request arrived with.
#[derive(Debug, Clone, Default)]
pub struct SeenCall {
    pub request_id: Option<String>,
    pub authorization: Option<String>,
}

pub type CallLog = Arc<Mutex<Vec<SeenCall>>>;

/// A running test daemon. Aborted on drop.
pub struct TestDaemon {
    pub calls: CallLog,
    pub accepted: Arc<Mutex<usize>>,
    pub auth: WireAuthService,
    tasks: Vec<JoinHandle<()>>,
}

impl TestDaemon {
    pub fn calls(&self) -> Vec<SeenCall> {
        self.calls.lock().expect("call log").clone()
    }

    pub fn challenges_issued(&self) -> usize {
        self.auth.challenges.load(Ordering::SeqCst)
    }

    pub fn accepted_connections(&self) -> usize {
        *self.accepted.lock().expect("accept count")
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn recording_interceptor(
    calls: CallLog,
) -> impl FnMut(Request<()>) -> Result<Request<()>, Status> + Clone {
    move |request: Request<()>| {
        let header = |name: &str| {
            request
                .metadata()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        calls.lock().expect("call log").push(SeenCall {
            request_id: header(REQUEST_ID_HEADER),
            authorization: header(AUTHORIZATION_HEADER),
        });
        Ok(request)
    }
}

pub const WIRE_CHALLENGE_ID: &str = "wire-challenge-1";
pub const WIRE_NONCE: &[u8] = b"wire-nonce";
pub const WIRE_TOKEN: &str = "tok-wire";

/// Accepts any key whose signature over [`WIRE_NONCE`] is the nonce itself
/// (what [`StaticSigner`] produces) and issues [`WIRE_TOKEN`].
#[derive(Debug, Clone, Default)]
pub struct WireAuthService {
    challenges: Arc<AtomicUsize>,
}

#[tonic::async_trait]
impl AuthService for WireAuthService {
    async fn get_challenge(
        &self,
        request: Request<GetChallengeRequest>,
    ) -> Result<Response<GetChallengeResponse>, Status> {
        if request.get_ref().public_key.is_empty() {
            return Err(Status::invalid_argument("no public key"));
        }
        self.challenges.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(GetChallengeResponse {
            challenge_id: WIRE_CHALLENGE_ID.to_string(),
            challenge: WIRE_NONCE.to_vec(),
        }))
    }

    async fn verify_challenge(
        &self,
        request: Request<VerifyChallengeRequest>,
    ) -> Result<Response<VerifyChallengeResponse>, Status> {
        let request = request.into_inner();
        if request.challenge_id != WIRE_CHALLENGE_ID || request.signature != WIRE_NONCE {
            return Err(Status::unauthenticated("signature rejected"));
        }
        Ok(Response::new(VerifyChallengeResponse {
            session_token: WIRE_TOKEN.to_string(),
            expires_at_unix: 0,
        }))
    }

    async fn refresh_session(
        &self,
        request: Request<RefreshSessionRequest>,
    ) -> Result<Response<RefreshSessionResponse>, Status> {
        if request.get_ref().session_token != WIRE_TOKEN {
            return Err(Status::unauthenticated("unknown session"));
        }
        Ok(Response::new(RefreshSessionResponse {
            session_token: String::new(),
            expires_at_unix: 0,
        }))
    }
}

/// Serve health and auth over connections produced by `incoming`.
fn serve<S, IO>(incoming: S, calls: CallLog, auth: WireAuthService) -> JoinHandle<()>
where
    S: futures_util::Stream<Item = IoResult<IO>> + Send + 'static,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
{
    let (_reporter, health) = tonic_health::server::health_reporter();
    tokio::spawn(async move {
        let result = Server::builder()
            .layer(InterceptorLayer::new(recording_interceptor(calls)))
            .add_service(health)
            .add_service(AuthServiceServer::new(auth))
            .serve_with_incoming(incoming)
            .await;
        if let Err(e) = result {
            eprintln!("test daemon stopped: {e}");
        }
    })
}

/// Plaintext daemon on `127.0.0.1:<ephemeral>`.
pub async fn spawn_tcp_daemon() -> (TestDaemon, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let calls = CallLog::default();
    let accepted = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&accepted);
    let incoming = futures_util::StreamExt::inspect(TcpListenerStream::new(listener), move |_| {
        *counter.lock().expect("accept count") += 1;
    });

    let auth = WireAuthService::default();
    let server = serve(incoming, Arc::clone(&calls), auth.clone());
    (
        TestDaemon {
            calls,
            accepted,
            auth,
            tasks: vec![server],
        },
        addr,
    )
}

/// Plaintext daemon on a Unix socket at `path`.
#[cfg(unix)]
pub async fn spawn_unix_daemon(path: &std::path::Path) -> TestDaemon {
    let listener = tokio::net::UnixListener::bind(path).expect("bind unix socket");

    let calls = CallLog::default();
    let accepted = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&accepted);
    let incoming = futures_util::StreamExt::inspect(
        tokio_stream::wrappers::UnixListenerStream::new(listener),
        move |_| {
            *counter.lock().expect("accept count") += 1;
        },
    );

    let auth = WireAuthService::default();
    let server = serve(incoming, Arc::clone(&calls), auth.clone());
    TestDaemon {
        calls,
        accepted,
        auth,
        tasks: vec![server],
    }
}

/// A self-signed server certificate.
pub struct TestCertificate {
    pub der: CertificateDer<'static>,
    key: KeyPair,
}

impl TestCertificate {
    pub fn generate(common_name: &str) -> Self {
        let mut params =
            CertificateParams::new(vec!["localhost".to_string()]).expect("cert params");
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;

        let key = KeyPair::generate().expect("key pair");
        let der = params.self_signed(&key).expect("self-signed").der().clone();
        Self { der, key }
    }

    fn server_config(&self) -> ServerConfig {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key.serialize_der()));
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .expect("protocol versions")
            .with_no_client_auth()
            .with_single_cert(vec![self.der.clone()], key)
            .expect("server cert");
        config.alpn_protocols = vec![b"h2".to_vec()];
        config
    }
}

/// Server-side TLS stream that tonic can serve on.
pub struct TlsIo(TlsStream<TcpStream>);

impl Connected for TlsIo {
    type ConnectInfo = ();

    fn connect_info(&self) -> Self::ConnectInfo {}
}

impl AsyncRead for TlsIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<IoResult<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for TlsIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<IoResult<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

/// TLS daemon on `127.0.0.1:<ephemeral>` presenting `certificate`.
///
/// Handshakes the client aborts (trust rejections) are dropped silently.
pub async fn spawn_tls_daemon(certificate: &TestCertificate) -> (TestDaemon, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let acceptor = TlsAcceptor::from(Arc::new(certificate.server_config()));

    let calls = CallLog::default();
    let accepted = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&accepted);
    let (tx, rx) = mpsc::channel::<IoResult<TlsIo>>(16);

    let accept_loop = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            *counter.lock().expect("accept count") += 1;
            let acceptor = acceptor.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Ok(tls) = acceptor.accept(stream).await {
                    let _ = tx.send(Ok(TlsIo(tls))).await;
                }
            });
        }
    });

    let auth = WireAuthService::default();
    let server = serve(ReceiverStream::new(rx), Arc::clone(&calls), auth.clone());

    (
        TestDaemon {
            calls,
            accepted,
            auth,
            tasks: vec![accept_loop, server],
        },
        addr,
    )
}

/// Accepts TCP connections and never writes a byte, so any handshake on it
/// hangs until the client gives up. Counts sockets the client has dropped.
pub struct SilentListener {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl SilentListener {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let accepted = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));

        let (on_accept, on_close) = (Arc::clone(&accepted), Arc::clone(&closed));
        let task = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                on_accept.fetch_add(1, Ordering::SeqCst);
                let on_close = Arc::clone(&on_close);
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    while matches!(stream.read(&mut buf).await, Ok(n) if n > 0) {}
                    on_close.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            addr,
            accepted,
            closed,
            task,
        }
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for SilentListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Polls `condition` every 10ms for up to five seconds.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Calls `Check` through the client's pipeline channel.
pub async fn health_check(client: &link_core::LinkClient) -> Result<ServingStatus, Status> {
    let mut health = client
        .service(HealthClient::new)
        .map_err(|e| Status::unavailable(e.to_string()))?;
    let response = health
        .check(HealthCheckRequest {
            service: String::new(),
        })
        .await?
        .into_inner();
    Ok(ServingStatus::try_from(response.status).unwrap_or(ServingStatus::Unknown))
}

/// Signer that never touches a real key; the fake transport accepts anything.
pub struct StaticSigner;

#[async_trait]
impl AuthSigner for StaticSigner {
    fn public_key_blob(&self) -> &[u8] {
        b"static-public-key"
    }

    fn fingerprint(&self) -> &str {
        "SHA256:static"
    }

    fn description(&self) -> &str {
        "static"
    }

    async fn sign(&self, challenge: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(challenge.to_vec())
    }
}

/// Issues `token` to whoever asks.
pub struct IssuingTransport {
    pub token: &'static str,
}

#[async_trait]
impl AuthTransport for IssuingTransport {
    async fn request_challenge(
        &self,
        _public_key: &[u8],
        _fingerprint: &str,
    ) -> Result<Challenge, ClientError> {
        Ok(Challenge {
            id: "challenge-1".to_string(),
            nonce: b"nonce".to_vec(),
        })
    }

    async fn verify_challenge(
        &self,
        _challenge_id: &str,
        _public_key: &[u8],
        _signature: &[u8],
    ) -> Result<RedactedToken, ClientError> {
        Ok(RedactedToken::new(self.token))
    }

    async fn refresh_session(
        &self,
        _token: &RedactedToken,
    ) -> Result<Option<RedactedToken>, ClientError> {
        Ok(None)
    }
}
