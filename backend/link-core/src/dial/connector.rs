//! Opens one gRPC channel to one target.
//!
//! The HTTP/2 layer always sees [`DAEMON_ORIGIN`]; the custom connector picks
//! the real transport (local socket, TCP, TLS over TCP). TOFU confirmation
//! happens outside the TLS handshake: the verifier parks its verdict in a
//! [`VerdictSlot`], the handshake fails, and the caller gets the prompt back.
//! The caller asks, outside any dial deadline, and redials.

use crate::error::client::error_chain;
use crate::error::ClientError;
use crate::options::ClientOptions;
use crate::trust::tofu::{TofuDecision, TofuOutcome, TofuPrompt, TofuResolution};
use crate::trust::verifier::{VerdictSlot, tls_client_config};
use crate::DAEMON_ORIGIN;

use models::{Target, TargetKind};

use std::io::Error as IoError;
use std::sync::Arc;

use http::Uri;
use hyper_util::rt::TokioIo;
use log::{debug, warn};
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tonic::transport::{Channel, Endpoint};
use tower::service_fn;

/// Result of one dial that did not fail outright.
#[derive(Debug)]
pub(crate) enum Attempt {
    Connected(Channel),
    /// The peer is unknown or changed; nothing connects until someone decides.
    NeedsConfirmation(TofuPrompt),
}

/// Dial `target` once.
pub(crate) async fn open_channel(
    target: &Target,
    options: &ClientOptions,
) -> Result<Attempt, ClientError> {
    let slot = VerdictSlot::default();
    let error = match connect_once(target, options, &slot).await {
        Ok(channel) => return Ok(Attempt::Connected(channel)),
        Err(e) => e,
    };

    match slot.take() {
        None | Some(TofuOutcome::Accepted) => Err(error),
        Some(TofuOutcome::Rejected(rejection)) => Err(rejection.into()),
        Some(TofuOutcome::NeedsConfirmation(prompt)) => Ok(Attempt::NeedsConfirmation(prompt)),
    }
}

/// Ask the callback and apply its decision to the trust store.
///
/// Unbounded in time: a person may be reading the fingerprint.
pub(crate) async fn confirm(
    prompt: &TofuPrompt,
    options: &ClientOptions,
) -> Result<(), ClientError> {
    let policy = options.tofu_policy()?;
    let decision = match options.tofu_callback() {
        Some(callback) => {
            let callback = Arc::clone(callback);
            let question = prompt.clone();
            // The callback may block on a terminal.
            tokio::task::spawn_blocking(move || callback(&question))
                .await
                .map_err(|e| ClientError::internal(format!("trust prompt failed: {e}")))?
        }
        None => TofuDecision::Reject,
    };
    debug!("Trust decision for '{}': {decision:?}", prompt.identity());

    match policy.resolve(prompt, decision)? {
        TofuResolution::Pinned | TofuResolution::Repinned => Ok(()),
        TofuResolution::Rejected(rejection) => Err(rejection.into()),
    }
}

async fn connect_once(
    target: &Target,
    options: &ClientOptions,
    slot: &VerdictSlot,
) -> Result<Channel, ClientError> {
    let endpoint = Endpoint::from_static(DAEMON_ORIGIN);
    let address = target.address().to_string();

    let connected = match target.kind() {
        TargetKind::LocalSocket => connect_local(endpoint, address).await,
        TargetKind::NetworkAddress if options.uses_tls(target) => {
            let config = Arc::new(tls_client_config(options, &address, slot)?);
            let server_name = server_name(target, options)?;
            connect_tls(endpoint, address, TlsConnector::from(config), server_name).await
        }
        TargetKind::NetworkAddress => {
            warn!("TLS is disabled for {target}; traffic is not encrypted");
            connect_tcp(endpoint, address).await
        }
        TargetKind::OverlayPeer => {
            return Err(ClientError::not_implemented(format!(
                "overlay transport is not available (peer {})",
                target.address()
            )));
        }
    };

    connected.map_err(|e| ClientError::connection_failed(target.to_string(), error_chain(&e)))
}

fn server_name(
    target: &Target,
    options: &ClientOptions,
) -> Result<ServerName<'static>, ClientError> {
    let host = options
        .tls()
        .server_name
        .clone()
        .or_else(|| target.host().map(str::to_string))
        .ok_or_else(|| {
            ClientError::invalid_argument(format!("no host in network address {target}"))
        })?;

    ServerName::try_from(host)
        .map_err(|e| ClientError::invalid_argument(format!("invalid TLS server name: {e}")))
}

async fn connect_tcp(
    endpoint: Endpoint,
    address: String,
) -> Result<Channel, tonic::transport::Error> {
    endpoint
        .connect_with_connector(service_fn(move |_: Uri| {
            let address = address.clone();
            async move {
                let stream = TcpStream::connect(&address).await?;
                stream.set_nodelay(true)?;
                Ok::<_, IoError>(TokioIo::new(stream))
            }
        }))
        .await
}

async fn connect_tls(
    endpoint: Endpoint,
    address: String,
    connector: TlsConnector,
    server_name: ServerName<'static>,
) -> Result<Channel, tonic::transport::Error> {
    endpoint
        .connect_with_connector(service_fn(move |_: Uri| {
            let address = address.clone();
            let connector = connector.clone();
            let server_name = server_name.clone();
            async move {
                let stream = TcpStream::connect(&address).await?;
                stream.set_nodelay(true)?;
                let tls = connector.connect(server_name, stream).await?;
                Ok::<_, IoError>(TokioIo::new(tls))
            }
        }))
        .await
}

#[cfg(unix)]
async fn connect_local(
    endpoint: Endpoint,
    path: String,
) -> Result<Channel, tonic::transport::Error> {
    endpoint
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = path.clone();
            async move {
                let stream = tokio::net::UnixStream::connect(&path).await?;
                Ok::<_, IoError>(TokioIo::new(stream))
            }
        }))
        .await
}

#[cfg(windows)]
async fn connect_local(
    endpoint: Endpoint,
    path: String,
) -> Result<Channel, tonic::transport::Error> {
    use tokio::net::windows::named_pipe::ClientOptions as PipeOptions;

    endpoint
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = path.clone();
            async move {
                let pipe = PipeOptions::new().open(&path)?;
                Ok::<_, IoError>(TokioIo::new(pipe))
            }
        }))
        .await
}
