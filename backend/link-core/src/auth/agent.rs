//! Minimal ssh-agent client: list identities and sign.
//!
//! Frames are `u32 length || payload`, payloads are SSH wire encoded.

use crate::auth::signer::AuthSigner;
use crate::error::SignerError;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use ssh_encoding::{Decode, Encode};
use ssh_key::{Algorithm, HashAlg, PublicKey};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

const SSH_AGENT_FAILURE: u8 = 5;
const SSH_AGENTC_REQUEST_IDENTITIES: u8 = 11;
const SSH_AGENT_IDENTITIES_ANSWER: u8 = 12;
const SSH_AGENTC_SIGN_REQUEST: u8 = 13;
const SSH_AGENT_SIGN_RESPONSE: u8 = 14;
const SSH_AGENT_RSA_SHA2_512: u32 = 4;
const MAX_FRAME_LEN: usize = 256 * 1024;

pub const SSH_AUTH_SOCK_ENV: &str = "SSH_AUTH_SOCK";
#[cfg(windows)]
pub const OPENSSH_AGENT_PIPE: &str = r"\\.\pipe\openssh-ssh-agent";

pub trait AgentStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AgentStream for T {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub key_blob: Vec<u8>,
    pub comment: String,
}

/// One request at a time over a single agent connection.
pub struct AgentClient {
    stream: Mutex<Box<dyn AgentStream>>,
}

impl AgentClient {
    pub fn new(stream: impl AgentStream + 'static) -> Self {
        Self {
            stream: Mutex::new(Box::new(stream)),
        }
    }

    pub async fn identities(&self) -> Result<Vec<AgentIdentity>, SignerError> {
        let response = self.request(&[SSH_AGENTC_REQUEST_IDENTITIES]).await?;
        let (kind, mut body) = split_kind(&response)?;
        if kind != SSH_AGENT_IDENTITIES_ANSWER {
            return Err(SignerError::agent(format!(
                "unexpected reply {kind} to identity request"
            )));
        }

        let count = u32::decode(&mut body)?;
        let mut identities = Vec::new();
        for _ in 0..count {
            let key_blob = Vec::<u8>::decode(&mut body)?;
            let comment = String::decode(&mut body)?;
            identities.push(AgentIdentity { key_blob, comment });
        }
        Ok(identities)
    }

    /// Returns the SSH wire-format signature.
    pub async fn sign(&self, key_blob: &[u8], data: &[u8], flags: u32) -> Result<Vec<u8>, SignerError> {
        let mut payload = vec![SSH_AGENTC_SIGN_REQUEST];
        key_blob.encode(&mut payload)?;
        data.encode(&mut payload)?;
        flags.encode(&mut payload)?;

        let response = self.request(&payload).await?;
        let (kind, mut body) = split_kind(&response)?;
        match kind {
            SSH_AGENT_SIGN_RESPONSE => Ok(Vec::<u8>::decode(&mut body)?),
            SSH_AGENT_FAILURE => Err(SignerError::sign("agent refused to sign")),
            other => Err(SignerError::agent(format!(
                "unexpected reply {other} to sign request"
            ))),
        }
    }

    async fn request(&self, payload: &[u8]) -> Result<Vec<u8>, SignerError> {
        let mut stream = self.stream.lock().await;

        let len = u32::try_from(payload.len())
            .map_err(|_| SignerError::agent("request too large"))?;
        stream.write_u32(len).await?;
        stream.write_all(payload).await?;
        stream.flush().await?;

        let len = stream.read_u32().await? as usize;
        if len == 0 || len > MAX_FRAME_LEN {
            return Err(SignerError::agent(format!("invalid reply length {len}")));
        }

        let mut response = vec![0u8; len];
        stream.read_exact(&mut response).await?;
        Ok(response)
    }
}

fn split_kind(response: &[u8]) -> Result<(u8, &[u8]), SignerError> {
    response
        .split_first()
        .map(|(kind, body)| (*kind, body))
        .ok_or_else(|| SignerError::agent("empty reply"))
}

/// A key held by the agent.
pub struct AgentSigner {
    agent: Arc<AgentClient>,
    key_blob: Vec<u8>,
    fingerprint: String,
    description: String,
    flags: u32,
}

impl AgentSigner {
    pub fn new(agent: Arc<AgentClient>, identity: AgentIdentity) -> Result<Self, SignerError> {
        let public_key = PublicKey::from_bytes(&identity.key_blob)?;
        let flags = match public_key.algorithm() {
            Algorithm::Rsa { .. } => SSH_AGENT_RSA_SHA2_512,
            _ => 0,
        };

        Ok(Self {
            agent,
            fingerprint: public_key.fingerprint(HashAlg::Sha256).to_string(),
            description: format!("agent:{}", identity.comment),
            key_blob: identity.key_blob,
            flags,
        })
    }
}

#[async_trait]
impl AuthSigner for AgentSigner {
    fn public_key_blob(&self) -> &[u8] {
        &self.key_blob
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn sign(&self, challenge: &[u8]) -> Result<Vec<u8>, SignerError> {
        self.agent.sign(&self.key_blob, challenge, self.flags).await
    }
}

/// Signers for every usable key the agent holds. `Ok(empty)` when no agent is reachable.
pub async fn agent_signers(socket: Option<&Path>) -> Result<Vec<AgentSigner>, SignerError> {
    let Some(client) = connect_agent(socket).await? else {
        return Ok(Vec::new());
    };
    let agent = Arc::new(client);

    let mut signers = Vec::new();
    for identity in agent.identities().await? {
        let comment = identity.comment.clone();
        match AgentSigner::new(Arc::clone(&agent), identity) {
            Ok(signer) => signers.push(signer),
            Err(e) => warn!("Skipping agent key '{comment}': {e}"),
        }
    }

    debug!("ssh-agent offered {} usable key(s)", signers.len());
    Ok(signers)
}

#[cfg(unix)]
async fn connect_agent(socket: Option<&Path>) -> Result<Option<AgentClient>, SignerError> {
    let path = match socket {
        Some(path) => path.to_path_buf(),
        None => match std::env::var_os(SSH_AUTH_SOCK_ENV) {
            Some(value) if !value.is_empty() => PathBuf::from(value),
            _ => {
                debug!("{SSH_AUTH_SOCK_ENV} is not set; skipping ssh-agent");
                return Ok(None);
            }
        },
    };

    match tokio::net::UnixStream::connect(&path).await {
        Ok(stream) => Ok(Some(AgentClient::new(stream))),
        Err(e) => {
            warn!("ssh-agent at {} is unreachable: {e}", path.display());
            Ok(None)
        }
    }
}

#[cfg(windows)]
async fn connect_agent(socket: Option<&Path>) -> Result<Option<AgentClient>, SignerError> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let path = socket
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(OPENSSH_AGENT_PIPE));

    match ClientOptions::new().open(&path) {
        Ok(pipe) => Ok(Some(AgentClient::new(pipe))),
        Err(e) => {
            debug!("ssh-agent pipe {} is unavailable: {e}", path.display());
            Ok(None)
        }
    }
}
