//! The three RPCs the handshake needs, behind a trait so the authenticator can
//! be exercised without a daemon.
//!
//! The trait and the generated stub share method names. The impl below calls
//! the stub through its type path; plain method syntax resolves to the trait.

use crate::error::ClientError;
use crate::interceptor::RpcChannel;
use crate::proto::auth_service_client::AuthServiceClient;
use crate::proto::{GetChallengeRequest, RefreshSessionRequest, VerifyChallengeRequest};

use common::RedactedToken;

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub id: String,
    pub nonce: Vec<u8>,
}

#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn request_challenge(
        &self,
        public_key: &[u8],
        fingerprint: &str,
    ) -> Result<Challenge, ClientError>;

    async fn verify_challenge(
        &self,
        challenge_id: &str,
        public_key: &[u8],
        signature: &[u8],
    ) -> Result<RedactedToken, ClientError>;

    /// `Ok(Some(new))` when the daemon rotated the token, `Ok(None)` to keep it.
    async fn refresh_session(
        &self,
        token: &RedactedToken,
    ) -> Result<Option<RedactedToken>, ClientError>;
}

#[async_trait]
impl AuthTransport for AuthServiceClient<RpcChannel> {
    async fn request_challenge(
        &self,
        public_key: &[u8],
        fingerprint: &str,
    ) -> Result<Challenge, ClientError> {
        let response = AuthServiceClient::get_challenge(
            &mut self.clone(),
            GetChallengeRequest {
                public_key: public_key.to_vec(),
                key_fingerprint: fingerprint.to_string(),
            },
        )
        .await?
        .into_inner();

        Ok(Challenge {
            id: response.challenge_id,
            nonce: response.challenge,
        })
    }

    async fn verify_challenge(
        &self,
        challenge_id: &str,
        public_key: &[u8],
        signature: &[u8],
    ) -> Result<RedactedToken, ClientError> {
        let response = AuthServiceClient::verify_challenge(
            &mut self.clone(),
            VerifyChallengeRequest {
                challenge_id: challenge_id.to_string(),
                signature: signature.to_vec(),
                public_key: public_key.to_vec(),
            },
        )
        .await?
        .into_inner();

        if response.session_token.is_empty() {
            return Err(ClientError::authentication_failed(
                "daemon accepted the signature but issued no session token",
            ));
        }
        Ok(RedactedToken::new(response.session_token))
    }

    async fn refresh_session(
        &self,
        token: &RedactedToken,
    ) -> Result<Option<RedactedToken>, ClientError> {
        let response = AuthServiceClient::refresh_session(
            &mut self.clone(),
            RefreshSessionRequest {
                session_token: token.as_str().to_string(),
            },
        )
        .await?
        .into_inner();

        Ok(Some(response.session_token)
            .filter(|rotated| !rotated.is_empty() && rotated != token.as_str())
            .map(RedactedToken::new))
    }
}
