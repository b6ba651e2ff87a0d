// Unit tests for the ssh-agent client against an in-memory agent

use super::file_signer;
use crate::auth::agent::{AgentClient, AgentSigner};
use crate::auth::signer::{AuthSigner, FileSigner};
use crate::error::SignerError;

use std::sync::Arc;

use signature::Verifier;
use ssh_encoding::{Decode, Encode};
use ssh_key::{PublicKey, Signature};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

const IDENTITIES_ANSWER: u8 = 12;
const SIGN_REQUEST: u8 = 13;
const SIGN_RESPONSE: u8 = 14;
const FAILURE: u8 = 5;

/// Serve agent requests on `stream` with the given keys until the client hangs up.
async fn fake_agent(mut stream: DuplexStream, keys: Vec<FileSigner>, refuse_signing: bool) {
    loop {
        let Ok(len) = stream.read_u32().await else {
            return;
        };
        let mut request = vec![0u8; len as usize];
        if stream.read_exact(&mut request).await.is_err() {
            return;
        }

        let mut reply = Vec::new();
        match request[0] {
            SIGN_REQUEST if refuse_signing => reply.push(FAILURE),
            SIGN_REQUEST => {
                let mut body = &request[1..];
                let blob = Vec::<u8>::decode(&mut body).expect("blob");
                let data = Vec::<u8>::decode(&mut body).expect("data");
                let key = keys
                    .iter()
                    .find(|key| key.public_key_blob() == blob.as_slice())
                    .expect("known key");
                let signature = key.sign(&data).await.expect("sign");
                reply.push(SIGN_RESPONSE);
                signature.as_slice().encode(&mut reply).expect("encode");
            }
            _ => {
                reply.push(IDENTITIES_ANSWER);
                (keys.len() as u32).encode(&mut reply).expect("encode");
                for key in &keys {
                    key.public_key_blob().encode(&mut reply).expect("encode");
                    key.description().encode(&mut reply).expect("encode");
                }
            }
        }

        stream.write_u32(reply.len() as u32).await.expect("write");
        stream.write_all(&reply).await.expect("write");
    }
}

fn spawn_agent(keys: Vec<FileSigner>, refuse_signing: bool) -> AgentClient {
    let (client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(fake_agent(server, keys, refuse_signing));
    AgentClient::new(client)
}

/// **VALUE**: Verifies identities are listed with blob and comment.
///
/// **WHY THIS MATTERS**: Agent keys are tried before key files; a parse slip would
/// silently drop them all.
///
/// **BUG THIS CATCHES**: Would catch a wrong message type or length framing.
#[tokio::test]
async fn given_agent_with_two_keys_when_listing_then_both_identities_returned() {
    let agent = spawn_agent(vec![file_signer(1), file_signer(2)], false);

    let identities = agent.identities().await.expect("identities");

    assert_eq!(identities.len(), 2);
    assert_eq!(identities[0].key_blob, file_signer(1).public_key_blob());
    assert_eq!(identities[1].comment, "test:2");
}

/// **VALUE**: Verifies an agent signer produces a signature the public key verifies.
///
/// **WHY THIS MATTERS**: The private key never leaves the agent; the signature is all
/// the daemon gets.
///
/// **BUG THIS CATCHES**: Would catch the signature blob being double-wrapped.
#[tokio::test]
async fn given_agent_signer_when_signing_then_signature_verifies() {
    // GIVEN: An agent holding key 3
    let agent = Arc::new(spawn_agent(vec![file_signer(3)], false));
    let identity = agent
        .identities()
        .await
        .expect("identities")
        .pop()
        .expect("one identity");
    let signer = AgentSigner::new(Arc::clone(&agent), identity).expect("signer");

    // WHEN: Signing
    let encoded = signer.sign(b"nonce-42").await.expect("sign");

    // THEN: Verifies under the advertised key
    let signature = Signature::decode(&mut encoded.as_slice()).expect("decode");
    let public = PublicKey::from_bytes(signer.public_key_blob()).expect("public key");
    Verifier::verify(&public, b"nonce-42", &signature).expect("verifies");
    assert_eq!(signer.description(), "agent:test:3");
}

/// **VALUE**: Verifies an agent refusal becomes a sign error.
///
/// **WHY THIS MATTERS**: Agents refuse when a confirm-on-use key is declined; the
/// authenticator must move on to the next signer.
///
/// **BUG THIS CATCHES**: Would catch a failure reply decoded as a signature.
#[tokio::test]
async fn given_refusing_agent_when_signing_then_sign_error() {
    let agent = spawn_agent(vec![file_signer(1)], true);

    let result = agent
        .sign(file_signer(1).public_key_blob(), b"nonce", 0)
        .await;

    assert!(matches!(result, Err(SignerError::Sign { .. })));
}

/// **VALUE**: Verifies a vanished agent surfaces as an error rather than a hang or panic.
///
/// **WHY THIS MATTERS**: Agents restart; discovery must degrade to key files.
///
/// **BUG THIS CATCHES**: Would catch EOF treated as an empty identity list.
#[tokio::test]
async fn given_closed_agent_when_listing_then_error() {
    let (client, server) = tokio::io::duplex(1024);
    drop(server);
    let agent = AgentClient::new(client);

    assert!(agent.identities().await.is_err());
}
