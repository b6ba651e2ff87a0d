mod agent;
mod session;
mod signer;

use crate::auth::signer::FileSigner;

use ssh_key::PrivateKey;
use ssh_key::private::{Ed25519Keypair, KeypairData};

/// Deterministic ed25519 key; distinct seeds give distinct keys.
fn ed25519_key(seed: u8) -> PrivateKey {
    let keypair = Ed25519Keypair::from_seed(&[seed; 32]);
    PrivateKey::new(KeypairData::from(keypair), format!("test-{seed}@linkd")).expect("key")
}

fn file_signer(seed: u8) -> FileSigner {
    FileSigner::from_private_key(ed25519_key(seed), format!("test:{seed}")).expect("signer")
}
