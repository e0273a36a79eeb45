//! Signing identity.
//!
//! Two modes: an external signer we cannot see into, or a secret key the
//! user pastes in `nsec1...` form and we hold in memory.

use std::sync::Arc;

use nostr_sdk::prelude::*;

use crate::error::{IdentityError, Result};

/// Literal prefix of an encoded secret key.
pub const SECRET_KEY_PREFIX: &str = "nsec1";

/// The user's signing identity.
#[derive(Clone)]
pub struct Identity {
    signer: Arc<dyn NostrSigner>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity").finish_non_exhaustive()
    }
}

impl Identity {
    /// Wrap an external signer.
    pub fn external(signer: Arc<dyn NostrSigner>) -> Self {
        Self { signer }
    }

    /// Decode a locally held secret key.
    pub fn from_secret(input: &str) -> std::result::Result<Self, IdentityError> {
        let input = input.trim();
        if !input.starts_with(SECRET_KEY_PREFIX) {
            return Err(IdentityError::WrongPrefix);
        }
        let secret = SecretKey::from_bech32(input)
            .map_err(|e| IdentityError::MalformedSecretKey(e.to_string()))?;
        Ok(Self {
            signer: Arc::new(Keys::new(secret)),
        })
    }

    /// A fresh throwaway identity.
    pub fn generate() -> Self {
        Self {
            signer: Arc::new(Keys::generate()),
        }
    }

    /// Public key as hex.
    pub async fn public_key(&self) -> Result<String> {
        Ok(self.public_key_raw().await?.to_hex())
    }

    pub(crate) async fn public_key_raw(&self) -> std::result::Result<PublicKey, IdentityError> {
        self.signer
            .get_public_key()
            .await
            .map_err(|e| IdentityError::Signer(e.to_string()))
    }

    /// Sign a prepared event.
    pub async fn sign(&self, unsigned: UnsignedEvent) -> Result<Event> {
        let event = self
            .signer
            .sign_event(unsigned)
            .await
            .map_err(|e| IdentityError::Signer(e.to_string()))?;
        Ok(event)
    }

    /// Build with our public key, then sign.
    pub async fn sign_builder(&self, builder: EventBuilder) -> Result<Event> {
        let public_key = self.public_key_raw().await?;
        self.sign(builder.build(public_key)).await
    }
}

/// The identity, or `MissingSigner`.
pub fn require(identity: Option<&Identity>) -> std::result::Result<&Identity, IdentityError> {
    identity.ok_or(IdentityError::MissingSigner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_prefix() {
        let err = Identity::from_secret("npub1abcdef").unwrap_err();
        assert_eq!(err, IdentityError::WrongPrefix);
    }

    #[test]
    fn rejects_malformed_key() {
        let err = Identity::from_secret("nsec1notbech32atall").unwrap_err();
        assert!(matches!(err, IdentityError::MalformedSecretKey(_)));
    }

    #[test]
    fn missing_signer() {
        assert_eq!(require(None).unwrap_err(), IdentityError::MissingSigner);
    }

    #[tokio::test]
    async fn local_key_signs_as_itself() {
        let keys = Keys::generate();
        let nsec = keys.secret_key().to_bech32().unwrap();
        let identity = Identity::from_secret(&format!("  {nsec}\n")).unwrap();

        assert_eq!(identity.public_key().await.unwrap(), keys.public_key().to_hex());
        let event = identity
            .sign_builder(EventBuilder::new(Kind::TextNote, "hi"))
            .await
            .unwrap();
        assert_eq!(event.pubkey, keys.public_key());
        assert!(event.verify().is_ok());
    }

    #[tokio::test]
    async fn external_signer_is_used() {
        let keys = Keys::generate();
        let identity = Identity::external(Arc::new(keys.clone()));
        assert_eq!(identity.public_key().await.unwrap(), keys.public_key().to_hex());
    }
}
