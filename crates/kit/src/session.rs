//! Provisioning sessions and continuation tokens
//!
//! A session records a phase-1 run that is waiting for phase 2. The
//! continuation token handed back by phase 1 is an HMAC-SHA256 over the
//! organization, the initiator and both membership engines, keyed by a
//! secret only the kit holds.

use std::fmt;

use ring::hmac;
use ring::rand::SystemRandom;
use serde::{Deserialize, Serialize};

use orgkit_config::VoteDurations;
use orgkit_core::utils::hex_bytes;
use orgkit_core::{Address, BlockNumber};

use crate::kit::Phase1Receipt;
use crate::{KitError, KitResult};

const TOKEN_DOMAIN: &[u8] = b"orgkit/continuation/v1";

/// Proof that a phase-1 run produced a given set of addresses
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationToken(#[serde(with = "hex_bytes")] Vec<u8>);

impl ContinuationToken {
    /// Wrap raw tag bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContinuationToken({})", self)
    }
}

/// Signs and checks continuation tokens
pub struct SessionSigner {
    key: hmac::Key,
}

impl SessionSigner {
    /// A signer with a freshly generated secret
    pub fn generate() -> KitResult<Self> {
        let rng = SystemRandom::new();
        let key = hmac::Key::generate(hmac::HMAC_SHA256, &rng)
            .map_err(|_| KitError::Crypto("failed to generate session secret".to_string()))?;
        Ok(Self { key })
    }

    /// A signer with a fixed secret
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    pub fn sign(
        &self,
        organization: Address,
        initiator: Address,
        membership_voting: Address,
        supermajority_voting: Address,
    ) -> ContinuationToken {
        let message = Self::message(organization, initiator, membership_voting, supermajority_voting);
        ContinuationToken(hmac::sign(&self.key, &message).as_ref().to_vec())
    }

    pub fn verify(
        &self,
        token: &ContinuationToken,
        organization: Address,
        initiator: Address,
        membership_voting: Address,
        supermajority_voting: Address,
    ) -> bool {
        let message = Self::message(organization, initiator, membership_voting, supermajority_voting);
        hmac::verify(&self.key, &message, token.as_bytes()).is_ok()
    }

    fn message(
        organization: Address,
        initiator: Address,
        membership_voting: Address,
        supermajority_voting: Address,
    ) -> Vec<u8> {
        let mut message = Vec::with_capacity(TOKEN_DOMAIN.len() + 4 * 20);
        message.extend_from_slice(TOKEN_DOMAIN);
        for address in [organization, initiator, membership_voting, supermajority_voting] {
            message.extend_from_slice(address.as_bytes());
        }
        message
    }
}

/// Stage of a provisioning session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Phase 1 done, waiting for phase 2
    Pending,
    /// Phase 2 started mutating; stays here if it failed part way
    Completing,
    /// Both phases done
    Completed,
}

/// Persisted record of one provisioning run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningSession {
    /// Principal that ran phase 1; the only one allowed to run phase 2
    pub initiator: Address,
    /// Everything phase 1 created
    pub phase1: Phase1Receipt,
    /// Durations of the three engines, fixed in phase 1
    pub vote_durations: VoteDurations,
    pub status: SessionStatus,
    pub begun_at_block: BlockNumber,
    pub completed_at_block: Option<BlockNumber>,
}

impl ProvisioningSession {
    /// Address of the organization being provisioned
    pub fn organization(&self) -> Address {
        self.phase1.organization
    }

    /// Storage key of a session
    pub fn storage_key(organization: &Address) -> String {
        format!("{}/{}", SESSIONS_PATH, organization)
    }
}

/// Storage prefix of session records
pub const SESSIONS_PATH: &str = "kit/sessions";
