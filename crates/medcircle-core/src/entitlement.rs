//! The entitlement clock: trial windows, creation cooldowns, and the
//! free-tier daily device quota.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use medcircle_storage::{DeviceId, Group, Store, UserId};

use crate::clock::Clock;
use crate::error::EngineError;
use crate::evaluator;

/// Error type for the device attestation store.
#[derive(Debug, Error)]
pub enum AttestationError {
    #[error("attestation unsupported on this device")]
    Unsupported,

    #[error("attestation backend error: {0}")]
    Backend(String),
}

/// Write-once-per-day bit store keyed by a platform-attested device token.
///
/// The token survives app deletion, which is why the daily quota is keyed
/// by device token rather than actor id: this is the one place state must
/// outlive the actor identifier itself.
#[async_trait]
pub trait AttestationStore: Send + Sync {
    async fn get_token(&self) -> Result<String, AttestationError>;
    async fn read_bit(&self, token: &str) -> Result<bool, AttestationError>;
    async fn write_bit(&self, token: &str, value: bool) -> Result<(), AttestationError>;
}

/// Owns `trial_valid`, cooldown expiry, and the daily quota.
pub struct EntitlementClock {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    attestation: Option<Arc<dyn AttestationStore>>,
}

impl EntitlementClock {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            attestation: None,
        }
    }

    /// Attestation-backed variant: the quota additionally survives app
    /// reinstall.
    pub fn with_attestation(mut self, attestation: Arc<dyn AttestationStore>) -> Self {
        self.attestation = Some(attestation);
        self
    }

    pub fn is_trial_valid(&self, group: &Group) -> bool {
        evaluator::trial_valid(group, self.clock.now())
    }

    /// Gate for group creation: fails with `CooldownActive` while a
    /// leave/removal cooldown is running. A cooldown that has elapsed is
    /// healed lazily here, not by a background job.
    pub async fn ensure_can_create(&self, actor: &UserId) -> Result<(), EngineError> {
        let profile = self.store.get_or_create_profile(actor).await?;
        let now = self.clock.now();

        if let Some(end) = profile.cooldown_end_date {
            if now < end {
                return Err(EngineError::CooldownActive(end));
            }
        }
        if !profile.can_create_group {
            // cooldown elapsed but the flag is stale
            self.store.restore_create_permission(actor).await?;
        }
        Ok(())
    }

    /// Free-tier daily quota: one session per device per calendar day.
    ///
    /// Attestation failures degrade to "quota available" rather than
    /// blocking use.
    pub async fn can_access_today(&self, device: &DeviceId) -> Result<bool, EngineError> {
        let today = self.clock.now().date_naive();

        if let Some(session) = self.store.get_access_session(device, today).await? {
            if session.used {
                return Ok(false);
            }
        }

        if let Some(att) = &self.attestation {
            match att.get_token().await {
                Ok(token) => match att.read_bit(&token).await {
                    Ok(true) => return Ok(false),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "attestation read failed; granting quota");
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "attestation unavailable; granting quota");
                }
            }
        }

        Ok(true)
    }

    /// Consume today's quota. Idempotent per (device, day). The attestation
    /// write is best-effort.
    pub async fn mark_used_today(&self, device: &DeviceId) -> Result<(), EngineError> {
        let today = self.clock.now().date_naive();
        self.store.mark_access_used(device, today).await?;

        if let Some(att) = &self.attestation {
            let result = async {
                let token = att.get_token().await?;
                att.write_bit(&token, true).await
            }
            .await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "attestation write failed");
            }
        }
        Ok(())
    }
}
