// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{convert::Infallible, fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::InvalidTransitionError;

/// The kind of artifact a [`Grant`] represents.
///
/// Unknown discriminators are kept as [`GrantType::Other`] so that rows
/// written by a newer issuer still load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
    ReferenceToken,
    UserConsent,
    DeviceCode,
    UserSession,
    Other(String),
}

impl GrantType {
    /// The string stored in the `grant_type` column
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
            Self::ReferenceToken => "reference_token",
            Self::UserConsent => "user_consent",
            Self::DeviceCode => "device_code",
            Self::UserSession => "user_session",
            Self::Other(other) => other,
        }
    }
}

impl Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "authorization_code" => Self::AuthorizationCode,
            "refresh_token" => Self::RefreshToken,
            "reference_token" => Self::ReferenceToken,
            "user_consent" => Self::UserConsent,
            "device_code" => Self::DeviceCode,
            "user_session" => Self::UserSession,
            other => Self::Other(other.to_owned()),
        })
    }
}

impl From<String> for GrantType {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(grant_type) => grant_type,
            Err(e) => match e {},
        }
    }
}

impl From<GrantType> for String {
    fn from(value: GrantType) -> Self {
        match value {
            GrantType::Other(other) => other,
            known => known.as_str().to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum GrantState {
    #[default]
    Valid,
    Consumed {
        consumed_at: DateTime<Utc>,
    },
}

impl GrantState {
    /// Consume the grant, returning a new state.
    ///
    /// # Errors
    ///
    /// Returns an error if the grant was already consumed.
    fn consume(self, consumed_at: DateTime<Utc>) -> Result<Self, InvalidTransitionError> {
        match self {
            Self::Valid => Ok(Self::Consumed { consumed_at }),
            Self::Consumed { .. } => Err(InvalidTransitionError),
        }
    }

    /// Returns `true` if the grant state is [`Valid`].
    ///
    /// [`Valid`]: GrantState::Valid
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Returns `true` if the grant state is [`Consumed`].
    ///
    /// [`Consumed`]: GrantState::Consumed
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        matches!(self, Self::Consumed { .. })
    }

    /// The time at which the grant was consumed, if it was.
    #[must_use]
    pub fn consumed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Valid => None,
            Self::Consumed { consumed_at } => Some(*consumed_at),
        }
    }
}

/// Largest number of grants the cleanup selects and deletes in one batch
pub const MAX_CLEANUP_BATCH_SIZE: usize = 10_000;

/// Whether a grant with the given expiration and consumption times can be
/// deleted at `now`.
///
/// A consumed grant is always eligible. An unconsumed grant is eligible once
/// its expiration is reached. A grant with neither is never eligible.
#[must_use]
pub fn is_eligible_for_removal(
    expires_at: Option<DateTime<Utc>>,
    consumed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    consumed_at.is_some() || expires_at.is_some_and(|expires_at| expires_at <= now)
}

/// A persisted grant: an authorization code, a token, a device code or a user
/// session, as issued by the token service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grant {
    /// Unique key assigned by the issuer
    pub key: String,
    pub grant_type: GrantType,
    pub subject_id: Option<String>,
    pub session_id: Option<String>,
    pub client_id: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub state: GrantState,

    /// Opaque serialized payload, never interpreted by the store
    pub data: String,
}

impl std::ops::Deref for Grant {
    type Target = GrantState;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl Grant {
    /// Whether the grant has reached its expiration at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Whether the cleanup sweeper is allowed to delete this grant at `now`
    #[must_use]
    pub fn is_eligible_for_removal(&self, now: DateTime<Utc>) -> bool {
        is_eligible_for_removal(self.expires_at, self.state.consumed_at(), now)
    }

    /// Whether the grant can still be redeemed at `now`.
    ///
    /// Consumed grants are logically dead even while they are still
    /// physically stored.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.state.is_valid() && !self.is_expired(now)
    }

    /// Mark the grant as consumed
    ///
    /// # Parameters
    ///
    /// * `consumed_at` - The time at which the grant was consumed
    ///
    /// # Errors
    ///
    /// Returns an error if the grant is already consumed
    pub fn consume(mut self, consumed_at: DateTime<Utc>) -> Result<Self, InvalidTransitionError> {
        self.state = self.state.consume(consumed_at)?;
        Ok(self)
    }
}
