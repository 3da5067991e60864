// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Helpers for the code paths which redeem grants while the cleanup sweeper
//! may be deleting them.
//!
//! No lock is shared with the sweeper. A writer may read a grant right before
//! the sweeper deletes it, in which case its next write on that grant fails
//! with a [`RepositoryErrorKind::NotFound`] error. These helpers turn that
//! case, and the case of a grant which is consumed or expired, into
//! [`ConsumeOutcome::AlreadyGone`].
//!
//! [`RepositoryErrorKind::NotFound`]: crate::RepositoryErrorKind::NotFound

use sigil_data_model::Grant;

use crate::{Clock, RepositoryAccess, RepositoryError};

/// The result of trying to redeem a grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The grant was valid and is now consumed
    Consumed(Grant),

    /// The grant is missing, expired, or was already consumed
    AlreadyGone,
}

impl ConsumeOutcome {
    /// Returns the consumed grant, if any
    #[must_use]
    pub fn into_grant(self) -> Option<Grant> {
        match self {
            Self::Consumed(grant) => Some(grant),
            Self::AlreadyGone => None,
        }
    }
}

/// Lookup a grant, treating consumed and expired grants as missing
///
/// # Errors
///
/// Returns an error if the underlying repository fails
pub async fn find_valid_grant<R>(
    repo: &mut R,
    clock: &dyn Clock,
    key: &str,
) -> Result<Option<Grant>, R::Error>
where
    R: RepositoryAccess + ?Sized,
{
    let grant = repo.grant().lookup(key).await?;
    Ok(grant.filter(|grant| grant.is_active(clock.now())))
}

/// Lookup a grant and mark it as consumed, if it is still valid
///
/// # Errors
///
/// Returns an error if the underlying repository fails for any other reason
/// than the grant having disappeared
pub async fn consume_grant<R>(
    repo: &mut R,
    clock: &dyn Clock,
    key: &str,
) -> Result<ConsumeOutcome, RepositoryError>
where
    R: RepositoryAccess<Error = RepositoryError> + ?Sized,
{
    let Some(grant) = find_valid_grant(repo, clock, key).await? else {
        return Ok(ConsumeOutcome::AlreadyGone);
    };

    match repo.grant().consume(clock, grant).await {
        Ok(grant) => Ok(ConsumeOutcome::Consumed(grant)),
        Err(e) if e.is_not_found() => {
            tracing::debug!(grant.key = key, "Grant disappeared before it could be consumed");
            Ok(ConsumeOutcome::AlreadyGone)
        }
        Err(e) => Err(e),
    }
}
