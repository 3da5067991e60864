// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

#![allow(clippy::module_name_repetitions)]

use thiserror::Error;

pub(crate) mod clients;
pub(crate) mod grants;
pub(crate) mod resources;

/// Error when an invalid state transition is attempted.
#[derive(Debug, Error)]
#[error("invalid state transition")]
pub struct InvalidTransitionError;

pub use self::{
    clients::Client,
    grants::{
        Grant, GrantState, GrantType, MAX_CLEANUP_BATCH_SIZE, is_eligible_for_removal,
    },
    resources::{ApiResource, IdentityResource, Resources},
};
