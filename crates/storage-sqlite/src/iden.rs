// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Table and column identifiers used by [`sea_query`]

#[derive(sea_query::Iden)]
pub enum PersistedGrants {
    Table,
    GrantKey,
    GrantType,
    SubjectId,
    SessionId,
    ClientId,
    Description,
    CreatedAt,
    ExpiresAt,
    ConsumedAt,
    Data,
}

#[derive(sea_query::Iden)]
pub enum IdentityResources {
    Table,
    Name,
    DisplayName,
    Description,
    Enabled,
    UserClaims,
}

#[derive(sea_query::Iden)]
pub enum ApiResources {
    Table,
    Name,
    DisplayName,
    Description,
    Enabled,
    UserClaims,
}

#[derive(sea_query::Iden)]
pub enum ApiResourceScopes {
    Table,
    ApiResourceName,
    Scope,
}
