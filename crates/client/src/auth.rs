// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Authentication, users and roles.

use etcdlink_api::pb::{
    authpb::{Permission, permission},
    etcdserverpb::{
        AuthDisableRequest, AuthDisableResponse, AuthEnableRequest, AuthEnableResponse,
        AuthRoleAddRequest, AuthRoleAddResponse, AuthRoleDeleteRequest, AuthRoleDeleteResponse,
        AuthRoleGetRequest, AuthRoleGetResponse, AuthRoleGrantPermissionRequest,
        AuthRoleGrantPermissionResponse, AuthRoleListRequest, AuthRoleListResponse,
        AuthRoleRevokePermissionRequest, AuthRoleRevokePermissionResponse,
        AuthUserAddRequest, AuthUserAddResponse, AuthUserChangePasswordRequest,
        AuthUserChangePasswordResponse, AuthUserDeleteRequest, AuthUserDeleteResponse,
        AuthUserGetRequest, AuthUserGetResponse, AuthUserGrantRoleRequest,
        AuthUserGrantRoleResponse, AuthUserListRequest, AuthUserListResponse,
        AuthUserRevokeRoleRequest, AuthUserRevokeRoleResponse, AuthenticateRequest,
        AuthenticateResponse, auth_client::AuthClient,
    },
};
use snafu::ensure;
use strum_macros::Display;

use crate::{
    client::AuthChannel,
    dispatch::{UnaryCall, unary},
    range::KeyRange,
    types::{ClientResult, InvalidArgumentSnafu},
};

/// Access a role is granted over a key range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum PermissionType {
    Read,
    Write,
    ReadWrite,
}

impl From<PermissionType> for permission::Type {
    fn from(kind: PermissionType) -> Self {
        match kind {
            PermissionType::Read => permission::Type::Read,
            PermissionType::Write => permission::Type::Write,
            PermissionType::ReadWrite => permission::Type::Readwrite,
        }
    }
}

fn non_blank(what: &str, value: impl Into<String>) -> ClientResult<String> {
    let value = value.into();
    ensure!(
        !value.trim().is_empty(),
        InvalidArgumentSnafu {
            message: format!("{what} can not be empty"),
        }
    );
    Ok(value)
}

/// Authentication, user and role management.
#[derive(Debug, Clone)]
pub struct AuthService {
    client: AuthClient<AuthChannel>,
}

impl AuthService {
    pub(crate) fn new(client: AuthClient<AuthChannel>) -> Self { Self { client } }

    pub fn auth_enable(&self) -> UnaryCall<AuthEnableResponse> {
        let mut client = self.client.clone();
        unary("Auth/AuthEnable", Ok(AuthEnableRequest {}), move |request| async move {
            client.auth_enable(request).await
        })
    }

    pub fn auth_disable(&self) -> UnaryCall<AuthDisableResponse> {
        let mut client = self.client.clone();
        unary("Auth/AuthDisable", Ok(AuthDisableRequest {}), move |request| async move {
            client.auth_disable(request).await
        })
    }

    /// Exchanges credentials for a token.
    pub fn authenticate(&self, name: impl Into<String>, password: impl Into<String>) -> UnaryCall<AuthenticateResponse> {
        let request = non_blank("user name", name).and_then(|name| {
            Ok(AuthenticateRequest {
                name,
                password: non_blank("password", password)?,
            })
        });
        let mut client = self.client.clone();
        unary("Auth/Authenticate", request, move |request| async move {
            client.authenticate(request).await
        })
    }

    pub fn user_add(&self, name: impl Into<String>, password: impl Into<String>) -> UnaryCall<AuthUserAddResponse> {
        let request = non_blank("user name", name).and_then(|name| {
            Ok(AuthUserAddRequest {
                name,
                password: non_blank("password", password)?,
            })
        });
        let mut client = self.client.clone();
        unary("Auth/UserAdd", request, move |request| async move {
            client.user_add(request).await
        })
    }

    pub fn user_get(&self, name: impl Into<String>) -> UnaryCall<AuthUserGetResponse> {
        let request = non_blank("user name", name).map(|name| AuthUserGetRequest { name });
        let mut client = self.client.clone();
        unary("Auth/UserGet", request, move |request| async move {
            client.user_get(request).await
        })
    }

    pub fn user_list(&self) -> UnaryCall<AuthUserListResponse> {
        let mut client = self.client.clone();
        unary("Auth/UserList", Ok(AuthUserListRequest {}), move |request| async move {
            client.user_list(request).await
        })
    }

    pub fn user_delete(&self, name: impl Into<String>) -> UnaryCall<AuthUserDeleteResponse> {
        let request = non_blank("user name", name).map(|name| AuthUserDeleteRequest { name });
        let mut client = self.client.clone();
        unary("Auth/UserDelete", request, move |request| async move {
            client.user_delete(request).await
        })
    }

    pub fn user_change_password(
        &self,
        name: impl Into<String>,
        password: impl Into<String>,
    ) -> UnaryCall<AuthUserChangePasswordResponse> {
        let request = non_blank("user name", name).and_then(|name| {
            Ok(AuthUserChangePasswordRequest {
                name,
                password: non_blank("password", password)?,
            })
        });
        let mut client = self.client.clone();
        unary("Auth/UserChangePassword", request, move |request| async move {
            client.user_change_password(request).await
        })
    }

    pub fn user_grant_role(&self, user: impl Into<String>, role: impl Into<String>) -> UnaryCall<AuthUserGrantRoleResponse> {
        let request = non_blank("user name", user).and_then(|user| {
            Ok(AuthUserGrantRoleRequest {
                user,
                role: non_blank("role", role)?,
            })
        });
        let mut client = self.client.clone();
        unary("Auth/UserGrantRole", request, move |request| async move {
            client.user_grant_role(request).await
        })
    }

    pub fn user_revoke_role(
        &self,
        name: impl Into<String>,
        role: impl Into<String>,
    ) -> UnaryCall<AuthUserRevokeRoleResponse> {
        let request = non_blank("user name", name).and_then(|name| {
            Ok(AuthUserRevokeRoleRequest {
                name,
                role: non_blank("role", role)?,
            })
        });
        let mut client = self.client.clone();
        unary("Auth/UserRevokeRole", request, move |request| async move {
            client.user_revoke_role(request).await
        })
    }

    pub fn role_add(&self, name: impl Into<String>) -> UnaryCall<AuthRoleAddResponse> {
        let request = non_blank("role", name).map(|name| AuthRoleAddRequest { name });
        let mut client = self.client.clone();
        unary("Auth/RoleAdd", request, move |request| async move {
            client.role_add(request).await
        })
    }

    pub fn role_get(&self, role: impl Into<String>) -> UnaryCall<AuthRoleGetResponse> {
        let request = non_blank("role", role).map(|role| AuthRoleGetRequest { role });
        let mut client = self.client.clone();
        unary("Auth/RoleGet", request, move |request| async move {
            client.role_get(request).await
        })
    }

    pub fn role_list(&self) -> UnaryCall<AuthRoleListResponse> {
        let mut client = self.client.clone();
        unary("Auth/RoleList", Ok(AuthRoleListRequest {}), move |request| async move {
            client.role_list(request).await
        })
    }

    pub fn role_delete(&self, role: impl Into<String>) -> UnaryCall<AuthRoleDeleteResponse> {
        let request = non_blank("role", role).map(|role| AuthRoleDeleteRequest { role });
        let mut client = self.client.clone();
        unary("Auth/RoleDelete", request, move |request| async move {
            client.role_delete(request).await
        })
    }

    /// Grants `role` access to `key` (or the range `range` describes).
    pub fn role_grant_permission(
        &self,
        role: impl Into<String>,
        key: impl Into<Vec<u8>>,
        range: &KeyRange,
        kind: PermissionType,
    ) -> UnaryCall<AuthRoleGrantPermissionResponse> {
        let (key, range_end) = range.resolve(key.into());
        let request = non_blank("role", role).map(|name| AuthRoleGrantPermissionRequest {
            name,
            perm: Some(Permission {
                perm_type: permission::Type::from(kind) as i32,
                key,
                range_end,
            }),
        });
        let mut client = self.client.clone();
        unary("Auth/RoleGrantPermission", request, move |request| async move {
            client.role_grant_permission(request).await
        })
    }

    pub fn role_revoke_permission(
        &self,
        role: impl Into<String>,
        key: impl Into<Vec<u8>>,
        range: &KeyRange,
    ) -> UnaryCall<AuthRoleRevokePermissionResponse> {
        let (key, range_end) = range.resolve(key.into());
        let request = non_blank("role", role).map(|role| AuthRoleRevokePermissionRequest {
            role,
            key,
            range_end,
        });
        let mut client = self.client.clone();
        unary("Auth/RoleRevokePermission", request, move |request| async move {
            client.role_revoke_permission(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(""; "empty")]
    #[test_case("  \t"; "whitespace")]
    fn test_blank_names_rejected(name: &str) {
        assert!(non_blank("role", name).is_err());
    }

    #[test]
    fn test_permission_type_mapping() {
        assert_eq!(permission::Type::from(PermissionType::ReadWrite), permission::Type::Readwrite);
        assert_eq!(PermissionType::Read.to_string(), "Read");
    }
}
