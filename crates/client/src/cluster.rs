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


//! Cluster membership.

use etcdlink_api::pb::etcdserverpb::{
    MemberAddRequest, MemberAddResponse, MemberListRequest, MemberListResponse,
    MemberRemoveRequest, MemberRemoveResponse, MemberUpdateRequest, MemberUpdateResponse,
    cluster_client::ClusterClient,
};
use snafu::ensure;

use crate::{
    client::AuthChannel,
    dispatch::{UnaryCall, unary},
    types::{ClientResult, InvalidArgumentSnafu},
};

fn peer_urls<I, S>(urls: I) -> ClientResult<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
    ensure!(
        !urls.is_empty(),
        InvalidArgumentSnafu {
            message: "at least one peer url is required",
        }
    );
    Ok(urls)
}

/// Cluster membership operations.
#[derive(Debug, Clone)]
pub struct ClusterService {
    client: ClusterClient<AuthChannel>,
}

impl ClusterService {
    pub(crate) fn new(client: ClusterClient<AuthChannel>) -> Self { Self { client } }

    /// Lists the members of the cluster.
    pub fn member_list(&self) -> UnaryCall<MemberListResponse> {
        let mut client = self.client.clone();
        unary(
            "Cluster/MemberList",
            Ok(MemberListRequest { linearizable: true }),
            move |request| async move { client.member_list(request).await },
        )
    }

    /// Adds a member reachable at `peer_urls`.
    ///
    /// # Arguments
    ///
    /// * `peer_urls` - Raft peer addresses of the new member
    /// * `is_learner` - Add the member as a non-voting learner
    pub fn member_add<I, S>(&self, peer_urls: I, is_learner: bool) -> UnaryCall<MemberAddResponse>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = self::peer_urls(peer_urls).map(|peer_urls| MemberAddRequest {
            peer_urls,
            is_learner,
        });
        let mut client = self.client.clone();
        unary("Cluster/MemberAdd", request, move |request| async move {
            client.member_add(request).await
        })
    }

    pub fn member_remove(&self, member_id: u64) -> UnaryCall<MemberRemoveResponse> {
        let mut client = self.client.clone();
        unary(
            "Cluster/MemberRemove",
            Ok(MemberRemoveRequest { id: member_id }),
            move |request| async move { client.member_remove(request).await },
        )
    }

    /// Replaces the peer urls of a member.
    pub fn member_update<I, S>(&self, member_id: u64, peer_urls: I) -> UnaryCall<MemberUpdateResponse>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = self::peer_urls(peer_urls).map(|peer_urls| MemberUpdateRequest {
            id: member_id,
            peer_urls,
        });
        let mut client = self.client.clone();
        unary("Cluster/MemberUpdate", request, move |request| async move {
            client.member_update(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_urls_required() {
        assert!(peer_urls(Vec::<String>::new()).is_err());
        assert_eq!(
            peer_urls(["http://10.0.0.4:2380"]).unwrap(),
            vec!["http://10.0.0.4:2380".to_string()]
        );
    }
}
