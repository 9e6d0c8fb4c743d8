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


//! Maintenance operations: alarms, defragmentation and member status.

use etcdlink_api::pb::etcdserverpb::{
    AlarmMember, AlarmRequest, AlarmResponse, AlarmType, DefragmentRequest, DefragmentResponse,
    StatusRequest, StatusResponse, alarm_request::AlarmAction, maintenance_client::MaintenanceClient,
};

use crate::{
    client::AuthChannel,
    dispatch::{UnaryCall, unary},
};

/// Maintenance operations.
///
/// Requests go to whichever member the channel picks.
#[derive(Debug, Clone)]
pub struct MaintenanceService {
    client: MaintenanceClient<AuthChannel>,
}

impl MaintenanceService {
    pub(crate) fn new(client: MaintenanceClient<AuthChannel>) -> Self { Self { client } }

    /// Lists every active alarm in the cluster.
    pub fn list_alarms(&self) -> UnaryCall<AlarmResponse> {
        let request = AlarmRequest {
            action:    AlarmAction::Get as i32,
            member_id: 0,
            alarm:     AlarmType::None as i32,
        };
        let mut client = self.client.clone();
        unary("Maintenance/Alarm", Ok(request), move |request| async move {
            client.alarm(request).await
        })
    }

    /// Clears one alarm previously returned by [`list_alarms`].
    ///
    /// [`list_alarms`]: MaintenanceService::list_alarms
    pub fn deactivate_alarm(&self, alarm: &AlarmMember) -> UnaryCall<AlarmResponse> {
        let request = AlarmRequest {
            action:    AlarmAction::Deactivate as i32,
            member_id: alarm.member_id,
            alarm:     alarm.alarm,
        };
        let mut client = self.client.clone();
        unary("Maintenance/Alarm", Ok(request), move |request| async move {
            client.alarm(request).await
        })
    }

    /// Defragments the backend of the member serving the request.
    pub fn defragment(&self) -> UnaryCall<DefragmentResponse> {
        let mut client = self.client.clone();
        unary(
            "Maintenance/Defragment",
            Ok(DefragmentRequest {}),
            move |request| async move { client.defragment(request).await },
        )
    }

    /// Reports version, db size and raft state of the member serving the
    /// request.
    pub fn status(&self) -> UnaryCall<StatusResponse> {
        let mut client = self.client.clone();
        unary("Maintenance/Status", Ok(StatusRequest {}), move |request| async move {
            client.status(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{client::TokenInterceptor, types::ClientError};

    #[tokio::test]
    async fn test_unreachable_member_surfaces_as_grpc_error() {
        let channel = tonic::transport::Endpoint::from_static("http://127.0.0.1:1")
            .connect_timeout(Duration::from_secs(1))
            .connect_lazy();
        let maintenance =
            MaintenanceService::new(MaintenanceClient::with_interceptor(channel, TokenInterceptor::anonymous()));

        let err = maintenance.status().await.unwrap_err();
        assert!(matches!(err, ClientError::Grpc { .. }), "{err}");
    }
}
