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


//! Protobuf packages of the etcd v3 API, generated from `proto/` at build
//! time.

#[allow(clippy::all)]
pub mod mvccpb {
    tonic::include_proto!("mvccpb");
}

#[allow(clippy::all)]
pub mod authpb {
    tonic::include_proto!("authpb");
}

/// Requests, responses and client stubs of the `KV`, `Watch`, `Lease`,
/// `Cluster`, `Maintenance` and `Auth` services.
#[allow(clippy::all)]
pub mod etcdserverpb {
    tonic::include_proto!("etcdserverpb");
}
