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


//! Per-request options.
//!
//! Every option type is built with [`bon`] builders and checked against the
//! detected [`ServerCapabilities`] before a request leaves the client.

use etcdlink_api::pb::etcdserverpb::{
    CompactionRequest, DeleteRangeRequest, PutRequest, RangeRequest, WatchCreateRequest,
    range_request, watch_create_request::FilterType,
};
use snafu::ensure;
use strum_macros::Display;

use crate::{
    range::KeyRange,
    types::{ClientResult, InvalidArgumentSnafu},
    version::{Feature, ServerCapabilities},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
pub enum SortOrder {
    #[default]
    None,
    Ascend,
    Descend,
}

impl From<SortOrder> for range_request::SortOrder {
    fn from(order: SortOrder) -> Self {
        match order {
            SortOrder::None => Self::None,
            SortOrder::Ascend => Self::Ascend,
            SortOrder::Descend => Self::Descend,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
pub enum SortTarget {
    #[default]
    Key,
    Version,
    Create,
    Mod,
    Value,
}

impl From<SortTarget> for range_request::SortTarget {
    fn from(target: SortTarget) -> Self {
        match target {
            SortTarget::Key => Self::Key,
            SortTarget::Version => Self::Version,
            SortTarget::Create => Self::Create,
            SortTarget::Mod => Self::Mod,
            SortTarget::Value => Self::Value,
        }
    }
}

/// Options of a range read.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct GetOptions {
    #[builder(default)]
    pub range:               KeyRange,
    /// Zero means no limit.
    #[builder(default)]
    pub limit:               i64,
    /// Zero reads the latest revision.
    #[builder(default)]
    pub revision:            i64,
    #[builder(default)]
    pub sort_order:          SortOrder,
    #[builder(default)]
    pub sort_target:         SortTarget,
    #[builder(default)]
    pub serializable:        bool,
    #[builder(default)]
    pub keys_only:           bool,
    #[builder(default)]
    pub count_only:          bool,
    #[builder(default)]
    pub min_mod_revision:    i64,
    #[builder(default)]
    pub max_mod_revision:    i64,
    #[builder(default)]
    pub min_create_revision: i64,
    #[builder(default)]
    pub max_create_revision: i64,
}

impl GetOptions {
    pub fn validate(&self, _capabilities: &ServerCapabilities) -> ClientResult<()> {
        ensure!(
            self.limit >= 0,
            InvalidArgumentSnafu {
                message: format!("limit must be >= 0, got {}", self.limit),
            }
        );
        ensure!(
            self.revision >= 0,
            InvalidArgumentSnafu {
                message: format!("revision must be >= 0, got {}", self.revision),
            }
        );
        Ok(())
    }

    pub(crate) fn to_request(&self, key: Vec<u8>) -> RangeRequest {
        let (key, range_end) = self.range.resolve(key);
        RangeRequest {
            key,
            range_end,
            limit: self.limit,
            revision: self.revision,
            sort_order: range_request::SortOrder::from(self.sort_order) as i32,
            sort_target: range_request::SortTarget::from(self.sort_target) as i32,
            serializable: self.serializable,
            keys_only: self.keys_only,
            count_only: self.count_only,
            min_mod_revision: self.min_mod_revision,
            max_mod_revision: self.max_mod_revision,
            min_create_revision: self.min_create_revision,
            max_create_revision: self.max_create_revision,
        }
    }
}

/// Options of a put.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct PutOptions {
    /// Lease to attach the key to, zero for none.
    #[builder(default)]
    pub lease_id:     i64,
    #[builder(default)]
    pub prev_kv:      bool,
    #[builder(default)]
    pub ignore_value: bool,
    #[builder(default)]
    pub ignore_lease: bool,
}

impl PutOptions {
    pub fn validate(&self, capabilities: &ServerCapabilities) -> ClientResult<()> {
        ensure!(
            self.lease_id >= 0,
            InvalidArgumentSnafu {
                message: format!("lease id must be >= 0, got {}", self.lease_id),
            }
        );
        if self.prev_kv {
            capabilities.require(Feature::PutPrevKv)?;
        }
        if self.ignore_value {
            capabilities.require(Feature::PutIgnoreValue)?;
        }
        if self.ignore_lease {
            capabilities.require(Feature::PutIgnoreLease)?;
        }
        Ok(())
    }

    pub(crate) fn to_request(&self, key: Vec<u8>, value: Vec<u8>) -> PutRequest {
        PutRequest {
            key,
            value,
            lease: self.lease_id,
            prev_kv: self.prev_kv,
            ignore_value: self.ignore_value,
            ignore_lease: self.ignore_lease,
        }
    }
}

/// Options of a range delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct DeleteOptions {
    #[builder(default)]
    pub range:   KeyRange,
    #[builder(default)]
    pub prev_kv: bool,
}

impl DeleteOptions {
    pub fn validate(&self, capabilities: &ServerCapabilities) -> ClientResult<()> {
        if self.prev_kv {
            capabilities.require(Feature::DeletePrevKv)?;
        }
        Ok(())
    }

    pub(crate) fn to_request(&self, key: Vec<u8>) -> DeleteRangeRequest {
        let (key, range_end) = self.range.resolve(key);
        DeleteRangeRequest {
            key,
            range_end,
            prev_kv: self.prev_kv,
        }
    }
}

/// Options of a compaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bon::Builder)]
pub struct CompactOptions {
    /// Wait until the compaction is physically applied to the backend.
    #[builder(default)]
    pub physical: bool,
}

impl CompactOptions {
    pub(crate) fn to_request(self, revision: i64) -> ClientResult<CompactionRequest> {
        ensure!(
            revision > 0,
            InvalidArgumentSnafu {
                message: format!("compaction revision must be > 0, got {revision}"),
            }
        );
        Ok(CompactionRequest {
            revision,
            physical: self.physical,
        })
    }
}

/// Event kinds a watch can ask the server to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum WatchFilter {
    NoPut,
    NoDelete,
}

impl From<WatchFilter> for FilterType {
    fn from(filter: WatchFilter) -> Self {
        match filter {
            WatchFilter::NoPut => FilterType::Noput,
            WatchFilter::NoDelete => FilterType::Nodelete,
        }
    }
}

/// Options of a watch.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct WatchOptions {
    #[builder(default)]
    pub range:           KeyRange,
    /// Inclusive revision to start from. Zero or negative values watch from
    /// the current revision and are passed through untouched.
    #[builder(default)]
    pub start_revision:  i64,
    #[builder(default)]
    pub progress_notify: bool,
    #[builder(default)]
    pub prev_kv:         bool,
    #[builder(default)]
    pub filters:         Vec<WatchFilter>,
}

impl WatchOptions {
    pub fn validate(&self, capabilities: &ServerCapabilities) -> ClientResult<()> {
        if self.prev_kv {
            capabilities.require(Feature::WatchPrevKv)?;
        }
        if !self.filters.is_empty() {
            capabilities.require(Feature::WatchFilters)?;
        }
        Ok(())
    }

    pub(crate) fn to_create_request(&self, key: Vec<u8>) -> WatchCreateRequest {
        let (key, range_end) = self.range.resolve(key);
        let mut filters: Vec<i32> = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            let filter = FilterType::from(*filter) as i32;
            if !filters.contains(&filter) {
                filters.push(filter);
            }
        }
        WatchCreateRequest {
            key,
            range_end,
            start_revision: self.start_revision,
            progress_notify: self.progress_notify,
            filters,
            prev_kv: self.prev_kv,
            ..Default::default()
        }
    }
}
