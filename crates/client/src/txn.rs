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


//! Transactions: compare guards plus success and failure branches.

use etcdlink_api::pb::etcdserverpb::{self as pb, compare, request_op};

use crate::{
    options::{DeleteOptions, GetOptions, PutOptions},
    range::KeyRange,
    types::ClientResult,
    version::ServerCapabilities,
};

/// Relation a compare guard checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Equal,
    Greater,
    Less,
    NotEqual,
}

/// The key attribute a compare guard reads, with the operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CompareTarget {
    Version(i64),
    CreateRevision(i64),
    ModRevision(i64),
    Value(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compare {
    key:    Vec<u8>,
    range:  KeyRange,
    op:     CompareOp,
    target: CompareTarget,
}

impl Compare {
    pub fn new(key: impl Into<Vec<u8>>, op: CompareOp, target: CompareTarget) -> Self {
        Self {
            key: key.into(),
            range: KeyRange::Single,
            op,
            target,
        }
    }

    pub fn version(key: impl Into<Vec<u8>>, op: CompareOp, version: i64) -> Self {
        Self::new(key, op, CompareTarget::Version(version))
    }

    pub fn create_revision(key: impl Into<Vec<u8>>, op: CompareOp, revision: i64) -> Self {
        Self::new(key, op, CompareTarget::CreateRevision(revision))
    }

    pub fn mod_revision(key: impl Into<Vec<u8>>, op: CompareOp, revision: i64) -> Self {
        Self::new(key, op, CompareTarget::ModRevision(revision))
    }

    pub fn value(key: impl Into<Vec<u8>>, op: CompareOp, value: impl Into<Vec<u8>>) -> Self {
        Self::new(key, op, CompareTarget::Value(value.into()))
    }

    /// Applies the guard to every key of `range` instead of the key alone.
    #[must_use]
    pub fn with_range(mut self, range: KeyRange) -> Self {
        self.range = range;
        self
    }

    fn to_wire(&self) -> pb::Compare {
        let result = match self.op {
            CompareOp::Equal => compare::CompareResult::Equal,
            CompareOp::Greater => compare::CompareResult::Greater,
            CompareOp::Less => compare::CompareResult::Less,
            CompareOp::NotEqual => compare::CompareResult::NotEqual,
        };
        let (target, union) = match &self.target {
            CompareTarget::Version(v) => (compare::CompareTarget::Version, compare::TargetUnion::Version(*v)),
            CompareTarget::CreateRevision(r) => {
                (compare::CompareTarget::Create, compare::TargetUnion::CreateRevision(*r))
            }
            CompareTarget::ModRevision(r) => (compare::CompareTarget::Mod, compare::TargetUnion::ModRevision(*r)),
            CompareTarget::Value(v) => (compare::CompareTarget::Value, compare::TargetUnion::Value(v.clone())),
        };
        let (key, range_end) = self.range.resolve(self.key.clone());
        pb::Compare {
            result: result as i32,
            target: target as i32,
            key,
            range_end,
            target_union: Some(union),
        }
    }
}

/// One operation of a transaction branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put {
        key:     Vec<u8>,
        value:   Vec<u8>,
        options: PutOptions,
    },
    Get {
        key:     Vec<u8>,
        options: GetOptions,
    },
    Delete {
        key:     Vec<u8>,
        options: DeleteOptions,
    },
}

impl TxnOp {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, options: PutOptions) -> Self {
        TxnOp::Put {
            key: key.into(),
            value: value.into(),
            options,
        }
    }

    pub fn get(key: impl Into<Vec<u8>>, options: GetOptions) -> Self {
        TxnOp::Get {
            key: key.into(),
            options,
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>, options: DeleteOptions) -> Self {
        TxnOp::Delete {
            key: key.into(),
            options,
        }
    }

    fn validate(&self, capabilities: &ServerCapabilities) -> ClientResult<()> {
        match self {
            TxnOp::Put { options, .. } => options.validate(capabilities),
            TxnOp::Get { options, .. } => options.validate(capabilities),
            TxnOp::Delete { options, .. } => options.validate(capabilities),
        }
    }

    fn to_wire(&self) -> pb::RequestOp {
        let request = match self {
            TxnOp::Put {
                key,
                value,
                options,
            } => request_op::Request::RequestPut(options.to_request(key.clone(), value.clone())),
            TxnOp::Get { key, options } => request_op::Request::RequestRange(options.to_request(key.clone())),
            TxnOp::Delete { key, options } => {
                request_op::Request::RequestDeleteRange(options.to_request(key.clone()))
            }
        };
        pb::RequestOp {
            request: Some(request),
        }
    }
}

/// An atomic if/then/else over the keyspace.
///
/// ```
/// use etcdlink_client::{Compare, CompareOp, PutOptions, Txn, TxnOp};
///
/// let txn = Txn::new()
///     .when([Compare::version("lock", CompareOp::Equal, 0)])
///     .and_then([TxnOp::put("lock", "owner-1", PutOptions::default())]);
/// assert_eq!(txn.compares().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Txn {
    compare: Vec<Compare>,
    success: Vec<TxnOp>,
    failure: Vec<TxnOp>,
}

impl Txn {
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn when(mut self, compares: impl IntoIterator<Item = Compare>) -> Self {
        self.compare.extend(compares);
        self
    }

    #[must_use]
    pub fn and_then(mut self, ops: impl IntoIterator<Item = TxnOp>) -> Self {
        self.success.extend(ops);
        self
    }

    #[must_use]
    pub fn or_else(mut self, ops: impl IntoIterator<Item = TxnOp>) -> Self {
        self.failure.extend(ops);
        self
    }

    pub fn compares(&self) -> &[Compare] { &self.compare }

    pub fn success(&self) -> &[TxnOp] { &self.success }

    pub fn failure(&self) -> &[TxnOp] { &self.failure }

    pub fn validate(&self, capabilities: &ServerCapabilities) -> ClientResult<()> {
        self.success
            .iter()
            .chain(&self.failure)
            .try_for_each(|op| op.validate(capabilities))
    }

    pub(crate) fn to_request(&self) -> pb::TxnRequest {
        pb::TxnRequest {
            compare: self.compare.iter().map(Compare::to_wire).collect(),
            success: self.success.iter().map(TxnOp::to_wire).collect(),
            failure: self.failure.iter().map(TxnOp::to_wire).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::EtcdVersion;

    #[test]
    fn test_txn_to_request() {
        let txn = Txn::new()
            .when([
                Compare::value("k", CompareOp::Equal, "v1"),
                Compare::mod_revision("k", CompareOp::Less, 9).with_range(KeyRange::Prefix),
            ])
            .and_then([TxnOp::put("k", "v2", PutOptions::default())])
            .or_else([TxnOp::get("k", GetOptions::default()), TxnOp::delete("j", DeleteOptions::default())]);

        let request = txn.to_request();
        assert_eq!(request.compare.len(), 2);

        let first = &request.compare[0];
        assert_eq!(first.result, compare::CompareResult::Equal as i32);
        assert_eq!(first.target, compare::CompareTarget::Value as i32);
        assert_eq!(first.target_union, Some(compare::TargetUnion::Value(b"v1".to_vec())));

        let second = &request.compare[1];
        assert_eq!(second.target, compare::CompareTarget::Mod as i32);
        assert_eq!(second.range_end, b"l");

        assert!(matches!(
            request.success[0].request,
            Some(request_op::Request::RequestPut(ref put)) if put.value == b"v2"
        ));
        assert!(matches!(
            request.failure[0].request,
            Some(request_op::Request::RequestRange(_))
        ));
        assert!(matches!(
            request.failure[1].request,
            Some(request_op::Request::RequestDeleteRange(ref delete)) if delete.key == b"j"
        ));
    }

    #[test]
    fn test_txn_validates_both_branches() {
        let txn = Txn::new().or_else([TxnOp::put(
            "k",
            "v",
            PutOptions::builder().ignore_value(true).build(),
        )]);
        let old = ServerCapabilities::with_version(EtcdVersion::new(3, 1, 0));
        assert!(txn.validate(&old).is_err());
        assert!(txn.validate(&ServerCapabilities::unknown()).is_ok());
    }
}
