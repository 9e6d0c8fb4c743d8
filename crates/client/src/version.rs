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


//! Server version detection and feature gating.

use std::{borrow::Cow, cmp::Ordering, fmt, str::FromStr};

use strum_macros::{Display, EnumIter};

use crate::types::{ClientError, ClientResult, InvalidArgumentSnafu};

/// A parsed etcd server version. A pre-release sorts before its release.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EtcdVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre:   Option<Cow<'static, str>>,
}

impl EtcdVersion {
    pub const V3_0_11: Self = Self::new(3, 0, 11);
    pub const V3_0_12: Self = Self::new(3, 0, 12);
    pub const V3_1_0_ALPHA_0: Self = Self::pre_release(3, 1, 0, "alpha.0");
    pub const V3_2_0_RC_0: Self = Self::pre_release(3, 2, 0, "rc.0");
    pub const V3_3_0: Self = Self::new(3, 3, 0);

    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: None,
        }
    }

    pub const fn pre_release(major: u64, minor: u64, patch: u64, pre: &'static str) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: Some(Cow::Borrowed(pre)),
        }
    }
}

impl fmt::Display for EtcdVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

impl FromStr for EtcdVersion {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('v');
        // build metadata never participates in ordering
        let trimmed = trimmed.split_once('+').map_or(trimmed, |(v, _)| v);
        let (core, pre) = match trimmed.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(Cow::Owned(pre.to_string()))),
            Some(_) => {
                return InvalidArgumentSnafu {
                    message: format!("invalid version '{s}': empty pre-release"),
                }
                .fail();
            }
            None => (trimmed, None),
        };

        let mut parts = core.split('.').map(|part| part.parse::<u64>());
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Ok(major)), Some(Ok(minor)), Some(Ok(patch)), None) => Ok(Self {
                major,
                minor,
                patch,
                pre,
            }),
            _ => InvalidArgumentSnafu {
                message: format!("invalid version '{s}'"),
            }
            .fail(),
        }
    }
}

fn compare_pre_release(left: &str, right: &str) -> Ordering {
    let mut left = left.split('.');
    let mut right = right.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => l.cmp(r),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

impl Ord for EtcdVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(l), Some(r)) => compare_pre_release(l, r),
            })
    }
}

impl PartialOrd for EtcdVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

/// Request options that only newer servers understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Feature {
    #[strum(serialize = "put prev_kv")]
    PutPrevKv,
    #[strum(serialize = "delete prev_kv")]
    DeletePrevKv,
    #[strum(serialize = "watch prev_kv")]
    WatchPrevKv,
    #[strum(serialize = "watch filters")]
    WatchFilters,
    #[strum(serialize = "lease time-to-live")]
    LeaseTimeToLive,
    #[strum(serialize = "put ignore_value")]
    PutIgnoreValue,
    #[strum(serialize = "put ignore_lease")]
    PutIgnoreLease,
    #[strum(serialize = "lease listing")]
    LeaseLeases,
}

impl Feature {
    /// The first server version accepting this option.
    pub fn since(self) -> EtcdVersion {
        match self {
            Feature::PutPrevKv | Feature::DeletePrevKv => EtcdVersion::V3_0_11,
            Feature::WatchPrevKv => EtcdVersion::V3_0_12,
            Feature::WatchFilters | Feature::LeaseTimeToLive => EtcdVersion::V3_1_0_ALPHA_0,
            Feature::PutIgnoreValue | Feature::PutIgnoreLease => EtcdVersion::V3_2_0_RC_0,
            Feature::LeaseLeases => EtcdVersion::V3_3_0,
        }
    }
}

/// What the connected cluster is known to support.
///
/// Detected once when the client connects. An unknown version never blocks
/// a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerCapabilities {
    version: Option<EtcdVersion>,
}

impl ServerCapabilities {
    pub fn unknown() -> Self { Self::default() }

    pub fn with_version(version: EtcdVersion) -> Self {
        Self {
            version: Some(version),
        }
    }

    pub fn version(&self) -> Option<&EtcdVersion> { self.version.as_ref() }

    /// Records a version reported by one member. The lowest one wins.
    pub fn observe(&mut self, reported: EtcdVersion) {
        match &self.version {
            Some(current) if *current <= reported => {}
            _ => self.version = Some(reported),
        }
    }

    pub fn supports(&self, feature: Feature) -> bool {
        self.version
            .as_ref()
            .is_none_or(|version| *version >= feature.since())
    }

    pub fn require(&self, feature: Feature) -> ClientResult<()> {
        match &self.version {
            Some(detected) if *detected < feature.since() => Err(ClientError::Unsupported {
                feature,
                required: feature.since(),
                detected: detected.clone(),
            }),
            _ => Ok(()),
        }
    }
}
