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


//! Key range helpers.
//!
//! etcd addresses a range with a `key` and a `range_end`: an empty end means
//! the single key, `[0]` as the end means every key from `key` onwards, and
//! `[0]` as both key and end means the whole keyspace.

/// Range end selecting every key greater than or equal to the start key.
pub const FROM_KEY: &[u8] = &[0];

/// Start key which, paired with [`FROM_KEY`], selects every key.
pub const ALL_KEYS: &[u8] = &[0];

/// Returns the smallest key greater than every key starting with `prefix`.
///
/// The last byte below `0xff` is incremented and everything after it is
/// dropped. A prefix made only of `0xff` bytes (or an empty one) has no such
/// key and yields an empty vector.
pub fn prefix_end_of(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xff {
            *last += 1;
            return end;
        }
        end.pop();
    }
    end
}

/// How far a request reaches beyond its start key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum KeyRange {
    /// Only the key itself.
    #[default]
    Single,
    /// Every key starting with the key.
    Prefix,
    /// Every key greater than or equal to the key. An empty key selects the
    /// whole keyspace.
    FromKey,
    /// Keys in `[key, end)`.
    Range(Vec<u8>),
}

impl KeyRange {
    /// Resolves to the `(key, range_end)` pair sent on the wire.
    pub fn resolve(&self, key: Vec<u8>) -> (Vec<u8>, Vec<u8>) {
        match self {
            KeyRange::Single => (key, Vec::new()),
            KeyRange::Prefix if key.is_empty() => (ALL_KEYS.to_vec(), FROM_KEY.to_vec()),
            KeyRange::Prefix => {
                let end = prefix_end_of(&key);
                if end.is_empty() {
                    (key, FROM_KEY.to_vec())
                } else {
                    (key, end)
                }
            }
            KeyRange::FromKey if key.is_empty() => (ALL_KEYS.to_vec(), FROM_KEY.to_vec()),
            KeyRange::FromKey => (key, FROM_KEY.to_vec()),
            KeyRange::Range(end) => (key, end.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(b"a", b"b"; "single byte")]
    #[test_case(b"aa", b"ab"; "last byte")]
    #[test_case(b"a\xff", b"b"; "trailing ff dropped")]
    #[test_case(b"/app/", b"/app0"; "slash prefix")]
    #[test_case(b"\xff", b""; "all ff")]
    #[test_case(b"\xff\xff", b""; "all ff twice")]
    #[test_case(b"", b""; "empty")]
    fn test_prefix_end_of(prefix: &[u8], expected: &[u8]) {
        assert_eq!(prefix_end_of(prefix), expected);
    }

    #[test]
    fn test_prefix_end_bounds_every_key_with_prefix() {
        let prefix = b"svc/\xfe\xff".to_vec();
        let end = prefix_end_of(&prefix);
        for suffix in [&b""[..], b"\x00", b"\xff\xff\xff"] {
            let mut key = prefix.clone();
            key.extend_from_slice(suffix);
            assert!(key >= prefix && key < end);
        }
    }

    #[test]
    fn test_resolve_ranges() {
        assert_eq!(KeyRange::Single.resolve(b"k".to_vec()), (b"k".to_vec(), vec![]));
        assert_eq!(KeyRange::Prefix.resolve(b"k".to_vec()), (b"k".to_vec(), b"l".to_vec()));
        assert_eq!(KeyRange::Prefix.resolve(vec![]), (vec![0], vec![0]));
        assert_eq!(KeyRange::Prefix.resolve(vec![0xff]), (vec![0xff], vec![0]));
        assert_eq!(KeyRange::FromKey.resolve(b"k".to_vec()), (b"k".to_vec(), vec![0]));
        assert_eq!(KeyRange::FromKey.resolve(vec![]), (vec![0], vec![0]));
        assert_eq!(
            KeyRange::Range(b"z".to_vec()).resolve(b"a".to_vec()),
            (b"a".to_vec(), b"z".to_vec())
        );
    }
}
