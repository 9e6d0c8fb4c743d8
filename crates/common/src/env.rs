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


use std::{fmt::Display, path::PathBuf, str::FromStr};

use snafu::Snafu;
use tracing::debug;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EnvError {
    #[snafu(display("Environment variable {key}='{value}' is invalid: {message}"))]
    Parse {
        key:     String,
        value:   String,
        message: String,
    },
}

/// Loads a `.env` file from the current directory or its ancestors, if any.
pub fn load_dotenv() -> Option<PathBuf> {
    match dotenvy::dotenv() {
        Ok(path) => {
            debug!("Loaded environment from {}", path.display());
            Some(path)
        }
        Err(_) => None,
    }
}

/// Returns the trimmed value of `key`, treating blank values as unset.
pub fn var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parses the value of `key`, returning `Ok(None)` when it is unset.
pub fn parse_var<T>(key: &str) -> Result<Option<T>, EnvError>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(value) = var(key) else {
        return Ok(None);
    };
    value.parse::<T>().map(Some).map_err(|e| EnvError::Parse {
        key:     key.to_string(),
        message: e.to_string(),
        value,
    })
}

/// Splits a comma separated variable into its non-empty parts.
pub fn list_var(key: &str) -> Vec<String> {
    var(key)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    // Each case uses its own variable so tests can run in parallel.
    #[test_case("ETCDLINK_TEST_LIST_A", "a:1,b:2", vec!["a:1", "b:2"]; "two entries")]
    #[test_case("ETCDLINK_TEST_LIST_B", " a:1 , ,b:2 ", vec!["a:1", "b:2"]; "blank entries dropped")]
    #[test_case("ETCDLINK_TEST_LIST_C", "   ", vec![]; "blank value")]
    fn test_list_var(key: &str, value: &str, expected: Vec<&str>) {
        unsafe { std::env::set_var(key, value) };
        assert_eq!(list_var(key), expected);
        unsafe { std::env::remove_var(key) };
    }

    #[test]
    fn test_parse_var() {
        unsafe { std::env::set_var("ETCDLINK_TEST_NUMBER", "42") };
        assert_eq!(parse_var::<u64>("ETCDLINK_TEST_NUMBER").unwrap(), Some(42));
        unsafe { std::env::set_var("ETCDLINK_TEST_NUMBER", "forty-two") };
        assert!(parse_var::<u64>("ETCDLINK_TEST_NUMBER").is_err());
        unsafe { std::env::remove_var("ETCDLINK_TEST_NUMBER") };
        assert_eq!(parse_var::<u64>("ETCDLINK_TEST_NUMBER").unwrap(), None);
    }
}
