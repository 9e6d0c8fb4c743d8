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


use std::path::PathBuf;

use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoggingError {
    #[snafu(display("Invalid log filter directive '{directive}'"))]
    Filter {
        directive: String,
        source:    tracing_subscriber::filter::ParseError,
    },

    #[snafu(display("Failed to install the global tracing subscriber"))]
    Init {
        source: tracing_subscriber::util::TryInitError,
    },
}

/// Options for [`init_tracing`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// Default filter directive, overridden by `RUST_LOG` when set.
    pub level:       String,
    /// When set, logs are also written to a daily rolling file in this
    /// directory.
    pub dir:         Option<PathBuf>,
    pub file_prefix: String,
    pub ansi:        bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level:       "info".to_string(),
            dir:         None,
            file_prefix: "etcdlink".to_string(),
            ansi:        true,
        }
    }
}

impl LoggingOptions {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }
}

/// Installs the global tracing subscriber.
///
/// Console output uses the compact format with file, line and thread ids.
/// The returned guard must be kept alive for as long as file logging is
/// wanted; dropping it flushes and stops the background writer.
pub fn init_tracing(options: &LoggingOptions) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&options.level).context(FilterSnafu {
            directive: options.level.clone(),
        })?,
    };

    let console = fmt::layer()
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .with_ansi(options.ansi);

    let registry = tracing_subscriber::registry().with(filter).with(console);

    match &options.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &options.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = fmt::layer().with_writer(writer).with_ansi(false);
            registry.with(file).try_init().context(InitSnafu)?;
            Ok(Some(guard))
        }
        None => {
            registry.try_init().context(InitSnafu)?;
            Ok(None)
        }
    }
}

/// Routes tracing output through the test harness writer. Safe to call from
/// every test; only the first call installs a subscriber.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
