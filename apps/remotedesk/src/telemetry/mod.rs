pub(crate) fn env_truthy(var: &str) -> Option<bool> {
    std::env::var(var)
        .map(|value| is_truthy(&value))
        .ok()
}

pub(crate) fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}

pub mod logging {
    //! Process-wide `tracing` setup for the binary.
    //!
    //! Debug and trace levels apply to this crate only; the webrtc, websocket
    //! and http stacks stay at `warn` unless [`TRACE_DEPS_ENV`] is set.

    use clap::ValueEnum;
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::sync::OnceLock;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    pub const FILTER_ENV: &str = "REMOTEDESK_LOG_FILTER";
    pub const TRACE_DEPS_ENV: &str = "REMOTEDESK_TRACE_DEPS";

    const CRATE_TARGETS: &[&str] = &["remotedesk", "remotedesk_core"];
    const NEGOTIATION_DEPS: &[&str] = &[
        "webrtc",
        "webrtc_ice",
        "webrtc_dtls",
        "webrtc_sctp",
        "webrtc_srtp",
        "webrtc_mdns",
        "tokio_tungstenite",
        "tungstenite",
        "reqwest",
        "hyper",
    ];

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        fn directive(self) -> &'static str {
            match self {
                LogLevel::Error => "error",
                LogLevel::Warn => "warn",
                LogLevel::Info => "info",
                LogLevel::Debug => "debug",
                LogLevel::Trace => "trace",
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to install subscriber: {0}")]
        Install(String),
    }

    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the global subscriber. Only the first call has an effect.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if GUARD.get().is_some() {
            return Ok(());
        }

        let (writer, guard) = match &config.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        let directives = match std::env::var(FILTER_ENV) {
            Ok(filter) if !filter.trim().is_empty() => filter,
            _ => filter_directives(
                config.level,
                super::env_truthy(TRACE_DEPS_ENV).unwrap_or(false),
            ),
        };

        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(&directives))
            .with_target(config.level >= LogLevel::Debug)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .try_init()
            .map_err(|err| InitError::Install(err.to_string()))?;

        let _ = GUARD.set(guard);
        tracing::debug!(filter = %directives, "logging initialized");
        Ok(())
    }

    fn filter_directives(level: LogLevel, verbose_deps: bool) -> String {
        if level < LogLevel::Debug || verbose_deps {
            return level.directive().to_owned();
        }
        let mut directives = vec!["info".to_owned()];
        directives.extend(
            CRATE_TARGETS
                .iter()
                .map(|target| format!("{target}={}", level.directive())),
        );
        directives.extend(NEGOTIATION_DEPS.iter().map(|target| format!("{target}=warn")));
        directives.join(",")
    }

}
