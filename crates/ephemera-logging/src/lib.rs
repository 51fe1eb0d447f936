//! ---
//! eph_section: "03-logging"
//! eph_subsection: "module"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Structured logging adapters and sinks."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Tracing initialisation and lifecycle-aware log helpers.

use anyhow::Result;
use ephemera_common::config::{LogFormat, LoggingConfig};
use once_cell::sync::OnceCell;
use tracing::{info, Level};
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Registry;

pub mod macros;

#[doc(hidden)]
pub use tracing as __tracing;

const LOG_ENV: &str = "EPHEMERA_LOG";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Initialize a baseline tracing subscriber suitable for development.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(fmt::layer())
        .try_init();
}

/// Initialize logging routed through the test harness capture.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_test_logging() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,ephemera_core=debug,ephemera_cosmos=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Initialize the tracing subscriber from settings and environment variables.
///
/// `EPHEMERA_LOG` overrides the filter, then `RUST_LOG`, finally `info`.
/// When `config.directory` is set a daily rolling JSON file is written there too.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!("invalid {LOG_ENV} directive ({err}); defaulting to info logging");
            EnvFilter::new("info")
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .boxed(),
    };

    let file_layer = match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)?;
            let prefix = config
                .file_prefix
                .clone()
                .unwrap_or_else(|| service_name.to_owned());
            let appender = daily(directory, format!("{prefix}.log"));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .json()
                    .with_writer(writer)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(service = %service_name, format = ?config.format, "tracing initialised");
    Ok(())
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Harness session identifier.
    pub session: Option<&'a str>,
    /// Container image reference.
    pub image: Option<&'a str>,
    /// Lifecycle state at the time of the event.
    pub state: Option<&'a str>,
    /// Published server port.
    pub port: Option<u16>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a session identifier.
    pub fn with_session(mut self, session: &'a str) -> Self {
        self.session = Some(session);
        self
    }

    /// Attach an image reference.
    pub fn with_image(mut self, image: &'a str) -> Self {
        self.image = Some(image);
        self
    }

    /// Attach a lifecycle state name.
    pub fn with_state(mut self, state: &'a str) -> Self {
        self.state = Some(state);
        self
    }

    /// Attach the server port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Outcome attached to lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// The step completed.
    Success,
    /// The step failed or was aborted.
    Fault,
}

impl LifecycleOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            LifecycleOutcome::Success => "success",
            LifecycleOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event with a success/fault outcome.
pub fn log_lifecycle_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: LifecycleOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    let session = ctx.session.unwrap_or("");
    let image = ctx.image.unwrap_or("");
    let state = ctx.state.unwrap_or("");
    let port = ctx.port.unwrap_or_default();
    // `tracing::event!` needs a constant level, hence the split.
    match outcome {
        LifecycleOutcome::Success => tracing::info!(
            event,
            outcome = outcome.as_str(),
            session,
            image,
            state,
            port,
            message = %message
        ),
        LifecycleOutcome::Fault => tracing::error!(
            event,
            outcome = outcome.as_str(),
            session,
            image,
            state,
            port,
            message = %message
        ),
    }
}
