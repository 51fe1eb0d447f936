//! ---
//! eph_section: "03-logging"
//! eph_subsection: "module"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Structured logging adapters and sinks."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---

#[doc(hidden)]
#[macro_export]
macro_rules! __eph_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::__tracing::event!(
            $level,
            session = ctx.session.unwrap_or(""),
            image = ctx.image.unwrap_or(""),
            state = ctx.state.unwrap_or(""),
            port = ctx.port.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with harness context.
#[macro_export]
macro_rules! eph_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__eph_event!($crate::__tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__eph_event!($crate::__tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with harness context.
#[macro_export]
macro_rules! eph_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__eph_event!($crate::__tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__eph_event!($crate::__tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with harness context.
#[macro_export]
macro_rules! eph_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__eph_event!($crate::__tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__eph_event!($crate::__tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with harness context.
#[macro_export]
macro_rules! eph_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__eph_event!($crate::__tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__eph_event!($crate::__tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
