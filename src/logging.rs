//! Helper macro enforcing consistent discovery log fields.
//!
//! Keeps the `source` field present on every log emitted from the source
//! wrapper and engine layers so downstream parsing can rely on it.

/// Log an event for a discovery source plus any extra fields.
#[macro_export]
macro_rules! discovery_event {
    ($level:ident, $target:expr, $event:expr, source = $source:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            target: $target,
            event = $event,
            source = $source,
            $($field = %$value,)*
        )
    };
}
