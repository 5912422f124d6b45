//! Crate-internal logging macros.
//!
//! With the `tracing` feature every level forwards to `tracing` under the `vaa_watcher` target.
//! Without it the macros still evaluate (by reference) the field values they are given, so call
//! sites never produce unused-variable warnings, and nothing is emitted.

macro_rules! log_level {
    ($d:tt $level:ident) => {
        #[cfg(feature = "tracing")]
        #[allow(unused_macros)]
        macro_rules! $level {
            ($d($d arg:tt)*) => {
                tracing::$level!(target: "vaa_watcher", $d($d arg)*)
            };
        }

        #[cfg(not(feature = "tracing"))]
        #[allow(unused_macros)]
        macro_rules! $level {
            ($d($d arg:tt)*) => {
                $crate::__log_discard!($d($d arg)*)
            };
        }
    };
}

log_level!($ error);
log_level!($ warn);
log_level!($ info);
log_level!($ debug);
log_level!($ trace);

#[doc(hidden)]
#[macro_export]
#[cfg(not(feature = "tracing"))]
macro_rules! __log_discard {
    ($field:ident = % $value:expr, $($rest:tt)*) => {
        { let _ = &$value; $crate::__log_discard!($($rest)*); }
    };
    ($field:ident = ? $value:expr, $($rest:tt)*) => {
        { let _ = &$value; $crate::__log_discard!($($rest)*); }
    };
    ($field:ident = $value:expr, $($rest:tt)*) => {
        { let _ = &$value; $crate::__log_discard!($($rest)*); }
    };
    ($message:literal $(, $arg:expr)* $(,)?) => {
        { $(let _ = &$arg;)* }
    };
    () => {};
}
