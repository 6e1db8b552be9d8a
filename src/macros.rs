/// Definitions for primitive values that carry both a closed set of named
/// variants and an open "anything else" case, along with conversions to and
/// from the underlying integer.
///
/// Used throughout `wire` for wire-format fields (message types, option
/// kinds, status codes) where an unrecognised value on the wire must be
/// preserved rather than rejected.
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $( $variant:ident = $value:expr ),+ $(,)?
        }
    ) => {
        #[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
        $( #[$enum_attr] )*
        pub enum $name {
            $( $variant ),*,
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}

/// Trace-level logging for individual packets crossing a protocol client.
/// A no-op unless a `log::Log` implementation is installed; cheap to leave
/// in call sites that run once per sent/received datagram.
macro_rules! net_trace {
    ($($arg:expr),*) => { log::trace!($($arg),*) }
}

/// Debug-level logging for state transitions (solicit/advertise/request,
/// retries, record store mutations).
macro_rules! net_debug {
    ($($arg:expr),*) => { log::debug!($($arg),*) }
}

/// Warn-level logging for conditions a caller should know about but that do
/// not by themselves fail the current operation (a malformed option in an
/// otherwise usable reply, an unexpected extra record).
macro_rules! net_warn {
    ($($arg:expr),*) => { log::warn!($($arg),*) }
}
