//! Error kinds surfaced by the quantize/dither/render core.

use std::sync::Mutex;
use std::sync::OnceLock;

use thiserror::Error;

/// Status returned by any core operation.
///
/// Mirrors the integer status codes of the original library (spec §7):
/// every fallible entry point returns one of these kinds instead of a
/// raw status integer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SixelError {
    /// Null/invalid argument, unsupported `depth` for the selected LUT
    /// policy, unknown pixel format, `reqcolors < 1`, etc.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// The caller-provided allocator (or a `Vec` growth) failed.
    #[error("allocation failed: {0}")]
    BadAllocation(String),

    /// Width/height/chunk size exceeds representable bounds.
    #[error("integer overflow: {0}")]
    BadIntegerOverflow(String),

    /// Impossible palette (`ncolors == 0`), malformed float range, etc.
    #[error("bad input: {0}")]
    BadInput(String),

    /// Parallel pool could not be created, or LUT accelerator
    /// construction failed irrecoverably.
    #[error("runtime error: {0}")]
    RuntimeError(String),
}

pub type SixelResult<T> = Result<T, SixelError>;

/// Single-slot diagnostic message (spec §7): set alongside an error
/// return, read back by the caller via [`get_additional_message`]. Mirrors
/// the original library's process-wide `sixel_helper_set_additional_message`
/// global, scoped to a `Mutex` instead of being outright unsynchronized.
static ADDITIONAL_MESSAGE: OnceLock<Mutex<Option<String>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<String>> {
    ADDITIONAL_MESSAGE.get_or_init(|| Mutex::new(None))
}

/// Record a diagnostic message alongside the error about to be returned.
pub fn set_additional_message(message: impl Into<String>) {
    *slot().lock().expect("additional message lock poisoned") = Some(message.into());
}

/// Read back the last diagnostic message set by [`set_additional_message`],
/// if any.
pub fn get_additional_message() -> Option<String> {
    slot().lock().expect("additional message lock poisoned").clone()
}
