//! Panic containment for dispatch entries.
//!
//! Unwinding across the `extern "C"` boundary aborts the process, so every
//! call into the implementation runs under `catch_unwind`. A caught panic
//! becomes a [`Fault`] handed to [`FileSystem::exception_handler`], which is
//! itself guarded.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::filesystem::FileSystem;
use crate::status::{FsResult, NtStatus, STATUS_UNEXPECTED_IO_ERROR};

/// A panic caught while running an implementation operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    operation: &'static str,
    message: String,
}

impl Fault {
    /// Create a fault for an operation.
    pub fn new(operation: &'static str, message: String) -> Self {
        Self { operation, message }
    }

    /// Create a fault from a panic payload.
    ///
    /// # Arguments
    /// * `operation` - Operation that panicked
    /// * `payload` - Payload returned by `catch_unwind`
    pub fn from_panic(operation: &'static str, payload: Box<dyn Any + Send>) -> Self {
        let message: String = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { operation, message }
    }

    /// Name of the operation that panicked.
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Panic message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} panicked: {}", self.operation, self.message)
    }
}

/// Run an implementation call, converting a panic into a status.
///
/// # Arguments
/// * `fs` - Implementation whose fault hook maps the panic
/// * `operation` - Operation name for the fault record
/// * `call` - The implementation call
///
/// # Returns
/// The call's own result, or `Err` with the status chosen by the fault hook.
pub fn guarded<F, T>(fs: &F, operation: &'static str, call: impl FnOnce() -> FsResult<T>) -> FsResult<T>
where
    F: FileSystem + ?Sized,
{
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => Err(handle_fault(fs, Fault::from_panic(operation, payload))),
    }
}

/// Map a fault through the implementation's hook.
///
/// The hook runs under its own `catch_unwind`. A panicking hook, or one that
/// answers with a success status, yields `STATUS_UNEXPECTED_IO_ERROR`.
pub fn handle_fault<F>(fs: &F, fault: Fault) -> NtStatus
where
    F: FileSystem + ?Sized,
{
    tracing::error!("{}", fault);

    match catch_unwind(AssertUnwindSafe(|| fs.exception_handler(&fault))) {
        Ok(status) if status.is_failure() => status,
        Ok(status) => {
            tracing::warn!(
                "Exception handler returned success {} for {}",
                status,
                fault.operation()
            );
            STATUS_UNEXPECTED_IO_ERROR
        }
        Err(_) => {
            tracing::error!("Exception handler panicked for {}", fault.operation());
            STATUS_UNEXPECTED_IO_ERROR
        }
    }
}

/// Outermost guard of a dispatch entry.
///
/// Catches panics raised outside implementation calls (argument decoding,
/// result encoding) so none unwinds into the engine.
pub fn contain(operation: &'static str, body: impl FnOnce() -> NtStatus) -> NtStatus {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(status) => status,
        Err(payload) => {
            let fault: Fault = Fault::from_panic(operation, payload);
            tracing::error!("Dispatch entry {}", fault);
            STATUS_UNEXPECTED_IO_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{STATUS_ACCESS_DENIED, STATUS_SUCCESS, STATUS_END_OF_FILE};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Hooked {
        seen: Mutex<Vec<Fault>>,
        answer: Option<NtStatus>,
    }

    impl FileSystem for Hooked {
        type FileNode = ();
        type FileDesc = ();

        fn exception_handler(&self, fault: &Fault) -> NtStatus {
            self.seen.lock().push(fault.clone());
            match self.answer {
                Some(status) => status,
                None => panic!("handler failed"),
            }
        }
    }

    #[test]
    fn test_result_passes_through() {
        let fs: Hooked = Hooked::default();
        assert_eq!(guarded(&fs, "read", || Ok(5u32)), Ok(5));
        assert_eq!(guarded::<_, u32>(&fs, "read", || Err(STATUS_END_OF_FILE)), Err(STATUS_END_OF_FILE));
        assert!(fs.seen.lock().is_empty());
    }

    #[test]
    fn test_panic_routed_to_handler() {
        let fs: Hooked = Hooked {
            answer: Some(STATUS_ACCESS_DENIED),
            ..Default::default()
        };
        let result: FsResult<u32> = guarded(&fs, "write", || panic!("disk on fire"));
        assert_eq!(result, Err(STATUS_ACCESS_DENIED));

        let seen = fs.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].operation(), "write");
        assert_eq!(seen[0].message(), "disk on fire");
    }

    #[test]
    fn test_panicking_handler() {
        let fs: Hooked = Hooked::default();
        let result: FsResult<()> = guarded(&fs, "open", || panic!("{}", String::from("first")));
        assert_eq!(result, Err(STATUS_UNEXPECTED_IO_ERROR));
        assert_eq!(fs.seen.lock()[0].message(), "first");
    }

    #[test]
    fn test_success_from_handler_coerced() {
        let fs: Hooked = Hooked {
            answer: Some(STATUS_SUCCESS),
            ..Default::default()
        };
        let result: FsResult<()> = guarded(&fs, "flush", || panic!("x"));
        assert_eq!(result, Err(STATUS_UNEXPECTED_IO_ERROR));
    }

    #[test]
    fn test_contain() {
        assert_eq!(contain("close", || STATUS_SUCCESS), STATUS_SUCCESS);
        assert_eq!(contain("close", || panic!("bug")), STATUS_UNEXPECTED_IO_ERROR);
    }

    #[test]
    fn test_non_string_payload() {
        let fault: Fault = Fault::from_panic("read", Box::new(42u32));
        assert_eq!(fault.message(), "non-string panic payload");
        assert_eq!(fault.to_string(), "read panicked: non-string panic payload");
    }
}
