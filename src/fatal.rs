//! Process termination for logic errors
//!
//! Nothing here unwinds: a panic crossing into host frames is undefined
//! behaviour, and continuing after a refcount underflow would double-free.

use crate::error::FatalError;
use crate::logging::log_fatal;

/// Log `error` and abort the process.
#[cold]
#[inline(never)]
pub fn abort_with(error: FatalError) -> ! {
    log_fatal(&error);
    // The subscriber may not be installed yet, or may write asynchronously.
    eprintln!("lumen: fatal: {error}");
    std::process::abort()
}

#[cfg(all(test, unix))]
mod tests {
    use core::num::NonZeroUsize;
    use std::os::unix::process::ExitStatusExt;
    use std::process::{Command, Output};
    use std::sync::Arc;
    use std::thread;

    use crate::bridge::{Bridge, LocalHost, PeerRef};
    use crate::object::{Object, ObjectHeader, Ref};

    /// Selects the fatal path `fatal_case` runs in the child process
    const CASE: &str = "LUMEN_FATAL_CASE";
    const SIGABRT: i32 = 6;

    struct Gadget {
        header: ObjectHeader,
    }

    impl Object for Gadget {
        fn header(&self) -> &ObjectHeader {
            &self.header
        }

        fn type_name(&self) -> &'static str {
            "Gadget"
        }
    }

    fn run_case(case: &str) -> Output {
        Command::new(std::env::current_exe().unwrap())
            .args(["fatal::tests::fatal_case", "--exact", "--nocapture", "--test-threads=1"])
            .env(CASE, case)
            .output()
            .unwrap()
    }

    fn assert_aborts(case: &str, message: &str) {
        let output = run_case(case);
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert_eq!(output.status.signal(), Some(SIGABRT), "{case}: {stderr}");
        assert!(stderr.contains("lumen: fatal:"), "{case}: {stderr}");
        assert!(stderr.contains(message), "{case}: {stderr}");
    }

    /// Runs one fatal path; a no-op unless `CASE` is set
    #[test]
    fn fatal_case() {
        let Ok(case) = std::env::var(CASE) else {
            return;
        };

        let host = Arc::new(LocalHost::new());
        let bridge = Arc::new(Bridge::new(host.clone()));
        match case.as_str() {
            "underflow" => {
                let header = ObjectHeader::new();
                assert!(header.release("Gadget"));
                header.release("Gadget");
            }
            "rebridge" => {
                let object = Ref::new(Gadget { header: ObjectHeader::new() });
                bridge.attach(&*object, PeerRef::from_handle(NonZeroUsize::new(0x10).unwrap()));
                bridge.attach(&*object, PeerRef::from_handle(NonZeroUsize::new(0x20).unwrap()));
            }
            "unrecognized-thread" => {
                thread::spawn(move || drop(bridge.lock())).join().unwrap();
            }
            "stale-release" => {
                let lock = bridge.lock();
                let object = Ref::new(Gadget { header: ObjectHeader::new() });
                let peer = host.wrap(&object, &lock).unwrap();
                host.host_release(peer, &lock);
                host.host_release(peer, &lock);
            }
            other => panic!("unknown case {other}"),
        }
    }

    #[test]
    fn test_refcount_underflow_aborts() {
        assert_aborts("underflow", "decremented below zero on Gadget");
    }

    #[test]
    fn test_rebridge_to_other_peer_aborts() {
        assert_aborts("rebridge", "already bridged to PeerRef(0x10), refusing PeerRef(0x20)");
    }

    #[test]
    fn test_host_lock_from_unrecognized_thread_aborts() {
        assert_aborts("unrecognized-thread", "is not known to the host runtime");
    }

    #[test]
    fn test_release_of_collected_wrapper_aborts() {
        assert_aborts("stale-release", "is unknown or was already collected");
    }
}
