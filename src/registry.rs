use std::io;
use std::os::unix::io::RawFd;

/// A watched descriptor and the token its events are reported under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Source {
    pub fd: RawFd,
    pub token: usize,
}

/// Readiness notification service a connection re-arms itself with
///
/// Registrations are one-shot: after an event has been delivered the source
/// stays silent until it is armed again. A connection must re-arm before the
/// worker handling it returns, or it stalls.
pub trait Registry: Send + Sync {
    /// Deliver the next readability event for `source`
    fn arm_for_read(&self, source: &Source) -> io::Result<()>;

    /// Deliver the next writability event for `source`
    fn arm_for_write(&self, source: &Source) -> io::Result<()>;

    /// Stop watching `source` altogether
    fn deregister(&self, source: &Source) -> io::Result<()>;
}
