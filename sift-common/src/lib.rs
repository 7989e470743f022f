pub mod controller;
pub mod error;
pub mod listener;
pub mod logging;
pub mod scratch;
pub mod stats;
pub mod traits;

pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stop accepting connections and wind down
    Shutdown,
    /// Configuration reload was requested
    Reload,
    Finalised,
}

/// Name of the host we're running on, as reported by `gethostname(2)`.
///
/// Falls back to the `HOSTNAME` environment variable, and then to `localhost`.
pub fn hostname() -> String {
    let mut buf = [0u8; 256];

    // SAFETY: `buf` is valid for `buf.len()` bytes, and gethostname never writes past that
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc == 0 {
        let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        if len > 0 {
            return String::from_utf8_lossy(&buf[..len]).into_owned();
        }
    }

    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
