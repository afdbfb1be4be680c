//! `GetSystemMetrics` replacement.
//!
//! Screen size queries are answered with the configured legacy resolution;
//! everything else goes to the real function.

use tracing::trace;

use crate::config::Resolution;
use crate::interceptor::Interceptor;
use crate::system::{SM_CXFULLSCREEN, SM_CXSCREEN, SM_CYFULLSCREEN, SM_CYSCREEN};

/// The spoofed value for `index`, or `None` if the query must be forwarded.
pub fn spoofed_metric(resolution: Resolution, index: i32) -> Option<i32> {
    match index {
        SM_CXSCREEN | SM_CXFULLSCREEN => Some(resolution.width),
        SM_CYSCREEN | SM_CYFULLSCREEN => Some(resolution.height),
        _ => None,
    }
}

impl Interceptor {
    /// Answer a `GetSystemMetrics` call from the legacy application.
    pub fn system_metrics(&self, index: i32) -> i32 {
        match spoofed_metric(self.config.resolution, index) {
            Some(value) => {
                trace!("GetSystemMetrics({index}) -> {value} (spoofed)");
                value
            },
            None => unsafe { (self.hooks.system_metrics.original())(index) },
        }
    }
}
