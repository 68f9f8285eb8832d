//! Gateway instrumentation; records into `Metrics` when that feature is on

#[cfg(feature = "metrics")]
use std::sync::Arc;

use relay_core::Error;

#[cfg(feature = "metrics")]
use crate::handshake::reason_label;
#[cfg(feature = "metrics")]
use crate::metrics::Metrics;

#[derive(Clone, Default)]
pub(crate) struct Telemetry {
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<Metrics>>,
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
impl Telemetry {
    #[cfg(feature = "metrics")]
    pub(crate) fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics: Some(metrics),
        }
    }

    pub(crate) fn connection_opened(&self) {
        #[cfg(feature = "metrics")]
        {
            if let Some(metrics) = &self.metrics {
                metrics.record_connection();
            }
        }
    }

    pub(crate) fn connection_closed(&self) {
        #[cfg(feature = "metrics")]
        {
            if let Some(metrics) = &self.metrics {
                metrics.record_disconnection();
            }
        }
    }

    pub(crate) fn handshake_rejected(&self, error: &Error) {
        #[cfg(feature = "metrics")]
        {
            if let Some(metrics) = &self.metrics {
                metrics.record_rejection(reason_label(error));
            }
        }
    }

    pub(crate) fn frame_received(&self, is_content: bool) {
        #[cfg(feature = "metrics")]
        {
            if let Some(metrics) = &self.metrics {
                metrics.record_frame(if is_content { "content" } else { "other" });
            }
        }
    }

    pub(crate) fn content_dropped(&self) {
        #[cfg(feature = "metrics")]
        {
            if let Some(metrics) = &self.metrics {
                metrics.content_dropped.inc();
            }
        }
    }

    pub(crate) fn malformed(&self) {
        #[cfg(feature = "metrics")]
        {
            if let Some(metrics) = &self.metrics {
                metrics.frames_malformed.inc();
            }
        }
    }
}
