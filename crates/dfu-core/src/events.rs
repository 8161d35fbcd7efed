//! Event system for UI decoupling.
//!
//! Allows CLI/TUI/GUI hosts to subscribe to session events without
//! tight coupling to the controller.

use std::fmt;
use std::sync::Arc;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Session controller phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No live session. Initial and terminal phase.
    #[default]
    Disconnected,
    /// Opening the device and reading its descriptors.
    Connecting,
    /// Device opened; runtime-role devices wait here for a detach request.
    Negotiated,
    /// Detach requested, waiting for the device to leave the bus.
    AwaitingDetach,
    /// Device is in DFU mode and accepts transfers.
    DfuReady,
    /// Firmware download in progress.
    Transferring,
    /// Download finished, waiting for the device to reset.
    Manifesting,
}

impl SessionPhase {
    /// Phases in which the controller itself expects the device to leave
    /// the bus.
    pub fn expects_disconnect(&self) -> bool {
        matches!(self, SessionPhase::AwaitingDetach | SessionPhase::Manifesting)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Disconnected => write!(f, "Disconnected"),
            SessionPhase::Connecting => write!(f, "Connecting"),
            SessionPhase::Negotiated => write!(f, "Negotiated"),
            SessionPhase::AwaitingDetach => write!(f, "Awaiting Detach"),
            SessionPhase::DfuReady => write!(f, "DFU Ready"),
            SessionPhase::Transferring => write!(f, "Transferring"),
            SessionPhase::Manifesting => write!(f, "Manifesting"),
        }
    }
}

/// Events emitted by the session controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DfuEvent {
    /// Device opened and negotiated.
    Connected { summary: String },
    /// Session ended. `reason` is set when the host should show why.
    Disconnected { reason: Option<String> },
    /// Phase changed.
    PhaseChanged { from: SessionPhase, to: SessionPhase },
    /// Download progress in bytes.
    Progress { done: usize, total: usize },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Which host controls may be enabled.
    ControlsChanged { detach: bool, download: bool },
    /// A firmware image was resolved for the connected product.
    FirmwareStaged { product: String, size: usize },
}

/// Observer trait for receiving session events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait DfuObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &DfuEvent);
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DfuObserver for TracingObserver {
    fn on_event(&self, event: &DfuEvent) {
        match event {
            DfuEvent::Connected { summary } => {
                tracing::info!("Connected\n{}", summary);
            }
            DfuEvent::Disconnected { reason } => match reason {
                Some(reason) => tracing::warn!(reason = %reason, "Device disconnected"),
                None => tracing::info!("Device disconnected"),
            },
            DfuEvent::PhaseChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Phase changed");
            }
            DfuEvent::Progress { done, total } => {
                let pct = if *total > 0 { (*done * 100) / *total } else { 0 };
                tracing::debug!(done, total, progress = %format!("{}%", pct), "Progress");
            }
            DfuEvent::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            DfuEvent::ControlsChanged { detach, download } => {
                tracing::trace!(detach, download, "Controls changed");
            }
            DfuEvent::FirmwareStaged { product, size } => {
                tracing::info!(product = %product, size, "Firmware image staged");
            }
        }
    }
}

/// Host callback surface used by the controller.
///
/// Thin typed wrappers that turn each callback into a [`DfuEvent`] for the
/// observer. Cheap to clone; the disconnect handle keeps its own copy.
pub struct HostCallbacks<O: DfuObserver> {
    observer: Arc<O>,
}

impl<O: DfuObserver> Clone for HostCallbacks<O> {
    fn clone(&self) -> Self {
        Self {
            observer: Arc::clone(&self.observer),
        }
    }
}

impl<O: DfuObserver> HostCallbacks<O> {
    pub fn new(observer: Arc<O>) -> Self {
        Self { observer }
    }

    pub fn emit(&self, event: DfuEvent) {
        self.observer.on_event(&event);
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(DfuEvent::Log {
            level,
            message: message.into(),
        });
    }

    pub fn log_debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn log_info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn log_warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn log_error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn log_progress(&self, done: usize, total: usize) {
        self.emit(DfuEvent::Progress { done, total });
    }

    pub fn on_connected(&self, summary: impl Into<String>) {
        self.emit(DfuEvent::Connected {
            summary: summary.into(),
        });
    }

    pub fn on_disconnected(&self, reason: Option<String>) {
        self.emit(DfuEvent::Disconnected { reason });
    }

    pub fn controls_changed(&self, detach: bool, download: bool) {
        self.emit(DfuEvent::ControlsChanged { detach, download });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Collects events for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingObserver {
        events: Mutex<Vec<DfuEvent>>,
    }

    impl RecordingObserver {
        pub(crate) fn events(&self) -> Vec<DfuEvent> {
            self.events.lock().unwrap().clone()
        }

        pub(crate) fn disconnects(&self) -> Vec<Option<String>> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    DfuEvent::Disconnected { reason } => Some(reason),
                    _ => None,
                })
                .collect()
        }

        pub(crate) fn logs(&self, level: LogLevel) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    DfuEvent::Log { level: l, message } if l == level => Some(message),
                    _ => None,
                })
                .collect()
        }

        pub(crate) fn phases(&self) -> Vec<SessionPhase> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    DfuEvent::PhaseChanged { to, .. } => Some(to),
                    _ => None,
                })
                .collect()
        }
    }

    impl DfuObserver for RecordingObserver {
        fn on_event(&self, event: &DfuEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_host_callbacks_emit_events() {
        let observer = Arc::new(RecordingObserver::default());
        let host = HostCallbacks::new(Arc::clone(&observer));
        host.log_warning("careful");
        host.log_progress(1, 2);
        host.on_disconnected(None);

        assert_eq!(
            observer.events(),
            vec![
                DfuEvent::Log {
                    level: LogLevel::Warn,
                    message: "careful".into()
                },
                DfuEvent::Progress { done: 1, total: 2 },
                DfuEvent::Disconnected { reason: None },
            ]
        );
    }

    #[test]
    fn test_expected_disconnect_phases() {
        assert!(SessionPhase::AwaitingDetach.expects_disconnect());
        assert!(SessionPhase::Manifesting.expects_disconnect());
        assert!(!SessionPhase::DfuReady.expects_disconnect());
    }
}
