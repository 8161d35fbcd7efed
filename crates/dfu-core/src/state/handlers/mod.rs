//! Phase handlers - one entry point per controller operation.
//!
//! This module is split into submodules by functionality:
//! - `connect`: open, descriptor negotiation, role detection
//! - `detach`: runtime → DFU mode transition
//! - `download`: status recovery, transfer, manifestation

mod connect;
mod detach;
mod download;

use std::time::Duration;

use crate::driver::DfuDriver;
use crate::error::SessionError;
use crate::events::{DfuEvent, DfuObserver, HostCallbacks, SessionPhase};
use crate::protocol::InterfaceRole;
use crate::session::SessionConfig;
use crate::state::machine::{SessionSlot, SessionState};
use crate::summary::ConnectionSummary;

pub use connect::handle_connect;
pub use detach::handle_enter_dfu_mode;
pub use download::handle_download;

/// Result of a successful connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOutcome {
    pub role: InterfaceRole,
    pub phase: SessionPhase,
    pub summary: ConnectionSummary,
}

/// How the detach phase ended. The session is discarded in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachOutcome {
    /// The bus confirmed the device left; expect it to re-enumerate.
    Disconnected,
    /// The device did not leave the bus in time.
    DisconnectTimedOut,
    /// Closing the device failed, so the disconnect was never awaited.
    CloseFailed,
    /// The detach request failed with a known transient transport error,
    /// which happens when the device drops off the bus immediately.
    TransientErrorIgnored,
}

/// How a successful download ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Manifestation tolerant device; still connected and ready.
    Complete,
    /// Device reset itself after manifestation; session closed.
    DeviceReset,
    /// Device should have reset but stayed on the bus; still connected.
    ManifestationTolerated,
}

/// Handler context containing all resources.
pub struct HandlerContext<'a, D: DfuDriver, O: DfuObserver> {
    pub driver: &'a mut D,
    pub host: &'a HostCallbacks<O>,
    pub slot: &'a SessionSlot,
    pub config: &'a SessionConfig,
    pub session_id: u64,
}

impl<'a, D: DfuDriver, O: DfuObserver> HandlerContext<'a, D, O> {
    /// Fails once the session has been torn down by someone else. Any driver
    /// result obtained before this check is then stale and must be dropped.
    pub(crate) fn ensure_current(&self) -> Result<(), SessionError> {
        if self.slot.is_current(self.session_id) {
            Ok(())
        } else {
            Err(SessionError::UnexpectedDisconnect)
        }
    }

    pub(crate) fn with_state<T>(
        &self,
        f: impl FnOnce(&mut SessionState) -> T,
    ) -> Result<T, SessionError> {
        self.slot
            .with_session(self.session_id, f)
            .ok_or(SessionError::UnexpectedDisconnect)
    }

    pub(crate) fn phase(&self) -> SessionPhase {
        self.slot
            .with_session(self.session_id, |s| s.phase)
            .unwrap_or_default()
    }

    pub(crate) fn goto(&self, phase: SessionPhase) {
        if let Some(from) = self.slot.with_session(self.session_id, |s| s.goto_phase(phase))
            && from != phase
        {
            self.host.emit(DfuEvent::PhaseChanged { from, to: phase });
        }
    }

    /// Discard the session and tell the host. No-op if already gone.
    pub(crate) fn teardown(&self, reason: Option<String>) -> bool {
        let Some(mut state) = self.slot.take_if(self.session_id) else {
            return false;
        };
        state.connected = false;
        state.cancel.cancel();
        let from = state.goto_phase(SessionPhase::Disconnected);
        if from != SessionPhase::Disconnected {
            self.host.emit(DfuEvent::PhaseChanged {
                from,
                to: SessionPhase::Disconnected,
            });
        }
        self.host.on_disconnected(reason);
        true
    }

    pub(crate) fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.config.disconnect_timeout_ms)
    }
}
