//! DFU Session - the controller that sequences connect, detach and download.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::descriptor::CapabilityDescriptor;
use crate::driver::{DeviceHandle, DeviceInfo, DfuDriver, DriverError};
use crate::error::{ConfigError, SessionError};
use crate::events::{DfuEvent, DfuObserver, HostCallbacks, SessionPhase, TracingObserver};
use crate::firmware::{FirmwareCatalog, FirmwareResolver};
use crate::protocol::constants::{
    DEFAULT_TRANSFER_SIZE, DISCONNECT_TIMEOUT_MS, KNOWN_DETACH_TRANSFER_ERROR,
};
use crate::state::handlers::{
    ConnectOutcome, DetachOutcome, DownloadOutcome, HandlerContext, handle_connect,
    handle_download, handle_enter_dfu_mode,
};
use crate::state::machine::{DeviceKind, SessionSlot, SessionState};

/// Configuration for a DFU session controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Transfer size used until a descriptor provides one.
    pub default_transfer_size: u16,
    /// Manifestation tolerance assumed until a descriptor provides it.
    pub default_manifestation_tolerant: bool,
    /// How long to wait for the device to leave the bus, in milliseconds.
    pub disconnect_timeout_ms: u64,
    /// `wValue` of the `DFU_DETACH` request, in milliseconds.
    pub detach_timeout_ms: u16,
    /// Transport messages that are ignored when the detach request fails.
    pub benign_detach_errors: Vec<String>,
    /// Product name → firmware image table.
    pub firmware: FirmwareCatalog,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_transfer_size: DEFAULT_TRANSFER_SIZE,
            default_manifestation_tolerant: true,
            disconnect_timeout_ms: DISCONNECT_TIMEOUT_MS,
            detach_timeout_ms: 1000,
            benign_detach_errors: vec![KNOWN_DETACH_TRANSFER_ERROR.to_string()],
            firmware: FirmwareCatalog::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// A failed detach that only means the device already dropped off the bus.
    pub fn is_benign_detach_error(&self, err: &DriverError) -> bool {
        if err.is_bus_drop() {
            return true;
        }
        let message = match err {
            DriverError::Transfer { message, .. } => message.clone(),
            other => other.to_string(),
        };
        self.benign_detach_errors.iter().any(|m| *m == message)
    }
}

/// DFU Session - owns the live session for one physical device.
///
/// Every operation takes `&mut self`, so at most one driver call is in
/// flight per controller. The only way in from another thread is the
/// [`DisconnectHandle`].
pub struct DfuSession<D: DfuDriver, O: DfuObserver = TracingObserver> {
    config: SessionConfig,
    host: HostCallbacks<O>,
    resolver: Arc<dyn FirmwareResolver>,
    driver: Option<D>,
    slot: Arc<SessionSlot>,
    next_session_id: u64,
    staged_firmware: Option<Vec<u8>>,
}

impl<D: DfuDriver> DfuSession<D, TracingObserver> {
    /// Create a new controller with default tracing observer.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<D: DfuDriver, O: DfuObserver> DfuSession<D, O> {
    /// Create a new controller with a custom observer. Firmware is resolved
    /// through the configured catalog.
    pub fn with_observer(config: SessionConfig, observer: Arc<O>) -> Self {
        let resolver = Arc::new(config.firmware.clone());
        Self {
            config,
            host: HostCallbacks::new(observer),
            resolver,
            driver: None,
            slot: Arc::new(SessionSlot::new()),
            next_session_id: 1,
            staged_firmware: None,
        }
    }

    /// Replace the firmware resolver.
    pub fn with_resolver(mut self, resolver: impl FirmwareResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Handle for bus-level removal events, usable from any thread.
    pub fn disconnect_handle(&self) -> DisconnectHandle<O> {
        DisconnectHandle {
            slot: Arc::clone(&self.slot),
            host: self.host.clone(),
        }
    }

    /// Start a session on `driver`. A live session is closed first.
    #[instrument(skip_all, fields(device = %driver.info().handle))]
    pub fn connect(&mut self, driver: D) -> Result<ConnectOutcome, SessionError> {
        self.close_stale_session();

        let id = self.next_session_id;
        self.next_session_id += 1;

        let mut state = SessionState::new(
            id,
            driver.info().clone(),
            self.config.default_transfer_size,
            self.config.default_manifestation_tolerant,
        );
        state.goto_phase(SessionPhase::Connecting);
        *self.slot.lock() = Some(state);
        self.host.emit(DfuEvent::PhaseChanged {
            from: SessionPhase::Disconnected,
            to: SessionPhase::Connecting,
        });

        self.driver = Some(driver);
        let result = match self.context(id) {
            Some(mut ctx) => handle_connect(&mut ctx),
            None => Err(SessionError::NotConnected),
        };
        self.release_driver_if_gone();
        result
    }

    /// Resolve firmware for the runtime device and detach it into DFU mode.
    ///
    /// The session always ends here; the host reconnects once the device
    /// re-enumerates and can take the staged image for the download.
    #[instrument(skip_all)]
    pub fn enter_dfu_mode(&mut self) -> Result<DetachOutcome, SessionError> {
        let id = self.live_session_id()?;
        let resolver = Arc::clone(&self.resolver);
        let mut staged = self.staged_firmware.take();
        let result = match self.context(id) {
            Some(mut ctx) => handle_enter_dfu_mode(&mut ctx, resolver.as_ref(), &mut staged),
            None => Err(SessionError::NotConnected),
        };
        self.staged_firmware = staged;
        self.release_driver_if_gone();
        result
    }

    /// Download `image` to the device in DFU mode.
    #[instrument(skip_all, fields(size = image.len()))]
    pub fn download(&mut self, image: &[u8]) -> Result<DownloadOutcome, SessionError> {
        let id = self.live_session_id()?;
        let result = match self.context(id) {
            Some(mut ctx) => handle_download(&mut ctx, image),
            None => Err(SessionError::NotConnected),
        };
        self.release_driver_if_gone();
        result
    }

    /// Download the image staged by [`Self::enter_dfu_mode`]. The image is
    /// kept if the download fails so it can be retried.
    pub fn download_staged(&mut self) -> Result<DownloadOutcome, SessionError> {
        let image = self
            .staged_firmware
            .take()
            .ok_or_else(|| SessionError::FirmwareUnavailable(self.product_name()))?;
        let result = self.download(&image);
        if result.is_err() {
            self.staged_firmware = Some(image);
        }
        result
    }

    /// Close the live session, if any.
    #[instrument(skip_all)]
    pub fn disconnect(&mut self) {
        self.close_stale_session();
    }

    pub fn phase(&self) -> SessionPhase {
        self.slot
            .lock()
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.slot.lock().as_ref().is_some_and(|s| s.connected)
    }

    pub fn descriptor(&self) -> Option<CapabilityDescriptor> {
        self.slot.lock().as_ref().and_then(|s| s.descriptor)
    }

    pub fn device_kind(&self) -> Option<DeviceKind> {
        self.slot.lock().as_ref().map(|s| s.kind.clone())
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.slot.lock().as_ref().map(|s| s.device.clone())
    }

    pub fn transfer_size(&self) -> Option<u16> {
        self.slot.lock().as_ref().map(|s| s.transfer_size)
    }

    /// Override the negotiated transfer size.
    pub fn set_transfer_size(&mut self, size: u16) -> Result<(), SessionError> {
        if size == 0 {
            return Err(SessionError::InvalidTransferSize);
        }
        let mut guard = self.slot.lock();
        let state = guard.as_mut().ok_or(SessionError::NotConnected)?;
        debug!(from = state.transfer_size, to = size, "Transfer size override");
        state.transfer_size = size;
        Ok(())
    }

    pub fn manifestation_tolerant(&self) -> Option<bool> {
        self.slot.lock().as_ref().map(|s| s.manifestation_tolerant)
    }

    pub fn staged_firmware(&self) -> Option<&[u8]> {
        self.staged_firmware.as_deref()
    }

    fn product_name(&self) -> String {
        self.device_info()
            .and_then(|d| d.product_name)
            .unwrap_or_default()
    }

    fn live_session_id(&self) -> Result<u64, SessionError> {
        self.slot
            .lock()
            .as_ref()
            .map(|s| s.id)
            .ok_or(SessionError::NotConnected)
    }

    fn context(&mut self, session_id: u64) -> Option<HandlerContext<'_, D, O>> {
        Some(HandlerContext {
            driver: self.driver.as_mut()?,
            host: &self.host,
            slot: &self.slot,
            config: &self.config,
            session_id,
        })
    }

    /// Drop the driver once its session is gone.
    fn release_driver_if_gone(&mut self) {
        if self.slot.lock().is_none() && self.driver.take().is_some() {
            debug!("Released driver of ended session");
        }
    }

    /// Close and discard the live session. A session already torn down by a
    /// removal event has been reported, so only its driver is dropped.
    fn close_stale_session(&mut self) {
        let stale = self.slot.lock().take();
        let Some(mut driver) = self.driver.take() else {
            return;
        };
        let Some(mut state) = stale else {
            debug!("Dropping driver of a removed device");
            return;
        };

        info!(device = %state.device.handle, phase = %state.phase, "Closing session");
        if let Err(e) = driver.close() {
            warn!(error = %e, "Close failed");
            self.host.log_debug(format!("Close failed: {e}"));
        }
        state.connected = false;
        state.cancel.cancel();
        let from = state.goto_phase(SessionPhase::Disconnected);
        self.host.emit(DfuEvent::PhaseChanged {
            from,
            to: SessionPhase::Disconnected,
        });
        self.host.on_disconnected(None);
    }
}

/// Forwards bus-level "device removed" events into a controller.
pub struct DisconnectHandle<O: DfuObserver> {
    slot: Arc<SessionSlot>,
    host: HostCallbacks<O>,
}

impl<O: DfuObserver> Clone for DisconnectHandle<O> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            host: self.host.clone(),
        }
    }
}

impl<O: DfuObserver> DisconnectHandle<O> {
    /// Report that `handle` left the bus.
    ///
    /// In phases that wait for the device to go away (after detach or during
    /// manifestation) the removal completes that wait and the waiting
    /// operation tears the session down. Any other removal of the tracked
    /// device tears the session down here as unexpected. Returns whether the
    /// removal was acted on; repeated reports return false.
    pub fn device_removed(&self, handle: &DeviceHandle) -> bool {
        let mut state = {
            let mut guard = self.slot.lock();
            match guard.as_ref() {
                Some(s) if s.device.handle == *handle => {
                    if s.phase.expects_disconnect() {
                        if s.cancel.is_removed() {
                            return false;
                        }
                        debug!(device = %handle, phase = %s.phase, "Expected removal");
                        s.cancel.mark_removed();
                        return true;
                    }
                }
                _ => return false,
            }
            match guard.take() {
                Some(state) => state,
                None => return false,
            }
        };

        warn!(device = %handle, phase = %state.phase, "Device removed unexpectedly");
        state.connected = false;
        state.cancel.cancel();
        let from = state.goto_phase(SessionPhase::Disconnected);
        self.host.emit(DfuEvent::PhaseChanged {
            from,
            to: SessionPhase::Disconnected,
        });
        self.host
            .on_disconnected(Some(SessionError::UnexpectedDisconnect.to_string()));
        true
    }

    /// Handle of the tracked device, if a session is live.
    pub fn tracked_device(&self) -> Option<DeviceHandle> {
        self.slot.lock().as_ref().map(|s| s.device.handle.clone())
    }
}
