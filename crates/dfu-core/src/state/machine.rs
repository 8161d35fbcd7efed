//! Session state owned by the controller.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::descriptor::CapabilityDescriptor;
use crate::driver::{CancelToken, DeviceInfo};
use crate::events::SessionPhase;
use crate::memory::MemoryMap;

/// Addressing variant, chosen once during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceKind {
    #[default]
    Standard,
    /// DfuSe device exposing a segmented memory map.
    ExtendedAddressing(MemoryMap),
}

impl DeviceKind {
    pub fn memory_map(&self) -> Option<&MemoryMap> {
        match self {
            DeviceKind::Standard => None,
            DeviceKind::ExtendedAddressing(map) => Some(map),
        }
    }
}

/// State of one logical connection to one physical device.
#[derive(Debug)]
pub struct SessionState {
    /// Distinguishes this session from earlier ones on the same controller.
    pub id: u64,
    pub device: DeviceInfo,
    pub phase: SessionPhase,
    pub descriptor: Option<CapabilityDescriptor>,
    pub kind: DeviceKind,
    pub transfer_size: u16,
    pub manifestation_tolerant: bool,
    pub connected: bool,
    /// Runtime-role device: a detach is required before any transfer.
    pub needs_detach: bool,
    /// Fired when the session is torn down from outside the controller.
    pub cancel: CancelToken,
}

impl SessionState {
    pub fn new(
        id: u64,
        device: DeviceInfo,
        transfer_size: u16,
        manifestation_tolerant: bool,
    ) -> Self {
        Self {
            id,
            device,
            phase: SessionPhase::Disconnected,
            descriptor: None,
            kind: DeviceKind::Standard,
            transfer_size,
            manifestation_tolerant,
            connected: false,
            needs_detach: false,
            cancel: CancelToken::new(),
        }
    }

    /// Transition to a new phase. Returns the previous one.
    pub fn goto_phase(&mut self, new_phase: SessionPhase) -> SessionPhase {
        tracing::info!(session = self.id, from = %self.phase, to = %new_phase, "Phase transition");
        std::mem::replace(&mut self.phase, new_phase)
    }

    /// Take over the device's limits. Manifestation tolerance is only
    /// meaningful for devices that can download.
    pub fn adopt_descriptor(&mut self, descriptor: CapabilityDescriptor) {
        if descriptor.transfer_size > 0 {
            self.transfer_size = descriptor.transfer_size;
        }
        if descriptor.can_download {
            self.manifestation_tolerant = descriptor.manifestation_tolerant;
        }
        self.descriptor = Some(descriptor);
    }

    /// Without a descriptor nothing forbids downloading.
    pub fn can_download(&self) -> bool {
        self.descriptor.is_none_or(|d| d.can_download)
    }
}

/// The one live session of a controller, shared with its disconnect handle.
#[derive(Debug, Default)]
pub struct SessionSlot(Mutex<Option<SessionState>>);

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, Option<SessionState>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether session `id` is still the live one.
    pub fn is_current(&self, id: u64) -> bool {
        self.lock().as_ref().is_some_and(|s| s.id == id)
    }

    /// Run `f` against session `id` if it is still live.
    pub fn with_session<T>(&self, id: u64, f: impl FnOnce(&mut SessionState) -> T) -> Option<T> {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(state) if state.id == id => Some(f(state)),
            _ => None,
        }
    }

    /// Remove session `id`, if it is still the live one.
    pub fn take_if(&self, id: u64) -> Option<SessionState> {
        let mut guard = self.lock();
        if guard.as_ref().is_some_and(|s| s.id == id) {
            guard.take()
        } else {
            None
        }
    }
}
