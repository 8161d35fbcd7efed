//! Connecting → Negotiated → (DfuReady).

use tracing::{debug, info, warn};

use crate::descriptor::parse_capability_descriptor;
use crate::driver::DfuDriver;
use crate::error::SessionError;
use crate::events::{DfuObserver, SessionPhase};
use crate::memory::parse_memory_layout;
use crate::protocol::InterfaceRole;
use crate::state::machine::DeviceKind;
use crate::summary::ConnectionSummary;

use super::{ConnectOutcome, HandlerContext};

/// Open the device, negotiate capabilities and settle on a phase.
///
/// Open failures end the session; nothing is retried.
pub fn handle_connect<D: DfuDriver, O: DfuObserver>(
    ctx: &mut HandlerContext<'_, D, O>,
) -> Result<ConnectOutcome, SessionError> {
    if let Err(e) = ctx.driver.open() {
        warn!(error = %e, "Open failed");
        ctx.host.log_error(format!("Failed to open device: {e}"));
        ctx.teardown(Some(e.to_string()));
        return Err(SessionError::OpenFailed(e));
    }
    ctx.ensure_current()?;

    let device = ctx.driver.info().clone();
    let role = device.role();

    let descriptor = match ctx.driver.read_configuration_descriptor(0) {
        Ok(block) => parse_capability_descriptor(&block, device.configuration_value),
        Err(e) => {
            let err = SessionError::DescriptorUnavailable(e);
            debug!(error = %err, "Continuing with defaults");
            ctx.host.log_debug(err.to_string());
            None
        }
    };
    ctx.ensure_current()?;

    let kind = match descriptor {
        Some(desc) if desc.is_extended_addressing() && role == InterfaceRole::Dfu => {
            match device.interface_name.as_deref().and_then(parse_memory_layout) {
                Some(map) => {
                    info!(region = %map.name, segments = map.segments.len(), "Extended addressing device");
                    DeviceKind::ExtendedAddressing(map)
                }
                None => {
                    warn!(name = ?device.interface_name, "Unparsable memory layout");
                    ctx.host.log_warning("Extended addressing device without a usable memory map");
                    DeviceKind::Standard
                }
            }
        }
        _ => DeviceKind::Standard,
    };

    let can_download = ctx.with_state(|s| {
        if let Some(desc) = descriptor {
            s.adopt_descriptor(desc);
        }
        s.kind = kind.clone();
        s.needs_detach = role == InterfaceRole::Runtime;
        s.connected = true;
        s.can_download()
    })?;

    match descriptor {
        Some(desc) => info!(
            transfer_size = desc.transfer_size,
            manifestation_tolerant = desc.manifestation_tolerant,
            can_download = desc.can_download,
            version = %format!("{:04x}", desc.protocol_version),
            "DFU descriptor"
        ),
        None => ctx.host.log_debug("No DFU functional descriptor, using defaults"),
    }

    ctx.goto(SessionPhase::Negotiated);

    let summary = ConnectionSummary {
        device,
        descriptor,
        memory: kind.memory_map().cloned(),
    };
    ctx.host.on_connected(summary.to_string());

    match role {
        InterfaceRole::Runtime => {
            ctx.host.controls_changed(true, false);
        }
        InterfaceRole::Dfu => {
            ctx.goto(SessionPhase::DfuReady);
            ctx.host.controls_changed(false, can_download);
        }
        InterfaceRole::Unknown(protocol) => {
            ctx.host.log_warning(format!(
                "Interface protocol 0x{protocol:02x} is neither runtime nor DFU mode"
            ));
            ctx.host.controls_changed(false, false);
        }
    }

    Ok(ConnectOutcome {
        role,
        phase: ctx.phase(),
        summary,
    })
}
