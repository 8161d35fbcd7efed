//! Negotiated → AwaitingDetach → Disconnected.

use tracing::{debug, info, warn};

use crate::driver::DfuDriver;
use crate::error::SessionError;
use crate::events::{DfuEvent, DfuObserver, SessionPhase};
use crate::firmware::FirmwareResolver;

use super::{DetachOutcome, HandlerContext};

/// Resolve the firmware image for the product, then ask the runtime device to
/// switch into DFU mode and wait for it to leave the bus.
///
/// The resolved image is written to `staged` so it survives the session,
/// which ends here whatever the device does.
pub fn handle_enter_dfu_mode<D: DfuDriver, O: DfuObserver>(
    ctx: &mut HandlerContext<'_, D, O>,
    resolver: &dyn FirmwareResolver,
    staged: &mut Option<Vec<u8>>,
) -> Result<DetachOutcome, SessionError> {
    let (phase, needs_detach) = ctx.with_state(|s| (s.phase, s.needs_detach))?;
    if phase != SessionPhase::Negotiated || !needs_detach {
        return Err(SessionError::InvalidPhase {
            operation: "detach",
            phase,
        });
    }

    ctx.goto(SessionPhase::AwaitingDetach);
    ctx.host.controls_changed(false, false);

    let product = ctx.driver.info().product_name.clone().unwrap_or_default();
    match resolver.resolve(&product) {
        Some(image) => {
            ctx.host.emit(DfuEvent::FirmwareStaged {
                product: product.clone(),
                size: image.len(),
            });
            *staged = Some(image);
        }
        None => {
            warn!(product = %product, "No firmware image for product");
            ctx.host
                .log_warning(format!("No firmware image available for \"{product}\""));
            ctx.goto(SessionPhase::Negotiated);
            ctx.host.controls_changed(true, false);
            return Err(SessionError::FirmwareUnavailable(product));
        }
    }

    info!(product = %product, "Detaching");
    match ctx.driver.detach(ctx.config.detach_timeout_ms) {
        Ok(()) => finish_detach(ctx),
        Err(e) => {
            if let Err(close_err) = ctx.driver.close() {
                debug!(error = %close_err, "Close after failed detach");
            }
            if ctx.config.is_benign_detach_error(&e) {
                debug!(error = %e, "Skipping known transfer error during detach");
                ctx.host.log_debug(format!("Ignoring transient detach error: {e}"));
                ctx.teardown(None);
                Ok(DetachOutcome::TransientErrorIgnored)
            } else {
                warn!(error = %e, "Detach failed");
                let err = SessionError::DetachFailed(e);
                ctx.host.log_warning(err.to_string());
                ctx.teardown(Some(err.to_string()));
                Err(err)
            }
        }
    }
}

fn finish_detach<D: DfuDriver, O: DfuObserver>(
    ctx: &mut HandlerContext<'_, D, O>,
) -> Result<DetachOutcome, SessionError> {
    if let Err(e) = ctx.driver.close() {
        warn!(error = %e, "Close after detach failed");
        ctx.host.log_warning(format!("Detach failed: {e}"));
        ctx.teardown(None);
        return Ok(DetachOutcome::CloseFailed);
    }

    let cancel = ctx.with_state(|s| s.cancel.clone())?;
    let waited = ctx.driver.wait_disconnected(ctx.disconnect_timeout(), &cancel);
    ctx.ensure_current()?;
    let outcome = match waited {
        Ok(()) => {
            info!("Device left the bus, expecting re-enumeration in DFU mode");
            DetachOutcome::Disconnected
        }
        Err(e) => {
            let err = SessionError::DisconnectTimeout(e);
            warn!(error = %err, "Device ignored detach");
            ctx.host.log_warning(format!("Detach failed: {err}"));
            DetachOutcome::DisconnectTimedOut
        }
    };

    ctx.teardown(None);
    Ok(outcome)
}
