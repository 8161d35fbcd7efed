//! DfuReady → Transferring → Manifesting → (Disconnected | DfuReady).

use tracing::{debug, info, warn};

use crate::driver::DfuDriver;
use crate::error::SessionError;
use crate::events::{DfuObserver, SessionPhase};

use super::{DownloadOutcome, HandlerContext};

/// Transfer `image` to a device in DFU mode.
///
/// A device stuck in `dfuERROR` gets a best-effort `DFU_CLRSTATUS` first.
/// A failed transfer leaves the session connected so the host may retry.
pub fn handle_download<D: DfuDriver, O: DfuObserver>(
    ctx: &mut HandlerContext<'_, D, O>,
    image: &[u8],
) -> Result<DownloadOutcome, SessionError> {
    let (phase, can_download) = ctx.with_state(|s| (s.phase, s.can_download()))?;
    if phase != SessionPhase::DfuReady {
        return Err(SessionError::InvalidPhase {
            operation: "download",
            phase,
        });
    }
    if !can_download {
        ctx.host.log_error("Device does not support firmware download");
        return Err(SessionError::DownloadUnsupported);
    }
    if image.is_empty() {
        return Err(SessionError::EmptyImage);
    }

    ctx.goto(SessionPhase::Transferring);
    ctx.host.controls_changed(false, false);

    recover_error_state(ctx);
    ctx.ensure_current()?;

    let (transfer_size, tolerant, cancel) =
        ctx.with_state(|s| (s.transfer_size, s.manifestation_tolerant, s.cancel.clone()))?;
    info!(size = image.len(), transfer_size, tolerant, "Starting download");

    let host = ctx.host.clone();
    let result = ctx
        .driver
        .download(transfer_size, image, tolerant, &mut |done, total| {
            host.log_progress(done, total)
        });
    ctx.ensure_current()?;

    if let Err(e) = result {
        warn!(error = %e, "Download failed");
        let err = SessionError::DownloadFailed(e);
        ctx.host.log_error(err.to_string());
        ctx.goto(SessionPhase::DfuReady);
        ctx.host.controls_changed(false, true);
        return Err(err);
    }

    ctx.host.log_info("Done!");

    if tolerant {
        ctx.goto(SessionPhase::DfuReady);
        ctx.host.controls_changed(false, true);
        return Ok(DownloadOutcome::Complete);
    }

    ctx.goto(SessionPhase::Manifesting);
    let waited = ctx.driver.wait_disconnected(ctx.disconnect_timeout(), &cancel);
    ctx.ensure_current()?;
    match waited {
        Ok(()) => {
            info!("Device reset after manifestation");
            ctx.teardown(None);
            Ok(DownloadOutcome::DeviceReset)
        }
        Err(e) => {
            let err = SessionError::DisconnectTimeout(e);
            warn!(error = %err, "Device unexpectedly tolerated manifestation");
            ctx.host
                .log_warning("Device unexpectedly tolerated manifestation.");
            ctx.goto(SessionPhase::DfuReady);
            ctx.host.controls_changed(false, true);
            Ok(DownloadOutcome::ManifestationTolerated)
        }
    }
}

/// Clear a latched error so the device accepts `DFU_DNLOAD` again. Failures
/// are reported and otherwise ignored.
fn recover_error_state<D: DfuDriver, O: DfuObserver>(ctx: &mut HandlerContext<'_, D, O>) {
    let clear_result = match ctx.driver.get_status() {
        Ok(status) if status.is_error_state() => {
            debug!(%status, "Clearing device status");
            ctx.host.log_debug(format!("Clearing device status ({status})"));
            ctx.driver.clear_status()
        }
        Ok(status) => {
            debug!(%status, "Device status");
            Ok(())
        }
        Err(e) => Err(e),
    };
    if let Err(e) = clear_result {
        let err = SessionError::StatusClearFailed(e);
        warn!(error = %err, "Continuing with download");
        ctx.host.log_warning(err.to_string());
    }
}
