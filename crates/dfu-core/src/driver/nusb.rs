//! nusb-based DFU driver implementation.

use std::thread;
use std::time::{Duration, Instant};

use nusb::transfer::{ControlIn, ControlOut, ControlType, Recipient, TransferError};
use nusb::{Device, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, warn};

use super::traits::{CancelToken, DeviceHandle, DeviceInfo, DfuDriver, DriverError, TransferFault};
use crate::protocol::constants::{
    DFU_CLRSTATUS, DFU_DETACH, DFU_DNLOAD, DFU_GETSTATUS, DFU_INTERFACE_CLASS,
    DFU_INTERFACE_SUBCLASS, DFU_STATUS_LEN,
};
use crate::protocol::{DfuState, DfuStatus};

/// Timeout for a single control transfer.
const CONTROL_TIMEOUT: Duration = Duration::from_millis(5000);
/// Upper bound for one write/poll cycle.
const POLL_TIMEOUT: Duration = Duration::from_millis(10_000);
/// Bus re-scan interval while waiting for a device to leave.
const BUS_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// nusb-based DFU driver bound to one interface of one device.
pub struct NusbDriver {
    device_info: nusb::DeviceInfo,
    info: DeviceInfo,
    device: Option<Device>,
    interface: Option<Interface>,
}

impl NusbDriver {
    /// Driver for the DFU interface `interface_number` of `device_info`.
    pub fn new(device_info: nusb::DeviceInfo, interface_number: u8) -> Option<Self> {
        let intf = device_info
            .interfaces()
            .find(|i| i.interface_number() == interface_number && is_dfu_interface(i))?;

        let info = DeviceInfo {
            handle: DeviceHandle::new(device_info.bus_id(), device_info.device_address()),
            vendor_id: device_info.vendor_id(),
            product_id: device_info.product_id(),
            product_name: device_info.product_string().map(str::to_string),
            manufacturer: device_info.manufacturer_string().map(str::to_string),
            serial_number: device_info.serial_number().map(str::to_string),
            configuration_value: 1,
            interface_number,
            alt_setting: 0,
            interface_protocol: intf.protocol(),
            interface_name: intf.interface_string().map(str::to_string),
        };

        Some(Self {
            device_info,
            info,
            device: None,
            interface: None,
        })
    }

    fn interface(&self) -> Result<&Interface, DriverError> {
        self.interface.as_ref().ok_or(DriverError::NotOpen)
    }

    fn control_out(&self, request: u8, value: u16, data: &[u8]) -> Result<(), DriverError> {
        let interface = self.interface()?;
        interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index: interface.interface_number() as u16,
                    data,
                },
                CONTROL_TIMEOUT,
            )
            .wait()
            .map_err(|e| map_transfer_error("ControlTransferOut failed", e))
    }

    fn control_in(&self, request: u8, value: u16, length: u16) -> Result<Vec<u8>, DriverError> {
        let interface = self.interface()?;
        interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index: interface.interface_number() as u16,
                    length,
                },
                CONTROL_TIMEOUT,
            )
            .wait()
            .map_err(|e| map_transfer_error("ControlTransferIn failed", e))
    }

    /// Issue GETSTATUS until the device reaches one of `targets`, sleeping for
    /// the poll timeout it asks for in between.
    fn poll_until(&mut self, targets: &[DfuState]) -> Result<DfuStatus, DriverError> {
        let start = Instant::now();
        loop {
            let status = self.get_status()?;
            if !status.is_ok() || status.is_error_state() {
                return Err(DriverError::Status(status));
            }
            if targets.contains(&status.state) {
                return Ok(status);
            }
            if start.elapsed() >= POLL_TIMEOUT {
                return Err(DriverError::Timeout {
                    timeout_ms: POLL_TIMEOUT.as_millis() as u64,
                });
            }
            thread::sleep(Duration::from_millis(status.poll_timeout.into()));
        }
    }

    fn dnload(&mut self, block: u16, data: &[u8]) -> Result<(), DriverError> {
        self.control_out(DFU_DNLOAD, block, data)
    }

    fn is_on_bus(&self) -> Result<bool, DriverError> {
        let handle = &self.info.handle;
        let mut devices = list_devices()
            .wait()
            .map_err(|e| DriverError::Other(e.to_string()))?;
        Ok(devices.any(|d| d.bus_id() == handle.bus_id && d.device_address() == handle.address))
    }
}

impl DfuDriver for NusbDriver {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    #[instrument(skip(self), fields(device = %self.info.handle))]
    fn open(&mut self) -> Result<(), DriverError> {
        let device = self
            .device_info
            .open()
            .wait()
            .map_err(|e| DriverError::OpenFailed(e.to_string()))?;

        if let Ok(config) = device.active_configuration() {
            self.info.configuration_value = config.configuration_value();
            if let Some(alt) = config.interface_alt_settings().find(|alt| {
                alt.interface_number() == self.info.interface_number
                    && alt.class() == DFU_INTERFACE_CLASS
                    && alt.subclass() == DFU_INTERFACE_SUBCLASS
            }) {
                self.info.alt_setting = alt.alternate_setting();
                self.info.interface_protocol = alt.protocol();
                if self.info.interface_name.is_none()
                    && let Some(index) = alt.string_index()
                {
                    self.info.interface_name = device
                        .get_string_descriptor(
                            index,
                            nusb::descriptors::language_id::US_ENGLISH,
                            CONTROL_TIMEOUT,
                        )
                        .wait()
                        .ok();
                }
            }
        }

        let interface = device
            .claim_interface(self.info.interface_number)
            .wait()
            .map_err(|e| DriverError::ClaimInterfaceFailed {
                interface: self.info.interface_number,
                message: e.to_string(),
            })?;
        if self.info.alt_setting != 0 {
            interface
                .set_alt_setting(self.info.alt_setting)
                .wait()
                .map_err(|e| DriverError::ClaimInterfaceFailed {
                    interface: self.info.interface_number,
                    message: e.to_string(),
                })?;
        }

        info!(
            vendor_id = %format!("{:04X}", self.info.vendor_id),
            product_id = %format!("{:04X}", self.info.product_id),
            interface = self.info.interface_number,
            alt = self.info.alt_setting,
            "Device opened"
        );
        self.device = Some(device);
        self.interface = Some(interface);
        Ok(())
    }

    fn read_configuration_descriptor(&mut self, index: u8) -> Result<Vec<u8>, DriverError> {
        let device = self.device.as_ref().ok_or(DriverError::NotOpen)?;
        device
            .configurations()
            .nth(index as usize)
            .map(|config| config.as_bytes().to_vec())
            .ok_or_else(|| DriverError::DescriptorUnavailable(format!("no configuration {index}")))
    }

    fn get_status(&mut self) -> Result<DfuStatus, DriverError> {
        let data = self.control_in(DFU_GETSTATUS, 0, DFU_STATUS_LEN)?;
        DfuStatus::from_bytes(&data).ok_or_else(|| {
            DriverError::InvalidResponse(format!("GETSTATUS returned {} bytes", data.len()))
        })
    }

    fn clear_status(&mut self) -> Result<(), DriverError> {
        self.control_out(DFU_CLRSTATUS, 0, &[])
    }

    #[instrument(skip(self))]
    fn detach(&mut self, timeout_ms: u16) -> Result<(), DriverError> {
        self.control_out(DFU_DETACH, timeout_ms, &[])
    }

    #[instrument(skip(self, image, progress), fields(size = image.len()))]
    fn download(
        &mut self,
        chunk_size: u16,
        image: &[u8],
        manifestation_tolerant: bool,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<(), DriverError> {
        if chunk_size == 0 {
            return Err(DriverError::Other("Transfer size must be greater than zero".into()));
        }

        let mut done = 0;
        for (block, chunk) in image.chunks(chunk_size as usize).enumerate() {
            self.dnload(block as u16, chunk)?;
            self.poll_until(&[DfuState::DnloadIdle])?;
            done += chunk.len();
            progress(done, image.len());
        }
        debug!(bytes = done, "All blocks written, starting manifestation");

        let blocks = image.len().div_ceil(chunk_size as usize);
        self.dnload(blocks as u16, &[])?;

        if manifestation_tolerant {
            self.poll_until(&[DfuState::DfuIdle, DfuState::ManifestWaitReset])?;
        } else if let Err(e) = self.get_status() {
            // The device may reset before it answers.
            debug!(error = %e, "No status after manifestation request");
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.interface = None;
        self.device = None;
        Ok(())
    }

    #[instrument(skip(self, cancel), fields(device = %self.info.handle))]
    fn wait_disconnected(&mut self, timeout: Duration, cancel: &CancelToken) -> Result<(), DriverError> {
        let start = Instant::now();
        loop {
            if cancel.is_removed() {
                debug!("Removal reported by the host");
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(DriverError::Cancelled);
            }
            if !self.is_on_bus()? {
                debug!(elapsed_ms = start.elapsed().as_millis() as u64, "Device left the bus");
                return Ok(());
            }
            if start.elapsed() >= timeout {
                warn!(timeout_ms = timeout.as_millis() as u64, "Device still on the bus");
                return Err(DriverError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            thread::sleep(BUS_POLL_INTERVAL);
        }
    }
}

fn is_dfu_interface(intf: &nusb::InterfaceInfo) -> bool {
    intf.class() == DFU_INTERFACE_CLASS && intf.subclass() == DFU_INTERFACE_SUBCLASS
}

fn map_transfer_error(context: &str, err: TransferError) -> DriverError {
    let fault = match err {
        TransferError::Stall => TransferFault::Stall,
        TransferError::Disconnected => TransferFault::Disconnected,
        TransferError::Fault => TransferFault::Fault,
        TransferError::Cancelled => TransferFault::Cancelled,
        _ => TransferFault::Other,
    };
    DriverError::transfer(fault, format!("{context}: {err}"))
}

/// Bus handles of every device currently attached.
pub fn attached_devices() -> Result<Vec<DeviceHandle>, DriverError> {
    Ok(list_devices()
        .wait()
        .map_err(|e| DriverError::Other(e.to_string()))?
        .map(|d| DeviceHandle::new(d.bus_id(), d.device_address()))
        .collect())
}

/// Find DFU capable devices, optionally filtered by vendor id and serial
/// number. One driver is returned per DFU interface.
#[instrument(level = "info")]
pub fn find_dfu_devices(vid: Option<u16>, serial: Option<&str>) -> Result<Vec<NusbDriver>, DriverError> {
    let devices = list_devices()
        .wait()
        .map_err(|e| DriverError::Other(e.to_string()))?
        .filter(|dev| {
            vid.is_none_or(|id| dev.vendor_id() == id)
                && serial.is_none_or(|s| dev.serial_number() == Some(s))
        });

    let mut drivers = Vec::new();
    for device in devices {
        let interfaces: Vec<u8> = device
            .interfaces()
            .filter(|i| is_dfu_interface(i))
            .map(|i| i.interface_number())
            .collect();
        for number in interfaces {
            if let Some(driver) = NusbDriver::new(device.clone(), number) {
                debug!(device = %driver.info.handle, interface = number, "Found DFU interface");
                drivers.push(driver);
            }
        }
    }
    Ok(drivers)
}
