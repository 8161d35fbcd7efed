//! Mock DFU driver for testing.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::traits::{CancelToken, DeviceHandle, DeviceInfo, DfuDriver, DriverError};
use crate::protocol::constants::DFU_PROTOCOL_DFU_MODE;
use crate::protocol::{DfuState, DfuStatus};

/// How `wait_disconnected` behaves.
#[derive(Debug, Clone)]
pub enum WaitBehavior {
    /// Device leaves the bus right away.
    Disconnect,
    /// Report a timeout right away without sleeping.
    Timeout,
    /// Block until the token reports removal or cancellation, or the timeout
    /// really elapses.
    Block,
    Fail(DriverError),
}

/// Download request captured by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    pub chunk_size: u16,
    pub image_len: usize,
    pub manifestation_tolerant: bool,
}

struct Script {
    open: Result<(), DriverError>,
    config_descriptor: Result<Vec<u8>, DriverError>,
    status: Result<DfuStatus, DriverError>,
    clear_status: Result<(), DriverError>,
    detach: Result<(), DriverError>,
    download: Result<(), DriverError>,
    close: Result<(), DriverError>,
    wait: WaitBehavior,
    hooks: Vec<(&'static str, Hook)>,
}

type Hook = Arc<dyn Fn() + Send + Sync>;

impl Default for Script {
    fn default() -> Self {
        Self {
            open: Ok(()),
            config_descriptor: Err(DriverError::DescriptorUnavailable("not scripted".into())),
            status: Ok(DfuStatus {
                status_code: 0,
                poll_timeout: 0,
                state: DfuState::DfuIdle,
            }),
            clear_status: Ok(()),
            detach: Ok(()),
            download: Ok(()),
            close: Ok(()),
            wait: WaitBehavior::Disconnect,
            hooks: Vec::new(),
        }
    }
}

/// Mock driver for unit testing controller logic.
///
/// Clones share the script and the call log, so a test can keep one clone
/// while the controller owns the other.
#[derive(Clone)]
pub struct MockDriver {
    info: DeviceInfo,
    script: Arc<Mutex<Script>>,
    /// Captured driver calls, in order.
    calls: Arc<Mutex<Vec<&'static str>>>,
    downloads: Arc<Mutex<Vec<DownloadRecord>>>,
}

impl MockDriver {
    /// A DFU-mode device on bus 1, address 5, configuration 1.
    pub fn new() -> Self {
        Self {
            info: DeviceInfo {
                handle: DeviceHandle::new("1", 5),
                vendor_id: 0x04D8,
                product_id: 0xDF11,
                product_name: Some("Kiwrious UV Sensor".into()),
                manufacturer: Some("Kiwrious".into()),
                serial_number: Some("0001".into()),
                configuration_value: 1,
                interface_number: 0,
                alt_setting: 0,
                interface_protocol: DFU_PROTOCOL_DFU_MODE,
                interface_name: None,
            },
            script: Arc::new(Mutex::new(Script::default())),
            calls: Arc::new(Mutex::new(Vec::new())),
            downloads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_handle(mut self, handle: DeviceHandle) -> Self {
        self.info.handle = handle;
        self
    }

    pub fn with_interface_protocol(mut self, protocol: u8) -> Self {
        self.info.interface_protocol = protocol;
        self
    }

    pub fn with_interface_name(mut self, name: &str) -> Self {
        self.info.interface_name = Some(name.into());
        self
    }

    pub fn with_product_name(mut self, name: &str) -> Self {
        self.info.product_name = Some(name.into());
        self
    }

    pub fn set_open_result(&self, result: Result<(), DriverError>) {
        self.script.lock().unwrap().open = result;
    }

    pub fn set_config_descriptor(&self, result: Result<Vec<u8>, DriverError>) {
        self.script.lock().unwrap().config_descriptor = result;
    }

    pub fn set_status(&self, result: Result<DfuStatus, DriverError>) {
        self.script.lock().unwrap().status = result;
    }

    pub fn set_clear_status_result(&self, result: Result<(), DriverError>) {
        self.script.lock().unwrap().clear_status = result;
    }

    pub fn set_detach_result(&self, result: Result<(), DriverError>) {
        self.script.lock().unwrap().detach = result;
    }

    pub fn set_download_result(&self, result: Result<(), DriverError>) {
        self.script.lock().unwrap().download = result;
    }

    pub fn set_close_result(&self, result: Result<(), DriverError>) {
        self.script.lock().unwrap().close = result;
    }

    pub fn set_wait_behavior(&self, behavior: WaitBehavior) {
        self.script.lock().unwrap().wait = behavior;
    }

    /// Run `hook` whenever `name` is called, after the call is recorded and
    /// before its scripted result is produced.
    pub fn on_call(&self, name: &'static str, hook: impl Fn() + Send + Sync + 'static) {
        self.script.lock().unwrap().hooks.push((name, Arc::new(hook)));
    }

    /// Get all captured calls.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    /// How many times `name` was called.
    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == name).count()
    }

    pub fn downloads(&self) -> Vec<DownloadRecord> {
        self.downloads.lock().unwrap().clone()
    }

    fn record(&self, name: &'static str) {
        self.calls.lock().unwrap().push(name);
        let hooks: Vec<Hook> = self
            .script
            .lock()
            .unwrap()
            .hooks
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        for hook in hooks {
            hook();
        }
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DfuDriver for MockDriver {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn open(&mut self) -> Result<(), DriverError> {
        self.record("open");
        self.script.lock().unwrap().open.clone()
    }

    fn read_configuration_descriptor(&mut self, _index: u8) -> Result<Vec<u8>, DriverError> {
        self.record("read_configuration_descriptor");
        self.script.lock().unwrap().config_descriptor.clone()
    }

    fn get_status(&mut self) -> Result<DfuStatus, DriverError> {
        self.record("get_status");
        self.script.lock().unwrap().status.clone()
    }

    fn clear_status(&mut self) -> Result<(), DriverError> {
        self.record("clear_status");
        self.script.lock().unwrap().clear_status.clone()
    }

    fn detach(&mut self, _timeout_ms: u16) -> Result<(), DriverError> {
        self.record("detach");
        self.script.lock().unwrap().detach.clone()
    }

    fn download(
        &mut self,
        chunk_size: u16,
        image: &[u8],
        manifestation_tolerant: bool,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<(), DriverError> {
        self.record("download");
        self.downloads.lock().unwrap().push(DownloadRecord {
            chunk_size,
            image_len: image.len(),
            manifestation_tolerant,
        });
        let result = self.script.lock().unwrap().download.clone();
        if result.is_ok() {
            let mut done = 0;
            for chunk in image.chunks(chunk_size.max(1) as usize) {
                done += chunk.len();
                progress(done, image.len());
            }
        }
        result
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.record("close");
        self.script.lock().unwrap().close.clone()
    }

    fn wait_disconnected(&mut self, timeout: Duration, cancel: &CancelToken) -> Result<(), DriverError> {
        self.record("wait_disconnected");
        if cancel.is_removed() {
            return Ok(());
        }
        let behavior = self.script.lock().unwrap().wait.clone();
        match behavior {
            WaitBehavior::Disconnect => Ok(()),
            WaitBehavior::Timeout => Err(DriverError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            WaitBehavior::Fail(err) => Err(err),
            WaitBehavior::Block => {
                let start = Instant::now();
                loop {
                    if cancel.is_removed() {
                        return Ok(());
                    }
                    if cancel.is_cancelled() {
                        return Err(DriverError::Cancelled);
                    }
                    if start.elapsed() >= timeout {
                        return Err(DriverError::Timeout {
                            timeout_ms: timeout.as_millis() as u64,
                        });
                    }
                    thread::sleep(Duration::from_millis(2));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_call_capture() {
        let mock = MockDriver::new();
        let mut driver = mock.clone();
        driver.open().unwrap();
        driver.get_status().unwrap();
        driver.close().unwrap();

        assert_eq!(mock.calls(), vec!["open", "get_status", "close"]);
        assert_eq!(mock.count("open"), 1);
    }

    #[test]
    fn test_mock_download_progress() {
        let mock = MockDriver::new();
        let mut driver = mock.clone();
        let mut reports = Vec::new();
        driver
            .download(4, &[0u8; 10], false, &mut |done, total| reports.push((done, total)))
            .unwrap();

        assert_eq!(reports, vec![(4, 10), (8, 10), (10, 10)]);
        assert_eq!(
            mock.downloads(),
            vec![DownloadRecord {
                chunk_size: 4,
                image_len: 10,
                manifestation_tolerant: false
            }]
        );
    }

    #[test]
    fn test_mock_wait_block_times_out() {
        let mut mock = MockDriver::new();
        mock.set_wait_behavior(WaitBehavior::Block);
        let err = mock
            .wait_disconnected(Duration::from_millis(20), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err, DriverError::Timeout { timeout_ms: 20 });
    }

    #[test]
    fn test_mock_wait_block_cancelled() {
        let mut mock = MockDriver::new();
        mock.set_wait_behavior(WaitBehavior::Block);
        let token = CancelToken::new();
        token.cancel();
        let err = mock
            .wait_disconnected(Duration::from_secs(5), &token)
            .unwrap_err();
        assert_eq!(err, DriverError::Cancelled);
    }

    #[test]
    fn test_mock_wait_ends_on_removal() {
        let mut mock = MockDriver::new();
        mock.set_wait_behavior(WaitBehavior::Timeout);
        let token = CancelToken::new();
        token.mark_removed();
        assert_eq!(mock.wait_disconnected(Duration::from_secs(5), &token), Ok(()));
    }

    #[test]
    fn test_mock_hooks_run_per_call() {
        let mock = MockDriver::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        mock.on_call("get_status", move || *counter.lock().unwrap() += 1);

        let mut driver = mock.clone();
        driver.open().unwrap();
        driver.get_status().unwrap();
        driver.get_status().unwrap();
        assert_eq!(*hits.lock().unwrap(), 2);
    }
}
