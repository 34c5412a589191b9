//! Device handle seam and control endpoint discovery.

use std::{ffi::CString, sync::Mutex, time::Duration};

use hidapi::{HidApi, HidDevice};
use log::{debug, info};

use crate::error::Error;

use super::{CONTROL_INTERFACE, PRODUCT_ID, VENDOR_ID};

/// Handle to one HID endpoint. Writes are fast and uninterruptible;
/// there is no cancellation of an in-flight write. The same endpoint
/// also delivers key-press input reports, picked up through [`read`].
///
/// [`read`]: DeviceIO::read
pub trait DeviceIO: Send + Sync + 'static {
    fn write(&self, buf: &[u8]) -> Result<usize, Error>;

    /// Reads one pending input report, returning 0 when none arrived
    /// within `timeout`. Default for handles with nothing to deliver.
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, Error> {
        let _ = (buf, timeout);
        Ok(0)
    }

    /// Releases the underlying handle. Default is a no-op for handles
    /// that close on drop.
    fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

// `HidDevice` is `Send` but not `Sync`, so the handle sits behind a
// mutex to satisfy the trait's `Sync` bound.
impl DeviceIO for Mutex<HidDevice> {
    fn write(&self, buf: &[u8]) -> Result<usize, Error> {
        // Control commands are feature reports, not interrupt writes.
        self.lock()
            .expect("device mutex poisoned")
            .send_feature_report(buf)
            .map(|()| buf.len())
            .map_err(|e| Error::DeviceIo(e.to_string()))
    }

    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, Error> {
        self.lock()
            .expect("device mutex poisoned")
            .read_timeout(buf, timeout.as_millis() as i32)
            .map_err(|e| Error::DeviceIo(e.to_string()))
    }
}

impl DeviceIO for Box<dyn DeviceIO> {
    fn write(&self, buf: &[u8]) -> Result<usize, Error> {
        (**self).write(buf)
    }

    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, Error> {
        (**self).read(buf, timeout)
    }

    fn close(&self) -> Result<(), Error> {
        (**self).close()
    }
}

/// Dry-run handle that accepts every write without touching hardware
/// and never delivers a key event.
pub struct NullDevice;

impl DeviceIO for NullDevice {
    fn write(&self, buf: &[u8]) -> Result<usize, Error> {
        debug!("dry run: swallowing {} byte report", buf.len());
        Ok(buf.len())
    }
}

/// True when `path` names the control sub-interface rather than one of
/// the other interfaces the same physical device exposes.
pub fn is_control_interface(path: &str) -> bool {
    path.to_ascii_lowercase().contains(CONTROL_INTERFACE)
}

/// Picks the control sub-interface path out of enumerated candidates.
///
/// Zero matches is always [`Error::DeviceNotFound`], never any other
/// error kind.
pub fn select_control_path(
    candidates: impl IntoIterator<Item = (u16, u16, CString)>,
) -> Result<CString, Error> {
    candidates
        .into_iter()
        .filter(|(vid, pid, _)| *vid == VENDOR_ID && *pid == PRODUCT_ID)
        .map(|(_, _, path)| path)
        .find(|path| is_control_interface(&path.to_string_lossy()))
        .ok_or(Error::DeviceNotFound)
}

/// Enumerates candidate endpoints and opens the control sub-interface.
///
/// An open failure on a matched path is [`Error::DeviceIo`].
pub fn open_control_endpoint(api: &HidApi) -> Result<HidDevice, Error> {
    let path = select_control_path(
        api.device_list()
            .map(|dev| (dev.vendor_id(), dev.product_id(), dev.path().to_owned())),
    )?;

    info!("opening keyboard control endpoint: {}", path.to_string_lossy());
    api.open_path(&path).map_err(|e| Error::DeviceIo(e.to_string()))
}
