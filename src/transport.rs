//! USB HID transport layer for CFU communication.
//!
//! Provides a trait-based abstraction over HID report exchange,
//! enabling both real hardware and mock testing. Commands travel as
//! vendor control transfers carrying the HID SET_REPORT request;
//! acknowledgments arrive on the interrupt IN endpoint; device
//! capabilities are read back as a feature report (GET_REPORT).

use std::time::Duration;

use rusb::{Context, DeviceHandle, UsbContext};

#[cfg(test)]
use mockall::automock;

use crate::config::{GET_REPORT, SET_REPORT};
use crate::error::{CfuError, CfuResult};

/// Interface carrying the CFU interrupt endpoint.
const HID_INTERFACE: u8 = 0x00;

/// Trait for CFU transport operations.
///
/// This abstraction allows for mocking in tests and potential
/// alternative transport mechanisms.
#[cfg_attr(test, automock)]
pub trait CfuTransport: Send {
    /// Send a report to the device via a SET_REPORT control transfer.
    ///
    /// # Arguments
    /// * `report_value` - wValue of the transfer: report type in the high
    ///   byte, report id in the low byte
    /// * `data` - Report bytes, including the leading report id
    /// * `timeout_ms` - Timeout in milliseconds; zero waits indefinitely
    fn send_report(&mut self, report_value: u16, data: &[u8], timeout_ms: u64) -> CfuResult<()>;

    /// Read an acknowledgment report from an interrupt IN endpoint.
    ///
    /// # Returns
    /// Number of bytes read
    fn read_report(&mut self, endpoint: u8, buffer: &mut [u8], timeout_ms: u64)
        -> CfuResult<usize>;

    /// Read a feature report via a GET_REPORT control transfer.
    ///
    /// # Returns
    /// Number of bytes read
    fn read_feature_report(
        &mut self,
        report_value: u16,
        buffer: &mut [u8],
        timeout_ms: u64,
    ) -> CfuResult<usize>;
}

/// USB HID transport implementation over libusb.
pub struct UsbHidTransport {
    handle: DeviceHandle<Context>,
}

impl UsbHidTransport {
    /// Open the first device matching the given vendor and product id.
    ///
    /// Claims the HID interface and, where the platform supports it,
    /// detaches any kernel driver bound to it for the duration of the
    /// session.
    pub fn open(vid: u16, pid: u16) -> CfuResult<Self> {
        let context = Context::new()?;
        for device in context.devices()?.iter() {
            // Devices that refuse a descriptor read are not ours.
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(_) => continue,
            };
            if descriptor.vendor_id() != vid || descriptor.product_id() != pid {
                continue;
            }
            let handle = device.open()?;
            handle.set_auto_detach_kernel_driver(true).ok();
            handle.claim_interface(HID_INTERFACE)?;
            return Ok(Self { handle });
        }
        Err(CfuError::NoDeviceFound { vid, pid })
    }

    fn timeout(timeout_ms: u64) -> Duration {
        // Duration::ZERO means "no timeout" at the libusb level.
        Duration::from_millis(timeout_ms)
    }
}

impl CfuTransport for UsbHidTransport {
    fn send_report(&mut self, report_value: u16, data: &[u8], timeout_ms: u64) -> CfuResult<()> {
        // Reports go out as vendor requests addressed to the device, not
        // class requests to the interface; the firmware routes them by
        // the HID request code and wValue alone.
        let request_type = rusb::request_type(
            rusb::Direction::Out,
            rusb::RequestType::Vendor,
            rusb::Recipient::Device,
        );
        self.handle.write_control(
            request_type,
            SET_REPORT,
            report_value,
            0,
            data,
            Self::timeout(timeout_ms),
        )?;
        Ok(())
    }

    fn read_report(
        &mut self,
        endpoint: u8,
        buffer: &mut [u8],
        timeout_ms: u64,
    ) -> CfuResult<usize> {
        let n = self
            .handle
            .read_interrupt(endpoint, buffer, Self::timeout(timeout_ms))?;
        Ok(n)
    }

    fn read_feature_report(
        &mut self,
        report_value: u16,
        buffer: &mut [u8],
        timeout_ms: u64,
    ) -> CfuResult<usize> {
        let request_type = rusb::request_type(
            rusb::Direction::In,
            rusb::RequestType::Vendor,
            rusb::Recipient::Device,
        );
        let n = self.handle.read_control(
            request_type,
            GET_REPORT,
            report_value,
            0,
            buffer,
            Self::timeout(timeout_ms),
        )?;
        Ok(n)
    }
}

impl Drop for UsbHidTransport {
    fn drop(&mut self) {
        self.handle.release_interface(HID_INTERFACE).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{report_value, OFFER_REPORT_ID, OUT_REPORT_TYPE, START_ENTIRE_TRANSACTION};

    fn send_start(transport: &mut impl CfuTransport) -> CfuResult<()> {
        transport.send_report(
            report_value(OUT_REPORT_TYPE, OFFER_REPORT_ID),
            &START_ENTIRE_TRANSACTION,
            0,
        )
    }

    #[test]
    fn test_timeout_zero_maps_to_no_timeout() {
        assert_eq!(UsbHidTransport::timeout(0), Duration::ZERO);
        assert_eq!(UsbHidTransport::timeout(250), Duration::from_millis(250));
    }

    #[test]
    fn test_mock_transport_sees_report_value_and_bytes() {
        let mut mock = MockCfuTransport::new();
        mock.expect_send_report()
            .withf(|value, data, timeout| {
                *value == 0x0225 && data[0] == OFFER_REPORT_ID && data.len() == 17 && *timeout == 0
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        send_start(&mut mock).unwrap();
    }

    #[test]
    fn test_mock_transport_propagates_errors() {
        let mut mock = MockCfuTransport::new();
        mock.expect_send_report()
            .returning(|_, _, _| Err(CfuError::Usb(rusb::Error::Pipe)));

        let err = send_start(&mut mock).unwrap_err();
        assert!(matches!(err, CfuError::Usb(rusb::Error::Pipe)));
    }
}
