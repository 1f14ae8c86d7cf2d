//! CFU state machine engine for USB-HID devices.
//!
//! Orchestrates the complete update flow:
//! 1. START_ENTIRE_TRANSACTION / START_OFFER_LIST - open the handshake
//! 2. UPDATE_OFFER - offer the staged image, handle accept/reject/busy
//! 3. UPDATE_CONTENT alternating with CHECK_UPDATE_CONTENT - stream the
//!    payload as 52-byte units, honoring the device's burst class
//! 4. END_OFFER_LIST - close the offer list
//! 5. Swap-pending verification - re-offer and expect a reject carrying
//!    SWAP_PENDING, confirming the device staged the image

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ack::{should_read_ack, ContentAck};
use crate::config::{
    report_value, ContentStatus, OfferStatus, RejectReason, ACK_BUFFER_SIZE,
    CONTENT_RESPONSE_REPORT_ID, FEATURE_BUFFER_SIZE, FEATURE_REPORT_TYPE, FIRMWARE_REPORT_ID,
    INTERRUPT_IN_ENDPOINT, MAX_BUSY_RETRIES, OFFER_REPORT_ID, OUT_REPORT_TYPE,
    TRANSFER_TIMEOUT_MS,
};
use crate::error::{CfuError, CfuResult};
use crate::firmware_reader::{read_firmware_package, FirmwarePackage};
use crate::framer::PayloadCursor;
use crate::report::{
    build_content_command, build_offer_command, AckReport, FeatureReport, OfferControl,
    OfferRecord,
};
use crate::session::{CfuState, Session};
use crate::transport::CfuTransport;

/// Update progress stages for UI feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", content = "data")]
pub enum UpdateStage {
    /// Reading firmware package.
    ReadingPackage,
    /// Device identity read back before any offer goes out.
    DeviceInfo {
        firmware_version: String,
        burst_ack_size: u8,
    },
    /// Entire-transaction handshake acknowledged.
    TransactionStarted,
    /// Device accepted the update offer.
    OfferAccepted,
    /// Streaming payload units.
    Uploading { sent: usize, total: usize },
    /// Final payload unit sent and acknowledged.
    PayloadComplete,
    /// Re-offering to confirm the staged image.
    VerifyingSwap,
    /// Update flow finished.
    Complete { success: bool },
    /// Debug log message.
    Log { message: String },
}

impl UpdateStage {
    /// Get a percentage estimate for this stage.
    pub fn percent(&self) -> f32 {
        match self {
            UpdateStage::ReadingPackage => 0.0,
            UpdateStage::DeviceInfo { .. } => 2.0,
            UpdateStage::TransactionStarted => 5.0,
            UpdateStage::OfferAccepted => 8.0,
            UpdateStage::Uploading { sent, total } => {
                if *total == 0 {
                    8.0
                } else {
                    8.0 + (*sent as f32 / *total as f32) * 84.0
                }
            }
            UpdateStage::PayloadComplete => 92.0,
            UpdateStage::VerifyingSwap => 95.0,
            UpdateStage::Complete { .. } => 100.0,
            // Log messages don't affect progress percentage
            UpdateStage::Log { .. } => -1.0,
        }
    }

    /// Get a human-readable message for this stage.
    pub fn message(&self) -> String {
        match self {
            UpdateStage::ReadingPackage => "Reading firmware package...".into(),
            UpdateStage::DeviceInfo {
                firmware_version,
                burst_ack_size,
            } => format!(
                "Device firmware {}, burst ack class {}",
                firmware_version, burst_ack_size
            ),
            UpdateStage::TransactionStarted => "Update transaction started...".into(),
            UpdateStage::OfferAccepted => "Offer accepted, sending payload...".into(),
            UpdateStage::Uploading { sent, total } => {
                let percent = if *total == 0 { 0 } else { (sent * 100) / total };
                format!("Uploading payload... {}%", percent)
            }
            UpdateStage::PayloadComplete => "Payload transfer complete".into(),
            UpdateStage::VerifyingSwap => "Verifying staged update...".into(),
            UpdateStage::Complete { success } => {
                if *success {
                    "Update complete!".into()
                } else {
                    "Update stopped before completion".into()
                }
            }
            UpdateStage::Log { message } => message.clone(),
        }
    }
}

/// Images driving one update attempt.
#[derive(Debug, Clone)]
pub struct UpdateContext {
    /// Offer image; the leading 16 bytes form the offer record.
    pub offer: Vec<u8>,
    /// Payload image, a stream of address-prefixed sub-records.
    pub payload: Vec<u8>,
}

impl From<FirmwarePackage> for UpdateContext {
    fn from(package: FirmwarePackage) -> Self {
        Self {
            offer: package.offer,
            payload: package.payload,
        }
    }
}

/// CFU protocol engine over a HID transport.
pub struct CfuProtocol<T: CfuTransport, L: Fn(UpdateStage)> {
    transport: T,
    session: Session,
    on_progress: L,
}

impl<T: CfuTransport, L: Fn(UpdateStage)> CfuProtocol<T, L> {
    /// Create a new engine with the given transport and progress sink.
    pub fn new(transport: T, on_progress: L) -> Self {
        Self {
            transport,
            session: Session::new(),
            on_progress,
        }
    }

    /// Current session state, for callers that inspect progress.
    pub fn session(&self) -> &Session {
        &self.session
    }

    fn progress(&self, stage: UpdateStage) {
        (self.on_progress)(stage);
    }

    fn log(&self, message: impl Into<String>) {
        self.progress(UpdateStage::Log {
            message: message.into(),
        });
    }

    /// Read the device's feature report: firmware version and burst
    /// acknowledgment class. Must run before `run`, and its failure is
    /// fatal to the update.
    pub fn setup(&mut self) -> CfuResult<()> {
        let mut buf = [0u8; FEATURE_BUFFER_SIZE];
        let n = self.transport.read_feature_report(
            report_value(FEATURE_REPORT_TYPE, FIRMWARE_REPORT_ID),
            &mut buf,
            TRANSFER_TIMEOUT_MS,
        )?;
        let feature = FeatureReport::parse(&buf[..n])?;
        self.session.burst_ack_size = feature.burst_ack_size();
        self.progress(UpdateStage::DeviceInfo {
            firmware_version: feature.version().to_string(),
            burst_ack_size: feature.burst_ack_size(),
        });
        Ok(())
    }

    /// Drive the state machine to completion.
    ///
    /// Returns `Ok(true)` when the payload was delivered and the staged
    /// update confirmed, `Ok(false)` when the flow stopped without
    /// completing (offer never accepted, device busy, content error).
    /// Transport and decode failures abort with an error tagged by the
    /// state they occurred in.
    pub fn run(&mut self, context: &UpdateContext) -> CfuResult<bool> {
        self.session.begin(context.payload.len());
        let mut cursor = PayloadCursor::new(&context.payload);

        while !self.session.exit {
            let state = self.session.state;
            self.step(context, &mut cursor)
                .map_err(|e| CfuError::at_state(state.name(), e))?;
        }

        self.progress(UpdateStage::Complete {
            success: self.session.firmware_status,
        });
        Ok(self.session.firmware_status)
    }

    fn step(&mut self, context: &UpdateContext, cursor: &mut PayloadCursor<'_>) -> CfuResult<()> {
        self.log(format!("state: {}", self.session.state));
        match self.session.state {
            CfuState::StartEntireTransaction => self.start_entire_transaction(),
            CfuState::StartEntireTransactionAccepted => self.start_entire_transaction_accepted(),
            CfuState::StartOfferList => self.start_offer_list(),
            CfuState::StartOfferListAccepted => self.start_offer_list_accepted(),
            CfuState::UpdateOffer => self.update_offer(context),
            CfuState::UpdateOfferAccepted => self.update_offer_accepted(cursor),
            CfuState::UpdateContent => self.update_content(cursor),
            CfuState::CheckUpdateContent => self.check_update_content(),
            CfuState::UpdateSuccess => self.update_success(),
            CfuState::UpdateOfferRejected => self.update_offer_rejected(),
            CfuState::UpdateMoreOffers => self.update_more_offers(),
            CfuState::EndOfferList => self.end_offer_list(),
            CfuState::EndOfferListAccepted => self.end_offer_list_accepted(),
            CfuState::SendOfferListAgain => self.send_offer_list_again(),
            CfuState::OfferListAccepted => self.offer_list_accepted(),
            CfuState::SendOfferAgain => self.send_offer_again(context),
            CfuState::OfferAccepted => self.offer_accepted(),
            CfuState::SendUpdateEndOfferList => self.send_update_end_offer_list(),
            CfuState::UpdateEndOfferListAccepted => self.update_end_offer_list_accepted(),
            CfuState::UpdateStop => self.update_stop(),
            CfuState::Error => self.error(),
            CfuState::NotifyOnReady => self.notify_on_ready(),
            CfuState::WaitForReadyNotification => self.wait_for_ready_notification(),
            CfuState::UpdateVerifyError => self.update_verify_error(),
        }
    }

    // ========================================================================
    // Transport helpers
    // ========================================================================

    fn send_offer_control(&mut self, control: OfferControl) -> CfuResult<()> {
        self.transport.send_report(
            report_value(OUT_REPORT_TYPE, OFFER_REPORT_ID),
            control.as_bytes(),
            TRANSFER_TIMEOUT_MS,
        )
    }

    fn send_offer(&mut self, context: &UpdateContext) -> CfuResult<()> {
        let command = build_offer_command(&context.offer)?;
        // The offer goes out under the firmware report id's wValue even
        // though the buffer leads with the offer report id.
        self.transport.send_report(
            report_value(OUT_REPORT_TYPE, FIRMWARE_REPORT_ID),
            &command,
            TRANSFER_TIMEOUT_MS,
        )
    }

    fn read_ack_buf(&mut self) -> CfuResult<([u8; ACK_BUFFER_SIZE], usize)> {
        let mut buf = [0u8; ACK_BUFFER_SIZE];
        let n = self
            .transport
            .read_report(INTERRUPT_IN_ENDPOINT, &mut buf, TRANSFER_TIMEOUT_MS)?;
        Ok((buf, n))
    }

    /// Read an offer-dialect acknowledgment: status at byte 13, reject
    /// reason at byte 9.
    fn read_offer_ack(&mut self) -> CfuResult<(u8, u8)> {
        let (buf, n) = self.read_ack_buf()?;
        let report = AckReport::new(&buf[..n])?;
        Ok((report.offer_status_byte()?, report.reject_reason_byte()?))
    }

    fn reason_text(reason: u8) -> &'static str {
        RejectReason::from_byte(reason)
            .map(|r| r.description())
            .unwrap_or("unknown reason")
    }

    // ========================================================================
    // Offer/content cycle handlers
    // ========================================================================

    fn start_entire_transaction(&mut self) -> CfuResult<()> {
        self.send_offer_control(OfferControl::StartEntireTransaction)?;
        self.session.state = CfuState::StartEntireTransactionAccepted;
        Ok(())
    }

    fn start_entire_transaction_accepted(&mut self) -> CfuResult<()> {
        let (status, _) = self.read_offer_ack()?;
        self.log(format!("entire transaction reply status: {:#04x}", status));
        self.progress(UpdateStage::TransactionStarted);
        self.session.state = CfuState::StartOfferList;
        Ok(())
    }

    fn start_offer_list(&mut self) -> CfuResult<()> {
        self.send_offer_control(OfferControl::StartOfferList)?;
        self.session.state = CfuState::StartOfferListAccepted;
        Ok(())
    }

    fn start_offer_list_accepted(&mut self) -> CfuResult<()> {
        let (status, reason) = self.read_offer_ack()?;
        if OfferStatus::from_byte(status) == Some(OfferStatus::Accept) {
            self.log("offer list accepted");
        } else {
            self.log(format!(
                "offer list not accepted, status {:#04x}: {}",
                status,
                Self::reason_text(reason)
            ));
        }
        self.session.state = CfuState::UpdateOffer;
        Ok(())
    }

    fn update_offer(&mut self, context: &UpdateContext) -> CfuResult<()> {
        let record = OfferRecord::parse(&context.offer)?;
        self.log(format!(
            "offering component {} version {}",
            record.component_id,
            record.offered_version()
        ));
        self.send_offer(context)?;
        self.session.state = CfuState::UpdateOfferAccepted;
        Ok(())
    }

    fn update_offer_accepted(&mut self, cursor: &mut PayloadCursor<'_>) -> CfuResult<()> {
        let (status, reason) = self.read_offer_ack()?;
        match OfferStatus::from_byte(status) {
            Some(OfferStatus::Accept) => {
                self.log("offer accepted");
                // Acceptance restarts the content stream from the top:
                // counters and framing both, so a re-offer after a
                // mid-content interruption retransmits the whole image.
                self.session.accept_offer();
                cursor.reset();
                self.progress(UpdateStage::OfferAccepted);
                self.session.state = CfuState::UpdateContent;
            }
            Some(OfferStatus::Skip) => {
                self.log(format!("offer skipped: {}", Self::reason_text(reason)));
                self.session.state = CfuState::UpdateMoreOffers;
            }
            Some(OfferStatus::Reject) => {
                self.log(format!("offer rejected: {}", Self::reason_text(reason)));
                self.session.state = CfuState::UpdateMoreOffers;
            }
            Some(OfferStatus::Busy) => {
                self.session.retry_attempts += 1;
                if self.session.retry_attempts > MAX_BUSY_RETRIES {
                    self.log(format!(
                        "device still busy after {} retry attempts, restart the device",
                        MAX_BUSY_RETRIES
                    ));
                    self.session.state = CfuState::NotifyOnReady;
                } else {
                    self.log(format!(
                        "device busy, retry attempt {}",
                        self.session.retry_attempts
                    ));
                    self.session.state = CfuState::StartEntireTransaction;
                }
            }
            _ => {
                self.log(format!("offer reply status {:#04x}", status));
                self.session.state = CfuState::UpdateMoreOffers;
            }
        }
        Ok(())
    }

    fn update_content(&mut self, cursor: &mut PayloadCursor<'_>) -> CfuResult<()> {
        match cursor.next_unit()? {
            Some(unit) => {
                let sequence = self.session.bump_sequence();
                let first = sequence == 1;
                if first {
                    self.log("first packet, setting FIRST_BLOCK flag");
                }
                if unit.last {
                    self.log("last packet, setting LAST_BLOCK flag");
                }
                let command = build_content_command(
                    sequence,
                    self.session.current_address,
                    &unit.data,
                    first,
                    unit.last,
                );
                self.transport.send_report(
                    report_value(OUT_REPORT_TYPE, FIRMWARE_REPORT_ID),
                    &command,
                    TRANSFER_TIMEOUT_MS,
                )?;
                self.session.record_unit_sent(unit.data.len(), unit.last);
                self.progress(UpdateStage::Uploading {
                    sent: self.session.bytes_sent,
                    total: self.session.payload_file_size,
                });
                self.session.state = CfuState::CheckUpdateContent;
            }
            None => {
                // The framer marks exactly one unit as last, so a drained
                // cursor here means the device asked for content past the
                // end of the image.
                self.log("payload exhausted before the final acknowledgment");
                self.session.state = CfuState::Error;
            }
        }
        Ok(())
    }

    fn check_update_content(&mut self) -> CfuResult<()> {
        if !should_read_ack(&self.session) {
            self.session.state = CfuState::UpdateContent;
            return Ok(());
        }

        let (buf, n) = self.read_ack_buf()?;
        let ack = ContentAck::interpret(&buf[..n], self.session.last_packet_sent)?;

        self.session.state = if self.session.last_packet_sent {
            CfuState::UpdateSuccess
        } else {
            CfuState::UpdateContent
        };

        if ack.report_id == OFFER_REPORT_ID {
            match ack.offer_status() {
                Some(OfferStatus::Accept) => {
                    self.session.state = if ack.last_packet {
                        CfuState::UpdateSuccess
                    } else {
                        CfuState::UpdateContent
                    };
                }
                Some(OfferStatus::Skip) | Some(OfferStatus::Reject) => {
                    self.log(format!(
                        "offer response during content, status {:#04x}",
                        ack.status
                    ));
                    self.session.state = CfuState::UpdateMoreOffers;
                }
                Some(OfferStatus::Busy) => {
                    self.log("device busy during content transfer");
                    self.session.state = CfuState::NotifyOnReady;
                }
                Some(OfferStatus::CommandReady) | Some(OfferStatus::NotSupported) => {
                    self.session.state = CfuState::UpdateMoreOffers;
                }
                None => {
                    self.log(format!("unknown offer response {:#04x}", ack.status));
                    self.session.state = CfuState::Error;
                }
            }
        } else if ack.report_id == CONTENT_RESPONSE_REPORT_ID {
            match ack.content_status() {
                Some(ContentStatus::Success) => {}
                Some(status) => {
                    self.log(format!("content failure: {}", status.description()));
                    self.session.state = CfuState::Error;
                }
                None => {
                    self.log(format!("content status none: {:#04x}", ack.status));
                }
            }
        }
        Ok(())
    }

    fn update_success(&mut self) -> CfuResult<()> {
        if self.session.last_packet_sent {
            self.session.firmware_status = true;
            self.progress(UpdateStage::PayloadComplete);
            self.session.state = CfuState::EndOfferList;
        } else {
            self.session.state = CfuState::UpdateMoreOffers;
        }
        Ok(())
    }

    fn update_offer_rejected(&mut self) -> CfuResult<()> {
        self.session.state = if self.session.last_packet_sent {
            CfuState::EndOfferList
        } else {
            CfuState::UpdateOffer
        };
        Ok(())
    }

    fn update_more_offers(&mut self) -> CfuResult<()> {
        self.session.state = if self.session.last_packet_sent {
            CfuState::EndOfferList
        } else {
            CfuState::UpdateOffer
        };
        Ok(())
    }

    fn end_offer_list(&mut self) -> CfuResult<()> {
        self.send_offer_control(OfferControl::EndOfferList)?;
        self.session.state = CfuState::EndOfferListAccepted;
        Ok(())
    }

    fn end_offer_list_accepted(&mut self) -> CfuResult<()> {
        let (status, reason) = self.read_offer_ack()?;
        match OfferStatus::from_byte(status) {
            Some(OfferStatus::Accept) => self.log("end offer list accepted"),
            Some(OfferStatus::Reject) => self.log(format!(
                "end offer list rejected: {}",
                Self::reason_text(reason)
            )),
            _ => self.log(format!(
                "end offer list reply status {:#04x}: {}",
                status,
                Self::reason_text(reason)
            )),
        }
        self.progress(UpdateStage::VerifyingSwap);
        self.session.state = CfuState::SendOfferListAgain;
        Ok(())
    }

    // ========================================================================
    // Swap-pending verification handlers
    // ========================================================================

    fn send_offer_list_again(&mut self) -> CfuResult<()> {
        self.send_offer_control(OfferControl::StartOfferList)?;
        self.session.state = CfuState::OfferListAccepted;
        Ok(())
    }

    fn offer_list_accepted(&mut self) -> CfuResult<()> {
        let (status, _) = self.read_offer_ack()?;
        self.log(format!("offer list reply status: {:#04x}", status));
        self.session.state = CfuState::SendOfferAgain;
        Ok(())
    }

    fn send_offer_again(&mut self, context: &UpdateContext) -> CfuResult<()> {
        self.send_offer(context)?;
        self.session.state = CfuState::OfferAccepted;
        Ok(())
    }

    /// The re-offer against a freshly staged image should come back
    /// rejected with SWAP_PENDING. Every reply routes to the end of the
    /// offer list regardless; the reason only changes what gets logged.
    fn offer_accepted(&mut self) -> CfuResult<()> {
        let (status, reason) = self.read_offer_ack()?;
        if OfferStatus::from_byte(status) == Some(OfferStatus::Accept) {
            self.log("offer accepted while a staged update was expected");
        } else {
            match RejectReason::from_byte(reason) {
                Some(RejectReason::SwapPending) => {
                    self.log("swap pending: firmware update staged, reboot to apply");
                }
                Some(r) => {
                    self.log(format!(
                        "reject reason {}: expected swap pending",
                        r.description()
                    ));
                }
                None => {
                    self.log(format!(
                        "unknown reject reason {:#04x}: expected swap pending",
                        reason
                    ));
                }
            }
        }
        self.session.state = CfuState::SendUpdateEndOfferList;
        Ok(())
    }

    fn send_update_end_offer_list(&mut self) -> CfuResult<()> {
        self.send_offer_control(OfferControl::EndOfferList)?;
        self.session.state = CfuState::UpdateEndOfferListAccepted;
        Ok(())
    }

    fn update_end_offer_list_accepted(&mut self) -> CfuResult<()> {
        let (status, _) = self.read_offer_ack()?;
        self.log(format!("end offer list reply status: {:#04x}", status));
        self.session.state = CfuState::UpdateStop;
        Ok(())
    }

    // ========================================================================
    // Terminal handlers
    // ========================================================================

    fn update_stop(&mut self) -> CfuResult<()> {
        self.session.exit = true;
        Ok(())
    }

    fn error(&mut self) -> CfuResult<()> {
        self.session.state = CfuState::UpdateStop;
        Ok(())
    }

    fn notify_on_ready(&mut self) -> CfuResult<()> {
        self.log("update suspended, device will notify when ready");
        self.session.state = CfuState::WaitForReadyNotification;
        Ok(())
    }

    fn wait_for_ready_notification(&mut self) -> CfuResult<()> {
        // No blocking wait: the device re-announces readiness out of
        // band and the whole flow restarts from the top.
        self.session.state = CfuState::UpdateStop;
        Ok(())
    }

    fn update_verify_error(&mut self) -> CfuResult<()> {
        self.session.state = CfuState::UpdateStop;
        Ok(())
    }
}

/// Update a device from a firmware package on disk.
///
/// This is the high-level function that orchestrates the complete
/// update: read the package, read the device's feature report, then
/// drive the offer/content/verify state machine.
///
/// # Arguments
/// * `transport` - An open CFU transport
/// * `package_path` - Path to the firmware package ZIP
/// * `on_progress` - Callback for progress updates
///
/// # Returns
/// `true` when the device confirmed the staged update.
pub fn update_firmware<T, P, F>(transport: T, package_path: P, on_progress: F) -> CfuResult<bool>
where
    T: CfuTransport,
    P: AsRef<Path>,
    F: Fn(UpdateStage),
{
    on_progress(UpdateStage::ReadingPackage);
    let package = read_firmware_package(package_path)?;
    let record = package.offer_record()?;
    on_progress(UpdateStage::Log {
        message: format!(
            "package offers component {} version {}",
            record.component_id,
            record.offered_version()
        ),
    });

    let context = UpdateContext::from(package);
    let mut protocol = CfuProtocol::new(transport, on_progress);
    protocol.setup()?;
    protocol.run(&context)
}
