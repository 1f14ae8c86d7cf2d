//! Acknowledgment interpretation for content transfers.
//!
//! After a content command the device answers on the interrupt endpoint,
//! but the reply comes in two dialects. Reports led by the firmware
//! report id carry their status at byte 13 and a reject reason at byte 9;
//! every other report carries its status at byte 5. Which dialect a
//! device speaks varies by firmware revision, so both are handled here
//! and the caller dispatches on the report id it actually received.
//!
//! Devices with a burst acknowledgment class only answer every Nth
//! packet; [`should_read_ack`] decides whether a read is due at all.

use crate::config::{
    burst_ack_interval, ContentStatus, OfferStatus, RejectReason, FIRMWARE_REPORT_ID,
};
use crate::error::CfuResult;
use crate::report::AckReport;
use crate::session::Session;

// ============================================================================
// Content acknowledgment
// ============================================================================

/// A decoded acknowledgment for a content command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentAck {
    /// Report id the device answered with.
    pub report_id: u8,
    /// Raw status byte, taken from the offset the report id dictates.
    pub status: u8,
    /// Raw reject reason byte. Only firmware-dialect reports carry one;
    /// zero otherwise.
    pub reason: u8,
    /// True when the status signalled success and the final payload unit
    /// had already been sent.
    pub last_packet: bool,
}

impl ContentAck {
    /// Decodes an acknowledgment buffer read from the interrupt endpoint.
    ///
    /// `last_packet_sent` is the session flag for the final transmission
    /// unit; the decoded `last_packet` is only raised when the device
    /// also reported success, so a failed final packet still routes
    /// through error handling.
    pub fn interpret(buf: &[u8], last_packet_sent: bool) -> CfuResult<ContentAck> {
        let report = AckReport::new(buf)?;
        let report_id = report.report_id();
        if report_id == FIRMWARE_REPORT_ID {
            let status = report.offer_status_byte()?;
            let reason = report.reject_reason_byte()?;
            Ok(ContentAck {
                report_id,
                status,
                reason,
                last_packet: status == OfferStatus::Accept as u8 && last_packet_sent,
            })
        } else {
            let status = report.content_status_byte()?;
            Ok(ContentAck {
                report_id,
                status,
                reason: 0,
                last_packet: status == ContentStatus::Success as u8 && last_packet_sent,
            })
        }
    }

    /// Status byte as an offer status, if it maps to one.
    pub fn offer_status(&self) -> Option<OfferStatus> {
        OfferStatus::from_byte(self.status)
    }

    /// Status byte as a content status, if it maps to one.
    pub fn content_status(&self) -> Option<ContentStatus> {
        ContentStatus::from_byte(self.status)
    }

    /// Reject reason, if the report carried a known one.
    pub fn reject_reason(&self) -> Option<RejectReason> {
        RejectReason::from_byte(self.reason)
    }
}

// ============================================================================
// Burst acknowledgment gating
// ============================================================================

/// Decides whether the unit just sent needs its acknowledgment read.
///
/// The final unit is always acknowledged. Before that, devices with a
/// known burst class only answer every Nth sequence number; reading in
/// between would block on a reply that never comes. Unknown classes
/// acknowledge every packet.
pub fn should_read_ack(session: &Session) -> bool {
    if session.last_packet_sent {
        return true;
    }
    match burst_ack_interval(session.burst_ack_size) {
        Some(interval) => session.sequence_number % interval == 0,
        None => true,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ACK_BUFFER_SIZE;
    use crate::error::CfuError;

    fn ack_buf(report_id: u8) -> Vec<u8> {
        let mut buf = vec![0u8; ACK_BUFFER_SIZE];
        buf[0] = report_id;
        buf
    }

    #[test]
    fn test_firmware_dialect_reads_bytes_13_and_9() {
        let mut buf = ack_buf(0x20);
        buf[13] = OfferStatus::Accept as u8;
        buf[9] = RejectReason::SwapPending as u8;
        buf[5] = 0x77; // content offset, must be ignored

        let ack = ContentAck::interpret(&buf, false).unwrap();
        assert_eq!(ack.report_id, 0x20);
        assert_eq!(ack.status, 0x01);
        assert_eq!(ack.reason, 0x02);
        assert_eq!(ack.offer_status(), Some(OfferStatus::Accept));
        assert_eq!(ack.reject_reason(), Some(RejectReason::SwapPending));
        assert!(!ack.last_packet);
    }

    #[test]
    fn test_content_dialect_reads_byte_5() {
        let mut buf = ack_buf(0x22);
        buf[5] = ContentStatus::ErrorWrite as u8;
        buf[13] = 0x01; // offer offset, must be ignored

        let ack = ContentAck::interpret(&buf, true).unwrap();
        assert_eq!(ack.status, ContentStatus::ErrorWrite as u8);
        assert_eq!(ack.reason, 0);
        assert_eq!(ack.content_status(), Some(ContentStatus::ErrorWrite));
        assert!(!ack.last_packet);
    }

    #[test]
    fn test_offer_response_id_still_uses_content_offset() {
        // Only the firmware report id selects the offer offsets. An
        // offer response mid-transfer is decoded at byte 5 like any
        // other non-firmware report.
        let mut buf = ack_buf(0x25);
        buf[5] = OfferStatus::Busy as u8;
        buf[13] = 0x00;

        let ack = ContentAck::interpret(&buf, false).unwrap();
        assert_eq!(ack.status, OfferStatus::Busy as u8);
        assert_eq!(ack.offer_status(), Some(OfferStatus::Busy));
    }

    #[test]
    fn test_last_packet_needs_success_and_session_flag() {
        let mut buf = ack_buf(0x22);
        buf[5] = ContentStatus::Success as u8;
        assert!(ContentAck::interpret(&buf, true).unwrap().last_packet);
        assert!(!ContentAck::interpret(&buf, false).unwrap().last_packet);

        let mut buf = ack_buf(0x20);
        buf[13] = OfferStatus::Accept as u8;
        assert!(ContentAck::interpret(&buf, true).unwrap().last_packet);
        buf[13] = OfferStatus::Busy as u8;
        assert!(!ContentAck::interpret(&buf, true).unwrap().last_packet);
    }

    #[test]
    fn test_short_firmware_report_is_rejected() {
        // Firmware dialect needs byte 13; ten bytes is not enough.
        let mut buf = vec![0u8; 10];
        buf[0] = 0x20;
        let err = ContentAck::interpret(&buf, false).unwrap_err();
        assert!(matches!(err, CfuError::ShortReport { .. }));
    }

    #[test]
    fn test_empty_buffer_is_rejected() {
        assert!(ContentAck::interpret(&[], false).is_err());
    }

    fn session_with(burst_ack_size: u8, sequence_number: u16, last: bool) -> Session {
        let mut session = Session::new();
        session.burst_ack_size = burst_ack_size;
        session.sequence_number = sequence_number;
        session.last_packet_sent = last;
        session
    }

    #[test]
    fn test_unknown_burst_class_acks_every_packet() {
        for seq in 1..5 {
            assert!(should_read_ack(&session_with(0, seq, false)));
        }
    }

    #[test]
    fn test_burst_class_one_acks_every_sixteenth() {
        for seq in 1..16 {
            assert!(!should_read_ack(&session_with(1, seq, false)));
        }
        assert!(should_read_ack(&session_with(1, 16, false)));
        assert!(!should_read_ack(&session_with(1, 17, false)));
        assert!(should_read_ack(&session_with(1, 32, false)));
    }

    #[test]
    fn test_burst_class_two_and_three_intervals() {
        assert!(!should_read_ack(&session_with(2, 16, false)));
        assert!(should_read_ack(&session_with(2, 32, false)));
        assert!(!should_read_ack(&session_with(3, 32, false)));
        assert!(should_read_ack(&session_with(3, 64, false)));
    }

    #[test]
    fn test_last_packet_always_acked() {
        assert!(should_read_ack(&session_with(1, 3, true)));
        assert!(should_read_ack(&session_with(3, 7, true)));
    }
}
