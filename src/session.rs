//! Protocol states and the per-update session record.

use std::fmt;

use crate::config::SUB_RECORD_HEADER_SIZE;

/// States of the CFU update handshake.
///
/// The offer/content cycle runs first; after END_OFFER_LIST the engine
/// re-offers once to verify the device reports the staged update
/// (swap-pending verification), then stops. Terminal flow always passes
/// through `UpdateStop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfuState {
    // Offer/content cycle.
    StartEntireTransaction,
    StartEntireTransactionAccepted,
    StartOfferList,
    StartOfferListAccepted,
    UpdateOffer,
    UpdateOfferAccepted,
    /// Send one transmission unit of the payload.
    UpdateContent,
    /// Read or skip the acknowledgment for the unit just sent.
    CheckUpdateContent,
    UpdateSuccess,
    UpdateOfferRejected,
    UpdateMoreOffers,
    EndOfferList,
    EndOfferListAccepted,

    // Swap-pending verification: re-offer and expect a swap-pending reject.
    SendOfferListAgain,
    OfferListAccepted,
    SendOfferAgain,
    OfferAccepted,
    SendUpdateEndOfferList,
    UpdateEndOfferListAccepted,

    // Terminal paths.
    UpdateStop,
    Error,
    /// Device reported BUSY past the retry bound; it will announce readiness.
    NotifyOnReady,
    WaitForReadyNotification,
    UpdateVerifyError,
}

impl CfuState {
    /// Protocol-level state name, used to tag errors and log lines.
    pub fn name(&self) -> &'static str {
        match self {
            CfuState::StartEntireTransaction => "START_ENTIRE_TRANSACTION",
            CfuState::StartEntireTransactionAccepted => "START_ENTIRE_TRANSACTION_ACCEPTED",
            CfuState::StartOfferList => "START_OFFER_LIST",
            CfuState::StartOfferListAccepted => "START_OFFER_LIST_ACCEPTED",
            CfuState::UpdateOffer => "UPDATE_OFFER",
            CfuState::UpdateOfferAccepted => "UPDATE_OFFER_ACCEPTED",
            CfuState::UpdateContent => "UPDATE_CONTENT",
            CfuState::CheckUpdateContent => "CHECK_UPDATE_CONTENT",
            CfuState::UpdateSuccess => "UPDATE_SUCCESS",
            CfuState::UpdateOfferRejected => "UPDATE_OFFER_REJECTED",
            CfuState::UpdateMoreOffers => "UPDATE_MORE_OFFERS",
            CfuState::EndOfferList => "END_OFFER_LIST",
            CfuState::EndOfferListAccepted => "END_OFFER_LIST_ACCEPTED",
            CfuState::SendOfferListAgain => "SEND_OFFER_LIST_AGAIN",
            CfuState::OfferListAccepted => "OFFER_LIST_ACCEPTED",
            CfuState::SendOfferAgain => "SEND_OFFER_AGAIN",
            CfuState::OfferAccepted => "OFFER_ACCEPTED",
            CfuState::SendUpdateEndOfferList => "SEND_UPDATE_END_OFFER_LIST",
            CfuState::UpdateEndOfferListAccepted => "UPDATE_END_OFFER_LIST_ACCEPTED",
            CfuState::UpdateStop => "UPDATE_STOP",
            CfuState::Error => "ERROR",
            CfuState::NotifyOnReady => "NOTIFY_ON_READY",
            CfuState::WaitForReadyNotification => "WAIT_FOR_READY_NOTIFICATION",
            CfuState::UpdateVerifyError => "UPDATE_VERIFY_ERROR",
        }
    }
}

impl fmt::Display for CfuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Mutable state of one update attempt, owned by the engine loop.
#[derive(Debug)]
pub struct Session {
    pub state: CfuState,
    /// Advances once per content command; the first command carries 1.
    pub sequence_number: u16,
    /// Running device write offset, the sum of all transmitted unit lengths.
    pub current_address: u32,
    pub bytes_sent: usize,
    pub bytes_remaining: usize,
    pub payload_file_size: usize,
    /// Sticky: set when the final transmission unit goes out.
    pub last_packet_sent: bool,
    pub retry_attempts: u8,
    /// Device-reported burst-acknowledgment class, read during setup.
    pub burst_ack_size: u8,
    pub firmware_status: bool,
    pub exit: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: CfuState::StartEntireTransaction,
            sequence_number: 0,
            current_address: 0,
            bytes_sent: 0,
            bytes_remaining: 0,
            payload_file_size: 0,
            last_packet_sent: false,
            retry_attempts: 0,
            burst_ack_size: 0,
            firmware_status: false,
            exit: false,
        }
    }

    /// Reset per-run fields for a fresh update attempt. The burst class
    /// survives; it belongs to the device, not the attempt.
    pub fn begin(&mut self, payload_file_size: usize) {
        self.state = CfuState::StartEntireTransaction;
        self.sequence_number = 0;
        self.current_address = 0;
        self.bytes_sent = 0;
        self.bytes_remaining = payload_file_size;
        self.payload_file_size = payload_file_size;
        self.last_packet_sent = false;
        self.retry_attempts = 0;
        self.firmware_status = false;
        self.exit = false;
    }

    /// Reset content-phase accounting after the device accepts an offer.
    pub fn accept_offer(&mut self) {
        self.sequence_number = 0;
        self.current_address = 0;
        self.last_packet_sent = false;
    }

    /// Advance and return the sequence number for the next content command.
    pub fn bump_sequence(&mut self) -> u16 {
        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.sequence_number
    }

    /// Account one transmitted unit and latch the sticky last-packet flag.
    pub fn record_unit_sent(&mut self, len: usize, last: bool) {
        self.current_address += len as u32;
        self.bytes_sent += len;
        self.bytes_remaining = self
            .payload_file_size
            .saturating_sub(self.bytes_sent + SUB_RECORD_HEADER_SIZE);
        if last {
            self.last_packet_sent = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_resets_attempt_but_keeps_burst_class() {
        let mut session = Session::new();
        session.burst_ack_size = 2;
        session.sequence_number = 9;
        session.firmware_status = true;
        session.exit = true;
        session.state = CfuState::UpdateStop;

        session.begin(1000);

        assert_eq!(session.state, CfuState::StartEntireTransaction);
        assert_eq!(session.sequence_number, 0);
        assert_eq!(session.payload_file_size, 1000);
        assert_eq!(session.bytes_remaining, 1000);
        assert!(!session.firmware_status);
        assert!(!session.exit);
        assert_eq!(session.burst_ack_size, 2);
    }

    #[test]
    fn test_accept_offer_resets_content_phase_only() {
        let mut session = Session::new();
        session.begin(500);
        session.sequence_number = 7;
        session.current_address = 364;
        session.last_packet_sent = true;
        session.retry_attempts = 2;

        session.accept_offer();

        assert_eq!(session.sequence_number, 0);
        assert_eq!(session.current_address, 0);
        assert!(!session.last_packet_sent);
        // Retry accounting spans re-offers.
        assert_eq!(session.retry_attempts, 2);
    }

    #[test]
    fn test_bump_sequence_starts_at_one() {
        let mut session = Session::new();
        assert_eq!(session.bump_sequence(), 1);
        assert_eq!(session.bump_sequence(), 2);
        assert_eq!(session.bump_sequence(), 3);
    }

    #[test]
    fn test_record_unit_sent_accounting() {
        let mut session = Session::new();
        session.begin(100);

        session.record_unit_sent(52, false);
        assert_eq!(session.current_address, 52);
        assert_eq!(session.bytes_sent, 52);
        assert_eq!(session.bytes_remaining, 100 - 52 - 5);
        assert!(!session.last_packet_sent);

        session.record_unit_sent(33, true);
        // Address equals the sum of all transmitted unit lengths.
        assert_eq!(session.current_address, 85);
        assert!(session.last_packet_sent);

        // The flag is sticky.
        session.record_unit_sent(0, false);
        assert!(session.last_packet_sent);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(CfuState::UpdateContent.name(), "UPDATE_CONTENT");
        assert_eq!(CfuState::SendOfferListAgain.name(), "SEND_OFFER_LIST_AGAIN");
        assert_eq!(format!("{}", CfuState::NotifyOnReady), "NOTIFY_ON_READY");
    }
}
