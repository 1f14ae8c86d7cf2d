//! Wire-protocol constants and status-code tables for the CFU USB-HID variant.

// Not every code below is referenced by the engine; the tables cover the full
// wire contract, including codes only ever received from the device.
#![allow(dead_code)]

// ============================================================================
// HID Control Requests
// ============================================================================

/// HID GET_REPORT request code (control transfer, device to host).
pub const GET_REPORT: u8 = 0x01;

/// HID SET_REPORT request code (control transfer, host to device).
pub const SET_REPORT: u8 = 0x09;

/// Report-type selector for input reports (high byte of the wValue word).
pub const IN_REPORT_TYPE: u16 = 0x0100;

/// Report-type selector for output reports.
pub const OUT_REPORT_TYPE: u16 = 0x0200;

/// Report-type selector for feature reports.
pub const FEATURE_REPORT_TYPE: u16 = 0x0300;

/// Compose the wValue word for a class-specific control request.
pub fn report_value(report_type: u16, report_id: u8) -> u16 {
    report_type | report_id as u16
}

// ============================================================================
// Report Ids and Endpoints
// ============================================================================

/// Report id leading content commands and content-dialect acknowledgments.
pub const FIRMWARE_REPORT_ID: u8 = 0x20;

/// Report id leading offer commands and offer-dialect acknowledgments.
pub const OFFER_REPORT_ID: u8 = 0x25;

/// Report id the device answers content commands with.
pub const CONTENT_RESPONSE_REPORT_ID: u8 = 0x22;

/// Interrupt IN endpoint the device delivers acknowledgments on.
pub const INTERRUPT_IN_ENDPOINT: u8 = 0x81;

/// Transfer timeout handed to every transport call. Zero selects the
/// transport's own default (unbounded for libusb).
pub const TRANSFER_TIMEOUT_MS: u64 = 0;

// ============================================================================
// Buffer Sizes
// ============================================================================

/// Largest data slice one content command carries.
pub const MAX_UNIT_SIZE: usize = 52;

/// Content command report size: id, flags, length, sequence, address, data.
pub const CONTENT_COMMAND_SIZE: usize = 61;

/// Offer and offer-control command report size.
pub const OFFER_COMMAND_SIZE: usize = 17;

/// Sub-record header size inside a payload image (address + declared length).
pub const SUB_RECORD_HEADER_SIZE: usize = 5;

/// Offer record size at the head of an offer image.
pub const OFFER_RECORD_SIZE: usize = 16;

/// Receive buffer size for interrupt acknowledgment reads.
pub const ACK_BUFFER_SIZE: usize = 128;

/// Receive buffer size for the setup feature report.
pub const FEATURE_BUFFER_SIZE: usize = 60;

/// Working-chunk size when iterating a payload image.
pub const DEFAULT_CHUNK_SIZE: usize = 0x4000;

// ============================================================================
// Content Command Flags
// ============================================================================

/// Flags-byte value marking the first block of a payload.
pub const CONTENT_FLAG_FIRST_BLOCK: u8 = 0x80;

/// Flags-byte value marking the last block of a payload.
pub const CONTENT_FLAG_LAST_BLOCK: u8 = 0x40;

/// Offer-command flags byte: update now (bit 7) plus force version (bit 8).
pub const OFFER_FLAG_UPDATE_NOW_FORCE_VERSION: u8 = 0xC0;

// ============================================================================
// Offer-Control Sequences
// ============================================================================

/// Fixed report opening the entire update transaction.
pub const START_ENTIRE_TRANSACTION: [u8; OFFER_COMMAND_SIZE] = [
    0x25, 0x00, 0x00, 0xff, 0xa0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00,
];

/// Fixed report opening an offer list.
pub const START_OFFER_LIST: [u8; OFFER_COMMAND_SIZE] = [
    0x25, 0x01, 0x00, 0xff, 0xa0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00,
];

/// Fixed report closing an offer list.
pub const END_OFFER_LIST: [u8; OFFER_COMMAND_SIZE] = [
    0x25, 0x02, 0x00, 0xff, 0xa0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00,
];

// ============================================================================
// Retry and Burst-Acknowledgment Configuration
// ============================================================================

/// BUSY offer replies retried before the engine suspends and waits for the
/// device to announce readiness.
pub const MAX_BUSY_RETRIES: u8 = 3;

/// Content packets sent per acknowledgment for a device-reported burst class.
///
/// Returns `None` for class 0 and unrecognized classes, meaning every content
/// packet is acknowledged individually.
pub fn burst_ack_interval(burst_ack_size: u8) -> Option<u16> {
    match burst_ack_size {
        1 => Some(16),
        2 => Some(32),
        3 => Some(64),
        _ => None,
    }
}

// ============================================================================
// Device Status Codes
// ============================================================================

/// Device reply to an offer command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OfferStatus {
    Skip = 0x00,
    Accept = 0x01,
    Reject = 0x02,
    Busy = 0x03,
    CommandReady = 0x04,
    NotSupported = 0xFF,
}

impl OfferStatus {
    /// Parse an offer status from a reply byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(OfferStatus::Skip),
            0x01 => Some(OfferStatus::Accept),
            0x02 => Some(OfferStatus::Reject),
            0x03 => Some(OfferStatus::Busy),
            0x04 => Some(OfferStatus::CommandReady),
            0xFF => Some(OfferStatus::NotSupported),
            _ => None,
        }
    }

    /// Get a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            OfferStatus::Skip => "Offer skipped by the device",
            OfferStatus::Accept => "Offer accepted",
            OfferStatus::Reject => "Offer rejected",
            OfferStatus::Busy => "Device busy",
            OfferStatus::CommandReady => "Device ready to accept commands",
            OfferStatus::NotSupported => "Offer command not supported",
        }
    }
}

/// Device reply to a content command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentStatus {
    Success = 0x00,
    ErrorPrepare = 0x01,
    ErrorWrite = 0x02,
    ErrorComplete = 0x03,
    ErrorVerify = 0x04,
    ErrorCrc = 0x05,
    ErrorSignature = 0x06,
    ErrorVersion = 0x07,
    SwapPending = 0x08,
    ErrorInvalidAddr = 0x09,
    ErrorNoOffer = 0x0A,
    ErrorInvalid = 0x0B,
}

impl ContentStatus {
    /// Parse a content status from a reply byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(ContentStatus::Success),
            0x01 => Some(ContentStatus::ErrorPrepare),
            0x02 => Some(ContentStatus::ErrorWrite),
            0x03 => Some(ContentStatus::ErrorComplete),
            0x04 => Some(ContentStatus::ErrorVerify),
            0x05 => Some(ContentStatus::ErrorCrc),
            0x06 => Some(ContentStatus::ErrorSignature),
            0x07 => Some(ContentStatus::ErrorVersion),
            0x08 => Some(ContentStatus::SwapPending),
            0x09 => Some(ContentStatus::ErrorInvalidAddr),
            0x0A => Some(ContentStatus::ErrorNoOffer),
            0x0B => Some(ContentStatus::ErrorInvalid),
            _ => None,
        }
    }

    /// True for every defined status except `Success`. During payload
    /// transfer a `SwapPending` reply also counts as an error; the device
    /// must not stage a swap while content is still being written.
    pub fn is_error(&self) -> bool {
        !matches!(self, ContentStatus::Success)
    }

    /// Get a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            ContentStatus::Success => "Content accepted",
            ContentStatus::ErrorPrepare => "Device failed to prepare for the update",
            ContentStatus::ErrorWrite => "Write failure",
            ContentStatus::ErrorComplete => "Completion failure",
            ContentStatus::ErrorVerify => "Payload verification failed",
            ContentStatus::ErrorCrc => "CRC check failed",
            ContentStatus::ErrorSignature => "Signature check failed",
            ContentStatus::ErrorVersion => "Version check failed",
            ContentStatus::SwapPending => "Update staged, awaiting swap on restart",
            ContentStatus::ErrorInvalidAddr => "Invalid destination address",
            ContentStatus::ErrorNoOffer => "No offer in progress",
            ContentStatus::ErrorInvalid => "Invalid content command",
        }
    }
}

/// Reason byte accompanying an offer rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectReason {
    OldFirmware = 0x00,
    InvalidComponent = 0x01,
    SwapPending = 0x02,
    Mismatch = 0x03,
    Bank = 0x04,
    Platform = 0x05,
    Milestone = 0x06,
    InvalidProtocolRevision = 0x07,
    Variant = 0x08,
}

impl RejectReason {
    /// Parse a reject reason from a reply byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(RejectReason::OldFirmware),
            0x01 => Some(RejectReason::InvalidComponent),
            0x02 => Some(RejectReason::SwapPending),
            0x03 => Some(RejectReason::Mismatch),
            0x04 => Some(RejectReason::Bank),
            0x05 => Some(RejectReason::Platform),
            0x06 => Some(RejectReason::Milestone),
            0x07 => Some(RejectReason::InvalidProtocolRevision),
            0x08 => Some(RejectReason::Variant),
            _ => None,
        }
    }

    /// Get a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            RejectReason::OldFirmware => "Offered firmware is older than the installed version",
            RejectReason::InvalidComponent => "Component id not recognized",
            RejectReason::SwapPending => "Update staged, pending swap",
            RejectReason::Mismatch => "Offer does not match the device",
            RejectReason::Bank => "Wrong firmware bank",
            RejectReason::Platform => "Platform id mismatch",
            RejectReason::Milestone => "Milestone check failed",
            RejectReason::InvalidProtocolRevision => "Protocol revision not supported",
            RejectReason::Variant => "Hardware variant mismatch",
        }
    }
}
