//! Fixed-layout report building and parsing for the CFU USB-HID variant.
//!
//! Every report is a flat buffer with a leading report-id byte. Builders
//! return the exact bytes handed to the transport; parsers are thin views
//! that name each wire offset and validate buffer length before indexing.

use std::fmt;

use crate::config::{
    CONTENT_COMMAND_SIZE, CONTENT_FLAG_FIRST_BLOCK, CONTENT_FLAG_LAST_BLOCK, END_OFFER_LIST,
    FIRMWARE_REPORT_ID, MAX_UNIT_SIZE, OFFER_COMMAND_SIZE, OFFER_FLAG_UPDATE_NOW_FORCE_VERSION,
    OFFER_RECORD_SIZE, OFFER_REPORT_ID, START_ENTIRE_TRANSACTION, START_OFFER_LIST,
};
use crate::error::{CfuError, CfuResult};

// Acknowledgment report offsets. The device answers every command with the
// same 128-byte interrupt report shape; only these four offsets carry data.
const REPORT_ID_OFFSET: usize = 0;
const CONTENT_STATUS_OFFSET: usize = 5;
const REJECT_REASON_OFFSET: usize = 9;
const OFFER_STATUS_OFFSET: usize = 13;

// Setup feature report offsets. The version table starts at byte 4 with one
// 8-byte record per component; the first record's id byte doubles as the
// burst-acknowledgment class.
const VERSION_OFFSET: usize = 5;
const BURST_ACK_OFFSET: usize = 9;
const FEATURE_REPORT_MIN: usize = 10;

// ============================================================================
// Command Builders
// ============================================================================

/// Build a content command carrying one transmission unit.
///
/// Layout (61 bytes): report id, flags, data length, sequence number (u16 LE),
/// destination address (u32 LE), then 52 data bytes zero-padded on the right.
///
/// The flags byte holds a single marker: first-block when `first`, overwritten
/// by last-block when `last`. A single-unit payload therefore reports only
/// last-block.
pub fn build_content_command(
    sequence_number: u16,
    address: u32,
    data: &[u8],
    first: bool,
    last: bool,
) -> Vec<u8> {
    debug_assert!(data.len() <= MAX_UNIT_SIZE);

    let mut flags = 0x00;
    if first {
        flags = CONTENT_FLAG_FIRST_BLOCK;
    }
    if last {
        flags = CONTENT_FLAG_LAST_BLOCK;
    }

    let mut buf = vec![0u8; CONTENT_COMMAND_SIZE];
    buf[0] = FIRMWARE_REPORT_ID;
    buf[1] = flags;
    buf[2] = data.len() as u8;
    buf[3..5].copy_from_slice(&sequence_number.to_le_bytes());
    buf[5..9].copy_from_slice(&address.to_le_bytes());
    buf[9..9 + data.len()].copy_from_slice(data);
    buf
}

/// Build the offer-update command from the head of an offer image.
///
/// Layout (17 bytes): offer report id, then the image's first 16 bytes with
/// the offer flags byte forced to update-now plus force-version. The report
/// is nevertheless addressed with the firmware report id in the control
/// request's wValue word; the device expects that pairing.
pub fn build_offer_command(offer_image: &[u8]) -> CfuResult<Vec<u8>> {
    if offer_image.len() < OFFER_RECORD_SIZE {
        return Err(CfuError::InvalidPackage {
            reason: format!(
                "offer image is {} bytes, need at least {}",
                offer_image.len(),
                OFFER_RECORD_SIZE
            ),
        });
    }

    let mut buf = vec![0u8; OFFER_COMMAND_SIZE];
    buf[0] = OFFER_REPORT_ID;
    buf[1..1 + OFFER_RECORD_SIZE].copy_from_slice(&offer_image[..OFFER_RECORD_SIZE]);
    buf[2] = OFFER_FLAG_UPDATE_NOW_FORCE_VERSION;
    Ok(buf)
}

/// The three fixed offer-control reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferControl {
    StartEntireTransaction,
    StartOfferList,
    EndOfferList,
}

impl OfferControl {
    /// The literal 17-byte report for this control command.
    pub fn as_bytes(&self) -> &'static [u8; OFFER_COMMAND_SIZE] {
        match self {
            OfferControl::StartEntireTransaction => &START_ENTIRE_TRANSACTION,
            OfferControl::StartOfferList => &START_OFFER_LIST,
            OfferControl::EndOfferList => &END_OFFER_LIST,
        }
    }
}

// ============================================================================
// Acknowledgment Report View
// ============================================================================

/// Typed view over a received acknowledgment report.
///
/// Which offsets are meaningful depends on the leading report id; the
/// accessors validate length individually so a short content-dialect report
/// still decodes.
#[derive(Debug, Clone, Copy)]
pub struct AckReport<'a> {
    buf: &'a [u8],
}

impl<'a> AckReport<'a> {
    /// Wrap a received report. At least the report-id byte must be present.
    pub fn new(buf: &'a [u8]) -> CfuResult<Self> {
        if buf.is_empty() {
            return Err(CfuError::ShortReport {
                kind: "acknowledgment",
                len: 0,
                need: 1,
            });
        }
        Ok(Self { buf })
    }

    /// Leading report id.
    pub fn report_id(&self) -> u8 {
        self.buf[REPORT_ID_OFFSET]
    }

    /// Status byte of a content-dialect acknowledgment.
    pub fn content_status_byte(&self) -> CfuResult<u8> {
        self.byte_at(CONTENT_STATUS_OFFSET, "content acknowledgment status")
    }

    /// Reason byte accompanying an offer rejection.
    pub fn reject_reason_byte(&self) -> CfuResult<u8> {
        self.byte_at(REJECT_REASON_OFFSET, "offer reject reason")
    }

    /// Status byte of an offer-dialect acknowledgment.
    pub fn offer_status_byte(&self) -> CfuResult<u8> {
        self.byte_at(OFFER_STATUS_OFFSET, "offer acknowledgment status")
    }

    fn byte_at(&self, offset: usize, kind: &'static str) -> CfuResult<u8> {
        if self.buf.len() <= offset {
            return Err(CfuError::ShortReport {
                kind,
                len: self.buf.len(),
                need: offset + 1,
            });
        }
        Ok(self.buf[offset])
    }
}

// ============================================================================
// Setup Feature Report
// ============================================================================

/// Firmware version quad as reported by the device, most significant octet first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion(pub u32);

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}.{:02x}.{:02x}.{:02x}",
            (self.0 >> 24) & 0xff,
            (self.0 >> 16) & 0xff,
            (self.0 >> 8) & 0xff,
            self.0 & 0xff
        )
    }
}

/// Typed view over the setup feature report.
#[derive(Debug, Clone, Copy)]
pub struct FeatureReport<'a> {
    buf: &'a [u8],
}

impl<'a> FeatureReport<'a> {
    /// Wrap a received feature report, validating the decoded region.
    pub fn parse(buf: &'a [u8]) -> CfuResult<Self> {
        if buf.len() < FEATURE_REPORT_MIN {
            return Err(CfuError::ShortReport {
                kind: "setup feature report",
                len: buf.len(),
                need: FEATURE_REPORT_MIN,
            });
        }
        Ok(Self { buf })
    }

    /// Current firmware version (little-endian u32 at bytes 5..9).
    pub fn version(&self) -> FirmwareVersion {
        let raw = u32::from_le_bytes([
            self.buf[VERSION_OFFSET],
            self.buf[VERSION_OFFSET + 1],
            self.buf[VERSION_OFFSET + 2],
            self.buf[VERSION_OFFSET + 3],
        ]);
        FirmwareVersion(raw)
    }

    /// Burst-acknowledgment class of the first component record.
    pub fn burst_ack_size(&self) -> u8 {
        self.buf[BURST_ACK_OFFSET]
    }
}

// ============================================================================
// Offer Record
// ============================================================================

/// Decoded 16-byte offer record from the head of an offer image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferRecord {
    pub segment_number: u8,
    pub flags1: u8,
    pub component_id: u8,
    pub token: u8,
    pub version: u32,
    pub compatibility: u32,
    pub flags2: u8,
    pub flags3: u8,
    pub product_id: u16,
}

impl OfferRecord {
    /// Parse the offer record at the head of an offer image.
    pub fn parse(offer_image: &[u8]) -> CfuResult<Self> {
        if offer_image.len() < OFFER_RECORD_SIZE {
            return Err(CfuError::InvalidPackage {
                reason: format!(
                    "offer image is {} bytes, need at least {}",
                    offer_image.len(),
                    OFFER_RECORD_SIZE
                ),
            });
        }

        Ok(Self {
            segment_number: offer_image[0],
            flags1: offer_image[1],
            component_id: offer_image[2],
            token: offer_image[3],
            version: u32::from_le_bytes([
                offer_image[4],
                offer_image[5],
                offer_image[6],
                offer_image[7],
            ]),
            compatibility: u32::from_le_bytes([
                offer_image[8],
                offer_image[9],
                offer_image[10],
                offer_image[11],
            ]),
            flags2: offer_image[12],
            flags3: offer_image[13],
            product_id: u16::from_le_bytes([offer_image[14], offer_image[15]]),
        })
    }

    /// Offered firmware version for display.
    pub fn offered_version(&self) -> FirmwareVersion {
        FirmwareVersion(self.version)
    }
}

// ============================================================================
// Tests
// ============================================================================
