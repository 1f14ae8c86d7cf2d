//! Payload framing: sub-record parsing and 52-byte unit repacking.
//!
//! A payload image is a stream of variable-length sub-records, each a 5-byte
//! header (destination address u32 LE, data length u8) followed by that many
//! data bytes. The wire wants fixed 52-byte slices, so record data is repacked
//! across record boundaries: full units are emitted eagerly and any short tail
//! is banked as the remainder for the next merge. Only the final unit of the
//! whole payload may be shorter than 52 bytes.

use std::collections::VecDeque;

use crate::config::{MAX_UNIT_SIZE, SUB_RECORD_HEADER_SIZE};
use crate::error::{CfuError, CfuResult};

// ============================================================================
// Sub-Record Parsing
// ============================================================================

/// One variable-length record inside a payload image, header stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubRecord<'a> {
    /// Destination address declared by the record header. The engine tracks
    /// its own running write address; this one is informational.
    pub address: u32,
    /// The record's data bytes.
    pub data: &'a [u8],
}

/// Iterator over the sub-records of a payload image.
///
/// Yields a framing error and then terminates if a header or its declared
/// data runs past the end of the image.
#[derive(Debug)]
pub struct SubRecords<'a> {
    image: &'a [u8],
    pos: usize,
}

impl<'a> SubRecords<'a> {
    pub fn new(image: &'a [u8]) -> Self {
        Self { image, pos: 0 }
    }
}

impl<'a> Iterator for SubRecords<'a> {
    type Item = CfuResult<SubRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.image.len() {
            return None;
        }

        let offset = self.pos;
        let available = self.image.len() - offset;
        if available < SUB_RECORD_HEADER_SIZE {
            self.pos = self.image.len();
            return Some(Err(CfuError::TruncatedHeader { offset, available }));
        }

        let header = &self.image[offset..offset + SUB_RECORD_HEADER_SIZE];
        let address = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let declared = header[4] as usize;

        let data_start = offset + SUB_RECORD_HEADER_SIZE;
        let data_available = self.image.len() - data_start;
        if data_available < declared {
            self.pos = self.image.len();
            return Some(Err(CfuError::TruncatedData {
                offset,
                declared,
                available: data_available,
            }));
        }

        self.pos = data_start + declared;
        Some(Ok(SubRecord {
            address,
            data: &self.image[data_start..data_start + declared],
        }))
    }
}

// ============================================================================
// Unit Packing
// ============================================================================

/// Repacks record data into 52-byte units, banking any short tail.
///
/// The bank holds fewer than 52 bytes between calls; `pack` drains every
/// full unit out of a merge eagerly.
#[derive(Debug, Default)]
pub struct UnitPacker {
    remainder: Vec<u8>,
}

impl UnitPacker {
    pub fn new() -> Self {
        Self {
            remainder: Vec::new(),
        }
    }

    /// Merge fresh record data with the banked remainder and return every
    /// full 52-byte unit, in order. A tail shorter than one unit stays banked.
    pub fn pack(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.remainder.extend_from_slice(data);

        let mut units = Vec::new();
        while self.remainder.len() >= MAX_UNIT_SIZE {
            let tail = self.remainder.split_off(MAX_UNIT_SIZE);
            units.push(std::mem::replace(&mut self.remainder, tail));
        }
        units
    }

    /// Hand out the banked tail as one final short unit, if any bytes remain.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.remainder.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.remainder))
        }
    }

    /// Bytes currently banked.
    pub fn remainder_len(&self) -> usize {
        self.remainder.len()
    }
}

// ============================================================================
// Payload Cursor
// ============================================================================

/// One ready-to-send slice of the framed payload stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmissionUnit {
    pub data: Vec<u8>,
    /// True on exactly the final unit of the payload.
    pub last: bool,
}

/// Pumps a payload image through the packer one transmission unit at a time.
///
/// The cursor owns the record walk and the banked remainder for one payload;
/// the engine pulls a single unit per content-send step. The `last` marker is
/// decided by looking ahead far enough to know whether any framed byte
/// follows, so trailing empty records cannot strand an unmarked final unit.
pub struct PayloadCursor<'a> {
    records: SubRecords<'a>,
    packer: UnitPacker,
    pending: VecDeque<Vec<u8>>,
    input_exhausted: bool,
    finished: bool,
    produced_any: bool,
}

impl<'a> PayloadCursor<'a> {
    pub fn new(payload_image: &'a [u8]) -> Self {
        Self {
            records: SubRecords::new(payload_image),
            packer: UnitPacker::new(),
            pending: VecDeque::new(),
            input_exhausted: false,
            finished: false,
            produced_any: false,
        }
    }

    /// Rewind to the start of the payload image, dropping any banked
    /// remainder and queued units. The next call to [`next_unit`]
    /// produces the first unit of the stream again.
    ///
    /// [`next_unit`]: PayloadCursor::next_unit
    pub fn reset(&mut self) {
        *self = PayloadCursor::new(self.records.image);
    }

    /// Produce the next transmission unit.
    ///
    /// Returns `Ok(None)` once the payload has been fully emitted. A payload
    /// that frames no bytes at all is an `EmptyPayload` error.
    pub fn next_unit(&mut self) -> CfuResult<Option<TransmissionUnit>> {
        if self.finished {
            return Ok(None);
        }

        self.refill()?;

        match self.pending.pop_front() {
            Some(data) => {
                self.produced_any = true;
                let last = !self.more_units_coming()?;
                if last {
                    self.finished = true;
                }
                Ok(Some(TransmissionUnit { data, last }))
            }
            None => {
                self.finished = true;
                if self.produced_any {
                    Ok(None)
                } else {
                    Err(CfuError::EmptyPayload)
                }
            }
        }
    }

    /// Parse records until a unit is queued or the input runs out, flushing
    /// the banked tail on exhaustion.
    fn refill(&mut self) -> CfuResult<()> {
        while self.pending.is_empty() && !self.input_exhausted {
            match self.records.next() {
                Some(Ok(record)) => {
                    self.pending.extend(self.packer.pack(record.data));
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Err(e);
                }
                None => {
                    self.input_exhausted = true;
                    if let Some(tail) = self.packer.flush() {
                        self.pending.push_back(tail);
                    }
                }
            }
        }
        Ok(())
    }

    fn more_units_coming(&mut self) -> CfuResult<bool> {
        if !self.pending.is_empty() || self.packer.remainder_len() > 0 {
            return Ok(true);
        }
        // Nothing queued and nothing banked: parse ahead to find out whether
        // the remaining records frame any bytes.
        self.refill()?;
        Ok(!self.pending.is_empty())
    }
}

// ============================================================================
// Tests
// ============================================================================
