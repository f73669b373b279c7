//! ZIP64 negotiation
//!
//! Decides per numeric field whether the classic 32-bit (or 16-bit) slot can hold the
//! true value, or whether the slot gets the sentinel and the value moves into the
//! ZIP64 extra field or the ZIP64 end of central directory record.

use crate::header::{ExtraField, Zip64ExtraField, MASK_16, MASK_32};

/// Values at or above this need the ZIP64 representation
pub const ZIP64_BYTES_THR: u64 = MASK_32 as u64;

/// Entry counts at or above this need the ZIP64 end of central directory record
pub const ZIP64_ENTRY_THR: u64 = MASK_16 as u64;

#[inline]
pub fn needs_zip64(value: u64) -> bool {
    value >= ZIP64_BYTES_THR
}

/// Either size needs promotion; both sizes are then carried together
#[inline]
pub fn sizes_need_zip64(compressed: u64, uncompressed: u64) -> bool {
    needs_zip64(compressed) || needs_zip64(uncompressed)
}

/// Value for a 32-bit slot: the value itself, or the sentinel if it was promoted
#[inline]
pub fn slot32(value: u64) -> u32 {
    if needs_zip64(value) {
        MASK_32
    } else {
        value as u32
    }
}

/// Value for a 16-bit entry-count slot
#[inline]
pub fn slot16(count: u64) -> u16 {
    if count >= ZIP64_ENTRY_THR {
        MASK_16
    } else {
        count as u16
    }
}

/// Field values for one central directory header after negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CentralFields {
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub local_header_offset: u32,
    pub zip64: Zip64ExtraField,
}

impl CentralFields {
    /// Promote lazily: sizes as a pair, the local header offset on its own
    pub fn negotiate(compressed: u64, uncompressed: u64, local_header_offset: u64) -> Self {
        let mut zip64 = Zip64ExtraField::default();
        let (compressed_size, uncompressed_size) = if sizes_need_zip64(compressed, uncompressed) {
            zip64.uncompressed_size = Some(uncompressed);
            zip64.compressed_size = Some(compressed);
            (MASK_32, MASK_32)
        } else {
            (compressed as u32, uncompressed as u32)
        };

        let local_header_offset = if needs_zip64(local_header_offset) {
            zip64.local_header_offset = Some(local_header_offset);
            MASK_32
        } else {
            local_header_offset as u32
        };

        Self {
            compressed_size,
            uncompressed_size,
            local_header_offset,
            zip64,
        }
    }

    /// Forward-only profile: sizes are always promoted, the offset only when it must be
    pub fn always_zip64_sizes(size: u64, local_header_offset: u64) -> Self {
        let mut zip64 = Zip64ExtraField {
            uncompressed_size: Some(size),
            compressed_size: Some(size),
            ..Default::default()
        };
        let local_header_offset = if needs_zip64(local_header_offset) {
            zip64.local_header_offset = Some(local_header_offset);
            MASK_32
        } else {
            local_header_offset as u32
        };
        Self {
            compressed_size: MASK_32,
            uncompressed_size: MASK_32,
            local_header_offset,
            zip64,
        }
    }

    pub fn uses_zip64(&self) -> bool {
        !self.zip64.is_empty()
    }
}

/// Build a header's extra-field area: the ZIP64 block first, then the preserved blocks.
///
/// If both together overflow the 16-bit length, the preserved blocks are dropped; the
/// ZIP64 block never is. Returns the encoded area and whether anything was dropped.
pub fn assemble_extra_field(zip64: &Zip64ExtraField, preserved: &[ExtraField]) -> (Vec<u8>, bool) {
    let zip64_len = zip64.total_len();
    let preserved_len = ExtraField::total_len_of(preserved);
    let dropped = zip64_len + preserved_len > u16::MAX as usize;

    let mut buf = Vec::with_capacity(if dropped { zip64_len } else { zip64_len + preserved_len });
    zip64.encode(&mut buf);
    if !dropped {
        for field in preserved {
            field.encode(&mut buf);
        }
    }
    (buf, dropped)
}

/// Whether the archive epilogue needs the ZIP64 end of central directory record and locator
pub fn end_record_needs_zip64(
    entry_count: u64,
    central_directory_offset: u64,
    central_directory_size: u64,
    any_entry_promoted: bool,
) -> bool {
    entry_count >= ZIP64_ENTRY_THR
        || needs_zip64(central_directory_offset)
        || needs_zip64(central_directory_size)
        || any_entry_promoted
}
