//! Byte widths of the payload wire format
//!
//! These values are shared bit-for-bit with the on-chain decoders. Changing any
//! of them breaks every deployed consumer contract.

/// Trailing marker identifying a redstone payload at the end of calldata.
pub const REDSTONE_MARKER: [u8; REDSTONE_MARKER_BS] =
    [0x00, 0x00, 0x02, 0xed, 0x57, 0x01, 0x1e, 0x00, 0x00];
pub const REDSTONE_MARKER_BS: usize = 9;

pub const UNSIGNED_METADATA_BYTE_SIZE_BS: usize = 3;
pub const DATA_PACKAGES_COUNT_BS: usize = 2;
pub const DATA_POINTS_COUNT_BS: usize = 3;
pub const SIGNATURE_BS: usize = 65;
pub const DATA_POINT_VALUE_BYTE_SIZE_BS: usize = 4;
pub const DATA_FEED_ID_BS: usize = 32;
pub const TIMESTAMP_BS: usize = 6;

/// Default width of a numeric data point value (uint256)
pub const DEFAULT_NUM_VALUE_BS: usize = 32;
/// Numeric values are scaled by 10^8 unless metadata says otherwise
pub const DEFAULT_NUM_VALUE_DECIMALS: u32 = 8;

/// Largest value representable in a big-endian field of `width` bytes.
pub const fn max_for_width(width: usize) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (width * 8)) - 1
    }
}
