//! Payload Codec - binary form of signed data packages
//!
//! Layout, read from the end of the buffer backward:
//!
//! ```text
//! [data package]* [packages count: 2] [unsigned metadata] [metadata size: 3] [marker: 9]
//! ```
//!
//! and each data package:
//!
//! ```text
//! [(feed id: 32, value: N) * count] [timestamp: 6] [value size N: 4] [count: 3] [signature: 65]
//! ```
//!
//! Because everything is a suffix, a payload can be appended to ABI encoded
//! calldata and the original arguments stay decodable.

use crate::error::{OracleError, Result};
use crate::protocol::constants::*;
use crate::types::{
    feed_id_from_bytes, DataPackage, DataPoint, RedstonePayload, SignedDataPackage,
};

/// Bytes covered by the package signature (everything but the signature).
pub fn encode_data_package(package: &DataPackage) -> Result<Vec<u8>> {
    let points = package.data_points();
    let value_size = package.value_byte_size();
    if points.iter().any(|dp| dp.value.len() != value_size) {
        return Err(OracleError::encoding(
            "data point value",
            "all values in a data package must share one byte width",
        ));
    }

    let mut out = Vec::with_capacity(
        points.len() * (DATA_FEED_ID_BS + value_size)
            + TIMESTAMP_BS
            + DATA_POINT_VALUE_BYTE_SIZE_BS
            + DATA_POINTS_COUNT_BS,
    );
    for dp in points {
        out.extend_from_slice(&dp.feed_id_bytes()?);
        out.extend_from_slice(&dp.value);
    }
    write_uint(&mut out, package.timestamp_milliseconds(), TIMESTAMP_BS, "timestamp")?;
    write_uint(
        &mut out,
        value_size as u64,
        DATA_POINT_VALUE_BYTE_SIZE_BS,
        "data point value byte size",
    )?;
    write_uint(
        &mut out,
        points.len() as u64,
        DATA_POINTS_COUNT_BS,
        "data points count",
    )?;
    Ok(out)
}

pub fn encode_signed_data_package(signed: &SignedDataPackage) -> Result<Vec<u8>> {
    let mut out = encode_data_package(signed.data_package())?;
    out.extend_from_slice(signed.signature());
    Ok(out)
}

/// Serialize a payload. Pure, deterministic.
pub fn encode_payload(payload: &RedstonePayload) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for signed in &payload.signed_data_packages {
        out.extend(encode_signed_data_package(signed)?);
    }
    write_uint(
        &mut out,
        payload.signed_data_packages.len() as u64,
        DATA_PACKAGES_COUNT_BS,
        "data packages count",
    )?;
    let metadata = payload.unsigned_metadata.as_bytes();
    out.extend_from_slice(metadata);
    write_uint(
        &mut out,
        metadata.len() as u64,
        UNSIGNED_METADATA_BYTE_SIZE_BS,
        "unsigned metadata byte size",
    )?;
    out.extend_from_slice(&REDSTONE_MARKER);
    Ok(out)
}

/// Decode a buffer that holds exactly one payload and nothing else.
pub fn decode_payload(bytes: &[u8]) -> Result<RedstonePayload> {
    let (prefix, payload) = split_calldata(bytes)?;
    if !prefix.is_empty() {
        return Err(OracleError::UnexpectedPrefix(prefix.len()));
    }
    Ok(payload)
}

/// Decode the payload suffix of calldata, returning the untouched prefix.
pub fn split_calldata(calldata: &[u8]) -> Result<(&[u8], RedstonePayload)> {
    let mut reader = SuffixReader::new(calldata);

    let marker = reader.take(REDSTONE_MARKER_BS, "redstone marker")?;
    if marker != REDSTONE_MARKER {
        return Err(OracleError::MarkerMismatch);
    }

    let metadata_size = reader.read_uint(UNSIGNED_METADATA_BYTE_SIZE_BS, "unsigned metadata byte size")?;
    let metadata = reader.take(metadata_size as usize, "unsigned metadata")?;
    let unsigned_metadata = String::from_utf8(metadata.to_vec())
        .map_err(|e| OracleError::encoding("unsigned metadata", e.to_string()))?;

    let packages_count = reader.read_uint(DATA_PACKAGES_COUNT_BS, "data packages count")?;
    let mut signed_data_packages = Vec::with_capacity(packages_count as usize);
    for _ in 0..packages_count {
        signed_data_packages.push(read_signed_data_package(&mut reader)?);
    }
    // Packages were read last-to-first
    signed_data_packages.reverse();

    Ok((
        reader.remaining(),
        RedstonePayload {
            signed_data_packages,
            unsigned_metadata,
        },
    ))
}

/// Decode one signed data package that ends exactly at the end of `bytes`.
pub fn decode_signed_data_package_from_end(bytes: &[u8]) -> Result<(&[u8], SignedDataPackage)> {
    let mut reader = SuffixReader::new(bytes);
    let signed = read_signed_data_package(&mut reader)?;
    Ok((reader.remaining(), signed))
}

fn read_signed_data_package(reader: &mut SuffixReader<'_>) -> Result<SignedDataPackage> {
    let signature = reader.take(SIGNATURE_BS, "signature")?.to_vec();
    let points_count = reader.read_uint(DATA_POINTS_COUNT_BS, "data points count")? as usize;
    let value_size =
        reader.read_uint(DATA_POINT_VALUE_BYTE_SIZE_BS, "data point value byte size")? as usize;
    let timestamp = reader.read_uint(TIMESTAMP_BS, "timestamp")?;

    let point_size = DATA_FEED_ID_BS + value_size;
    let points_len = points_count.checked_mul(point_size).ok_or(OracleError::Truncated {
        field: "data points",
        needed: usize::MAX,
        available: reader.available(),
    })?;
    let raw_points = reader.take(points_len, "data points")?;

    let data_points = raw_points
        .chunks_exact(point_size)
        .map(|chunk| {
            let (feed_id, value) = chunk.split_at(DATA_FEED_ID_BS);
            Ok(DataPoint::from_bytes(feed_id_from_bytes(feed_id)?, value.to_vec()))
        })
        .collect::<Result<Vec<_>>>()?;

    SignedDataPackage::new(
        DataPackage::from_ordered(data_points, timestamp, value_size),
        signature,
    )
}

fn write_uint(out: &mut Vec<u8>, value: u64, width: usize, field: &'static str) -> Result<()> {
    if value > max_for_width(width) {
        return Err(OracleError::encoding(
            field,
            format!("{} does not fit in {} bytes", value, width),
        ));
    }
    let be = value.to_be_bytes();
    if width >= be.len() {
        out.extend(std::iter::repeat(0u8).take(width - be.len()));
        out.extend_from_slice(&be);
    } else {
        out.extend_from_slice(&be[be.len() - width..]);
    }
    Ok(())
}

/// Consumes a byte slice from its end toward its start.
struct SuffixReader<'a> {
    bytes: &'a [u8],
    end: usize,
}

impl<'a> SuffixReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            end: bytes.len(),
        }
    }

    fn available(&self) -> usize {
        self.end
    }

    fn remaining(&self) -> &'a [u8] {
        &self.bytes[..self.end]
    }

    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8]> {
        if len > self.end {
            return Err(OracleError::Truncated {
                field,
                needed: len,
                available: self.end,
            });
        }
        let start = self.end - len;
        let slice = &self.bytes[start..self.end];
        self.end = start;
        Ok(slice)
    }

    fn read_uint(&mut self, width: usize, field: &'static str) -> Result<u64> {
        let raw = self.take(width, field)?;
        // Widths above 8 bytes only carry leading zeros for fields we read
        let significant = &raw[raw.len().saturating_sub(8)..];
        Ok(significant.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }
}
