//! Core types of the data package protocol
//!
//! Defines data points, data packages, signed packages and the payload bundle
//! appended to calldata, plus the JSON shapes served by cache services.

use base64::{engine::general_purpose, Engine as _};
use ethers::types::U256;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{OracleError, Result};
use crate::protocol::constants::{
    DATA_FEED_ID_BS, DEFAULT_NUM_VALUE_BS, DEFAULT_NUM_VALUE_DECIMALS, SIGNATURE_BS,
};

/// Optional per data point metadata. Never serialized into the binary payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPointMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u32>,
}

/// One attested value for one data feed
#[derive(Debug, Clone)]
pub struct DataPoint {
    pub data_feed_id: String,
    /// Big-endian value bytes, fixed width within a data package
    pub value: Vec<u8>,
    pub metadata: Option<DataPointMetadata>,
}

// Metadata does not travel on the wire, so it does not take part in equality.
impl PartialEq for DataPoint {
    fn eq(&self, other: &Self) -> bool {
        self.data_feed_id == other.data_feed_id && self.value == other.value
    }
}

impl Eq for DataPoint {}

impl DataPoint {
    /// Raw bytes data point
    pub fn from_bytes(data_feed_id: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            data_feed_id: data_feed_id.into(),
            value,
            metadata: None,
        }
    }

    /// Numeric data point scaled by the default 10^8
    pub fn numeric(data_feed_id: impl Into<String>, value: f64) -> Result<Self> {
        let value = scale_to_uint(value, DEFAULT_NUM_VALUE_DECIMALS)?;
        Ok(Self::from_bytes(data_feed_id, uint_to_bytes(value)))
    }

    /// Numeric data point with explicit decimals, recorded in metadata
    pub fn numeric_with_decimals(
        data_feed_id: impl Into<String>,
        value: f64,
        decimals: u32,
    ) -> Result<Self> {
        let scaled = scale_to_uint(value, decimals)?;
        Ok(Self {
            data_feed_id: data_feed_id.into(),
            value: uint_to_bytes(scaled),
            metadata: Some(DataPointMetadata {
                decimals: Some(decimals),
            }),
        })
    }

    pub fn decimals(&self) -> u32 {
        self.metadata
            .and_then(|m| m.decimals)
            .unwrap_or(DEFAULT_NUM_VALUE_DECIMALS)
    }

    /// Interpret the value bytes as a scaled unsigned number.
    ///
    /// Returns `None` for values wider than 32 bytes.
    pub fn numeric_value(&self) -> Option<f64> {
        if self.value.len() > DEFAULT_NUM_VALUE_BS {
            return None;
        }
        let uint = U256::from_big_endian(&self.value);
        let decimals = self.decimals();

        if uint <= U256::from(i128::MAX as u128) {
            if let Ok(decimal) = Decimal::try_from_i128_with_scale(uint.as_u128() as i128, decimals) {
                return decimal.to_f64();
            }
        }

        // Beyond the 96-bit decimal mantissa, fall back to float arithmetic
        let raw: f64 = uint.to_string().parse().ok()?;
        Some(raw / 10f64.powi(decimals as i32))
    }

    /// Feed id as the right-padded 32-byte field used on the wire
    pub fn feed_id_bytes(&self) -> Result<[u8; DATA_FEED_ID_BS]> {
        feed_id_to_bytes(&self.data_feed_id)
    }
}

/// Encode an ASCII feed id as a zero right-padded 32-byte field.
pub fn feed_id_to_bytes(data_feed_id: &str) -> Result<[u8; DATA_FEED_ID_BS]> {
    let raw = data_feed_id.as_bytes();
    if raw.is_empty() || raw.len() > DATA_FEED_ID_BS {
        return Err(OracleError::encoding(
            "data feed id",
            format!("'{}' must be 1..={} bytes", data_feed_id, DATA_FEED_ID_BS),
        ));
    }
    if !data_feed_id.is_ascii() {
        return Err(OracleError::encoding(
            "data feed id",
            format!("'{}' is not ASCII", data_feed_id),
        ));
    }
    let mut out = [0u8; DATA_FEED_ID_BS];
    out[..raw.len()].copy_from_slice(raw);
    Ok(out)
}

/// Decode a zero right-padded 32-byte feed id field.
///
/// Accepts exactly what [`feed_id_to_bytes`] produces: a non-empty ASCII id.
pub fn feed_id_from_bytes(bytes: &[u8]) -> Result<String> {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    if end == 0 {
        return Err(OracleError::encoding("data feed id", "field is all zero bytes"));
    }
    let raw = &bytes[..end];
    if !raw.is_ascii() {
        return Err(OracleError::encoding(
            "data feed id",
            format!("0x{} is not ASCII", hex::encode(raw)),
        ));
    }
    String::from_utf8(raw.to_vec())
        .map_err(|e| OracleError::encoding("data feed id", e.to_string()))
}

fn scale_to_uint(value: f64, decimals: u32) -> Result<U256> {
    if !value.is_finite() || value < 0.0 {
        return Err(OracleError::encoding(
            "numeric value",
            format!("{} is not a finite non-negative number", value),
        ));
    }
    let decimal = Decimal::from_f64(value).ok_or_else(|| {
        OracleError::encoding("numeric value", format!("{} does not fit a decimal", value))
    })?;
    let rounded = decimal.round_dp(decimals);
    let mantissa = rounded.mantissa();
    let scale = rounded.scale();
    let base = U256::from(mantissa.unsigned_abs());
    U256::from(10u8)
        .checked_pow(U256::from(decimals.saturating_sub(scale)))
        .and_then(|multiplier| base.checked_mul(multiplier))
        .ok_or_else(|| {
            OracleError::encoding(
                "numeric value",
                format!("{} with {} decimals overflows 256 bits", value, decimals),
            )
        })
}

fn uint_to_bytes(value: U256) -> Vec<u8> {
    let mut out = vec![0u8; DEFAULT_NUM_VALUE_BS];
    value.to_big_endian(&mut out);
    out
}

/// A timestamped set of data points attested by one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPackage {
    data_points: Vec<DataPoint>,
    timestamp_milliseconds: u64,
    /// Declared width of every value, signed along with the points
    value_byte_size: usize,
}

impl DataPackage {
    /// Build a package with data points in canonical (feed id byte) order.
    ///
    /// The value width is taken from the first point, or the default 32 bytes
    /// for a package without points.
    pub fn new(mut data_points: Vec<DataPoint>, timestamp_milliseconds: u64) -> Self {
        data_points.sort_by(|a, b| a.data_feed_id.as_bytes().cmp(b.data_feed_id.as_bytes()));
        let value_byte_size = data_points
            .first()
            .map_or(DEFAULT_NUM_VALUE_BS, |dp| dp.value.len());
        Self {
            data_points,
            timestamp_milliseconds,
            value_byte_size,
        }
    }

    /// Keep data points and the declared value width exactly as given (used by the decoder).
    pub(crate) fn from_ordered(
        data_points: Vec<DataPoint>,
        timestamp_milliseconds: u64,
        value_byte_size: usize,
    ) -> Self {
        Self {
            data_points,
            timestamp_milliseconds,
            value_byte_size,
        }
    }

    pub fn data_points(&self) -> &[DataPoint] {
        &self.data_points
    }

    pub fn value_byte_size(&self) -> usize {
        self.value_byte_size
    }

    pub fn timestamp_milliseconds(&self) -> u64 {
        self.timestamp_milliseconds
    }

    pub fn data_point(&self, data_feed_id: &str) -> Option<&DataPoint> {
        self.data_points
            .iter()
            .find(|dp| dp.data_feed_id == data_feed_id)
    }
}

/// A data package together with the signature over its serialized form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDataPackage {
    data_package: DataPackage,
    signature: Vec<u8>,
}

impl SignedDataPackage {
    pub fn new(data_package: DataPackage, signature: Vec<u8>) -> Result<Self> {
        if signature.len() != SIGNATURE_BS {
            return Err(OracleError::Signature(format!(
                "expected {} signature bytes, got {}",
                SIGNATURE_BS,
                signature.len()
            )));
        }
        Ok(Self {
            data_package,
            signature,
        })
    }

    pub fn data_package(&self) -> &DataPackage {
        &self.data_package
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn timestamp_milliseconds(&self) -> u64 {
        self.data_package.timestamp_milliseconds
    }
}

/// Bundle of signed packages appended to contract calldata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedstonePayload {
    pub signed_data_packages: Vec<SignedDataPackage>,
    pub unsigned_metadata: String,
}

impl RedstonePayload {
    pub fn new(signed_data_packages: Vec<SignedDataPackage>, unsigned_metadata: impl Into<String>) -> Self {
        Self {
            signed_data_packages,
            unsigned_metadata: unsigned_metadata.into(),
        }
    }

    /// Flatten a quorum response into one payload, feed by feed.
    pub fn from_response(response: &DataPackagesResponse, unsigned_metadata: impl Into<String>) -> Self {
        let packages = response.values().flatten().cloned().collect();
        Self::new(packages, unsigned_metadata)
    }
}

/// Metadata string carried next to the packages: `<timestamp>#<version>#<origin>`
pub fn unsigned_metadata(origin: &str) -> String {
    format!(
        "{}#{}#{}",
        chrono::Utc::now().timestamp_millis(),
        env!("CARGO_PKG_VERSION"),
        origin
    )
}

/// Raw packages per feed as returned by a cache service
pub type DataPackagesMap = BTreeMap<String, Vec<SignedDataPackage>>;

/// Quorum-checked packages per feed, `unique_signers_count` entries each
pub type DataPackagesResponse = BTreeMap<String, Vec<SignedDataPackage>>;

// ============================================================================
// JSON shapes served by cache services and historical gateways
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlainValue {
    Number(f64),
    /// base64 encoded raw bytes
    Bytes(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPointPlainObj {
    pub data_feed_id: String,
    pub value: PlainValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DataPointMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedDataPackagePlainObj {
    pub data_points: Vec<DataPointPlainObj>,
    pub timestamp_milliseconds: u64,
    /// base64 encoded 65-byte signature
    pub signature: String,
}

impl TryFrom<DataPointPlainObj> for DataPoint {
    type Error = OracleError;

    fn try_from(plain: DataPointPlainObj) -> Result<Self> {
        let decimals = plain.metadata.and_then(|m| m.decimals);
        match plain.value {
            PlainValue::Number(value) => match decimals {
                Some(decimals) => DataPoint::numeric_with_decimals(plain.data_feed_id, value, decimals),
                None => DataPoint::numeric(plain.data_feed_id, value),
            },
            PlainValue::Bytes(encoded) => {
                let value = general_purpose::STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| OracleError::encoding("data point value", e.to_string()))?;
                Ok(DataPoint {
                    data_feed_id: plain.data_feed_id,
                    value,
                    metadata: plain.metadata,
                })
            }
        }
    }
}

impl From<&DataPoint> for DataPointPlainObj {
    fn from(dp: &DataPoint) -> Self {
        let numeric = dp.metadata.is_some() || dp.value.len() == DEFAULT_NUM_VALUE_BS;
        let value = match dp.numeric_value() {
            Some(number) if numeric => PlainValue::Number(number),
            _ => PlainValue::Bytes(general_purpose::STANDARD.encode(&dp.value)),
        };
        Self {
            data_feed_id: dp.data_feed_id.clone(),
            value,
            metadata: dp.metadata,
        }
    }
}

impl TryFrom<SignedDataPackagePlainObj> for SignedDataPackage {
    type Error = OracleError;

    fn try_from(plain: SignedDataPackagePlainObj) -> Result<Self> {
        let data_points = plain
            .data_points
            .into_iter()
            .map(DataPoint::try_from)
            .collect::<Result<Vec<_>>>()?;
        let signature = general_purpose::STANDARD
            .decode(plain.signature.as_bytes())
            .map_err(|e| OracleError::Signature(format!("invalid base64 signature: {}", e)))?;
        SignedDataPackage::new(
            DataPackage::new(data_points, plain.timestamp_milliseconds),
            signature,
        )
    }
}

impl From<&SignedDataPackage> for SignedDataPackagePlainObj {
    fn from(signed: &SignedDataPackage) -> Self {
        Self {
            data_points: signed
                .data_package
                .data_points
                .iter()
                .map(DataPointPlainObj::from)
                .collect(),
            timestamp_milliseconds: signed.data_package.timestamp_milliseconds,
            signature: general_purpose::STANDARD.encode(&signed.signature),
        }
    }
}

impl fmt::Display for DataPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let feeds: Vec<&str> = self
            .data_points
            .iter()
            .map(|dp| dp.data_feed_id.as_str())
            .collect();
        write!(f, "[{}]@{}", feeds.join(","), self.timestamp_milliseconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_value_scaling() {
        let dp = DataPoint::numeric("ETH", 1800.12).unwrap();
        assert_eq!(dp.value.len(), 32);
        let uint = U256::from_big_endian(&dp.value);
        assert_eq!(uint, U256::from(180_012_000_000u64));
        assert!((dp.numeric_value().unwrap() - 1800.12).abs() < 1e-9);
    }

    #[test]
    fn test_numeric_custom_decimals() {
        let dp = DataPoint::numeric_with_decimals("USDC", 1.5, 6).unwrap();
        assert_eq!(U256::from_big_endian(&dp.value), U256::from(1_500_000u64));
        assert_eq!(dp.decimals(), 6);
        assert_eq!(dp.numeric_value(), Some(1.5));
    }

    #[test]
    fn test_numeric_rejects_negative_and_nan() {
        assert!(DataPoint::numeric("ETH", -1.0).is_err());
        assert!(DataPoint::numeric("ETH", f64::NAN).is_err());
    }

    #[test]
    fn test_feed_id_padding() {
        let bytes = feed_id_to_bytes("BTC").unwrap();
        assert_eq!(&bytes[..3], b"BTC");
        assert!(bytes[3..].iter().all(|b| *b == 0));
        assert_eq!(feed_id_from_bytes(&bytes).unwrap(), "BTC");
        assert!(feed_id_to_bytes(&"X".repeat(33)).is_err());
        assert!(feed_id_to_bytes("").is_err());

        assert!(feed_id_from_bytes(&[0u8; 32]).is_err());
        let mut non_ascii = [0u8; 32];
        non_ascii[..2].copy_from_slice("é".as_bytes());
        assert!(feed_id_from_bytes(&non_ascii).is_err());
    }

    #[test]
    fn test_data_package_orders_points() {
        let package = DataPackage::new(
            vec![
                DataPoint::numeric("ETH", 1.0).unwrap(),
                DataPoint::numeric("BTC", 2.0).unwrap(),
            ],
            1,
        );
        let ids: Vec<&str> = package
            .data_points()
            .iter()
            .map(|dp| dp.data_feed_id.as_str())
            .collect();
        assert_eq!(ids, vec!["BTC", "ETH"]);
    }

    #[test]
    fn test_plain_obj_parsing() {
        let json = r#"{
            "dataPoints": [{"dataFeedId": "ETH", "value": 1650.5}],
            "timestampMilliseconds": 1654353400000,
            "signature": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAE=",
            "signerAddress": "0x0000000000000000000000000000000000000000"
        }"#;
        let plain: SignedDataPackagePlainObj = serde_json::from_str(json).unwrap();
        let signed = SignedDataPackage::try_from(plain.clone()).unwrap();
        assert_eq!(signed.timestamp_milliseconds(), 1_654_353_400_000);
        assert_eq!(signed.signature().len(), SIGNATURE_BS);
        assert_eq!(signed.signature()[64], 1);
        let dp = signed.data_package().data_point("ETH").unwrap();
        assert_eq!(dp.numeric_value(), Some(1650.5));

        let back = SignedDataPackagePlainObj::from(&signed);
        assert_eq!(back.data_points[0].value, PlainValue::Number(1650.5));
        assert_eq!(back.signature, plain.signature);
    }

    #[test]
    fn test_oversize_decimals_rejected() {
        let json = r#"{
            "dataPoints": [{"dataFeedId": "ETH", "value": 1650.5, "metadata": {"decimals": 80}}],
            "timestampMilliseconds": 1654353400000,
            "signature": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAE="
        }"#;
        let plain: SignedDataPackagePlainObj = serde_json::from_str(json).unwrap();
        assert!(matches!(
            SignedDataPackage::try_from(plain),
            Err(OracleError::Encoding { field: "numeric value", .. })
        ));

        // 10^77 still fits, 10^78 does not
        assert!(DataPoint::numeric_with_decimals("ETH", 1.0, 77).is_ok());
        assert!(DataPoint::numeric_with_decimals("ETH", 1.0, 78).is_err());
        assert!(DataPoint::numeric_with_decimals("ETH", u32::MAX as f64, 70).is_err());
    }

    #[test]
    fn test_short_signature_rejected() {
        let package = DataPackage::new(vec![], 0);
        assert!(SignedDataPackage::new(package, vec![0u8; 64]).is_err());
    }
}
