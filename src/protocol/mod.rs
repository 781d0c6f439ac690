//! Protocol module - wire format and signatures of data packages
//!
//! Everything else in the crate builds on the codec and the signer recovery
//! defined here.

pub mod codec;
pub mod constants;
pub mod signing;

pub use codec::{decode_payload, encode_data_package, encode_payload, split_calldata};
pub use signing::{
    recover_signer_address, sign_data_package, verify_signer, SignatureScheme,
};
