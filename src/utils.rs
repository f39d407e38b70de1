//! Identifier helpers shared across the service layer

use bech32::Bech32m;
use uuid7::uuid7;

/// Human-readable prefixes for the ids minted by the engine. The prefix is
/// part of the stored key, so each entity kind occupies its own keyspace.
pub const PROJECT_HRP: &str = "proj_";
pub const SUBCONTRACT_HRP: &str = "sub_";
pub const CERTIFICATE_HRP: &str = "cert_";
pub const USER_HRP: &str = "user_";
pub const PAYMENT_HRP: &str = "pay_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Scan prefix for all keys minted under an hrp. Bech32 strings read
/// `<hrp>1<data>`, so the hrp plus separator is a stable prefix.
pub fn key_prefix(hrp: &str) -> String {
    format!("{hrp}1")
}
