//! Identifier minting and record encoding helpers

use bech32::Bech32m;
use uuid7::uuid7;

use crate::error::ExitError;

pub const EXIT_HRP: &str = "exit_";
pub const DUE_HRP: &str = "due_";
pub const RECOVERY_HRP: &str = "rec_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

pub(crate) fn mint_id(hrp: &str) -> Result<String, ExitError> {
    new_uuid_to_bech32(hrp).map_err(|e| ExitError::Internal(format!("id minting failed: {e}")))
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, ExitError> {
    Ok(minicbor::to_vec(value)?)
}

pub(crate) fn decode<T: for<'b> minicbor::Decode<'b, ()>>(bytes: &[u8]) -> Result<T, ExitError> {
    Ok(minicbor::decode(bytes)?)
}

/// Key for a child row scoped under a parent id, e.g. `exit_1.../finance`.
pub(crate) fn child_key(parent: &str, child: &str) -> String {
    format!("{parent}/{child}")
}

pub(crate) fn child_prefix(parent: &str) -> String {
    format!("{parent}/")
}
