//! Accessory setup code (the 8-digit "PIN" printed on the device).

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ConfigError;

/// Codes rejected because they are trivially guessable.
const TRIVIAL_CODES: &[&str] = &[
    "00000000", "11111111", "22222222", "33333333", "44444444", "55555555", "66666666",
    "77777777", "88888888", "99999999", "12345678", "87654321",
];

/// Setup code in canonical `XXX-XX-XXX` form.
///
/// Only ever used as SRP password input. The value is zeroized on drop and
/// never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Deserialize)]
#[serde(try_from = "String")]
pub struct SetupCode(String);

impl SetupCode {
    /// Parse a setup code. Dashes are optional on input.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let mut digits: String = input.chars().filter(|c| *c != '-').collect();

        if digits.len() != 8 || !digits.chars().all(|c| c.is_ascii_digit()) {
            digits.zeroize();
            return Err(ConfigError::InvalidSetupCode(
                "expected 8 digits in XXX-XX-XXX form".to_string(),
            ));
        }

        if TRIVIAL_CODES.contains(&digits.as_str()) {
            digits.zeroize();
            return Err(ConfigError::InvalidSetupCode(
                "code is too easy to guess".to_string(),
            ));
        }

        let code = format!("{}-{}-{}", &digits[0..3], &digits[3..5], &digits[5..8]);
        digits.zeroize();
        Ok(Self(code))
    }

    /// Canonical bytes used as the SRP password.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Default for SetupCode {
    fn default() -> Self {
        Self("031-45-154".to_string())
    }
}

impl FromStr for SetupCode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SetupCode {
    type Error = ConfigError;

    fn try_from(mut value: String) -> Result<Self, Self::Error> {
        let parsed = Self::parse(&value);
        value.zeroize();
        parsed
    }
}

impl fmt::Debug for SetupCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SetupCode(***-**-***)")
    }
}
