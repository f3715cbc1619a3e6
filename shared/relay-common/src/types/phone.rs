//! Phone Number Types
//!
//! Accounts are keyed by their E.164 phone number. Identity comparisons go
//! through [`PhoneNumber::canonical`], which folds the Brazilian mobile
//! ninth-digit variant so `+55 11 9 8888-7777` and `+55 11 8888-7777` match.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Brazil country calling code.
const BRAZIL_COUNTRY_CODE: &str = "55";

/// Digit count of a Brazilian mobile number carrying the extra ninth digit
/// (country code + two-digit area code + 9 + eight-digit subscriber number).
const BRAZIL_NINTH_DIGIT_LEN: usize = 13;

/// E.164 length bounds, digits only.
const MIN_DIGITS: usize = 8;
const MAX_DIGITS: usize = 15;

/// Normalized phone number in `+<digits>` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Parse a phone number, tolerating spaces, dashes, dots and parentheses.
    ///
    /// ```
    /// use relay_common::PhoneNumber;
    ///
    /// let phone = PhoneNumber::parse("+55 (11) 98888-7777").unwrap();
    /// assert_eq!(phone.as_str(), "+5511988887777");
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let Some(rest) = trimmed.strip_prefix('+') else {
            return Err(Error::InvalidPhoneNumber(input.to_string()));
        };

        let mut digits = String::with_capacity(rest.len());
        for c in rest.chars() {
            match c {
                '0'..='9' => digits.push(c),
                ' ' | '-' | '.' | '(' | ')' => {}
                _ => return Err(Error::InvalidPhoneNumber(input.to_string())),
            }
        }

        if digits.len() < MIN_DIGITS || digits.len() > MAX_DIGITS || digits.starts_with('0') {
            return Err(Error::InvalidPhoneNumber(input.to_string()));
        }

        Ok(Self(format!("+{digits}")))
    }

    /// Build a phone number from a session user id such as
    /// `5511988887777:12@s.whatsapp.net`.
    pub fn from_user_id(user_id: &str) -> Result<Self> {
        let user = user_id.split('@').next().unwrap_or_default();
        let number = user.split(':').next().unwrap_or_default();
        Self::parse(&format!("+{number}"))
    }

    /// The `+<digits>` form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digits without the leading `+`.
    pub fn digits(&self) -> &str {
        &self.0[1..]
    }

    /// Personal chat JID for this number.
    pub fn to_jid(&self) -> String {
        format!("{}@s.whatsapp.net", self.digits())
    }

    /// Canonical form used for identity comparison.
    ///
    /// Brazilian mobile numbers may be reported with or without the ninth
    /// digit that follows the area code; the canonical form drops it.
    pub fn canonical(&self) -> String {
        let digits = self.digits();
        if digits.starts_with(BRAZIL_COUNTRY_CODE)
            && digits.len() == BRAZIL_NINTH_DIGIT_LEN
            && digits.as_bytes()[4] == b'9'
        {
            format!("+{}{}", &digits[..4], &digits[5..])
        } else {
            self.0.clone()
        }
    }

    /// Whether two numbers identify the same account.
    pub fn same_account(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PhoneNumber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PhoneNumber> for String {
    fn from(phone: PhoneNumber) -> Self {
        phone.0
    }
}
