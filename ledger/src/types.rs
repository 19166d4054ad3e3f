//! Typed records and identities exchanged with the ledger.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Number of fractional digits in an [`Amount`].
pub const AMOUNT_DECIMALS: u32 = 18;

const AMOUNT_UNIT: u128 = 1_000_000_000_000_000_000;

/// Error parsing an identity or amount.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Address is not 0x-prefixed 20-byte hex
    #[error("Invalid address '{0}': expected 0x followed by 40 hex digits")]
    InvalidAddress(String),

    /// Amount string is not a decimal number
    #[error("Invalid amount '{0}'")]
    InvalidAmount(String),

    /// Amount has more fractional digits than supported
    #[error("Amount '{0}' has more than 18 decimal places")]
    TooManyDecimals(String),

    /// Amount does not fit in 128 bits of base units
    #[error("Amount '{0}' overflows")]
    AmountOverflow(String),
}

/// Ledger identity (account address).
///
/// Always stored lowercase so that identities compare equal regardless of
/// the checksum casing a wallet reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and normalize an address.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let trimmed = raw.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| ParseError::InvalidAddress(raw.to_string()))?;

        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseError::InvalidAddress(raw.to_string()));
        }

        Ok(Self(format!("0x{}", hex_part.to_ascii_lowercase())))
    }

    /// Deterministic address derived from a number. Handy for fixtures.
    pub fn from_low_u64(n: u64) -> Self {
        Self(format!("0x{:040x}", n))
    }

    /// The zero address.
    pub fn zero() -> Self {
        Self::from_low_u64(0)
    }

    /// Whether this is the zero address.
    pub fn is_zero(&self) -> bool {
        self.0[2..].bytes().all(|b| b == b'0')
    }

    /// Lowercase hex representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

/// Ledger-assigned paper id. Ids start at 1; 0 is the "no parent" sentinel
/// on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaperId(pub u64);

impl PaperId {
    /// Raw numeric id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PaperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PaperId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Fixed-point currency amount with [`AMOUNT_DECIMALS`] fractional digits.
///
/// Travels on the wire as a decimal string of base units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u128);

impl Amount {
    /// Zero.
    pub const ZERO: Amount = Amount(0);

    /// Build from base units.
    pub const fn from_base_units(units: u128) -> Self {
        Self(units)
    }

    /// Build from whole currency units.
    pub fn from_whole(whole: u64) -> Self {
        Self(whole as u128 * AMOUNT_UNIT)
    }

    /// Base units.
    pub fn base_units(self) -> u128 {
        self.0
    }

    /// Whether the amount is zero.
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checked addition.
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Saturating subtraction.
    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    /// Parse a human decimal such as `"0.01"` or `"3"`.
    pub fn parse_decimal(raw: &str) -> Result<Self, ParseError> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(ParseError::InvalidAmount(raw.to_string()));
        }

        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };

        let digits_ok = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !digits_ok(whole) || !digits_ok(frac) {
            return Err(ParseError::InvalidAmount(raw.to_string()));
        }
        if frac.len() > AMOUNT_DECIMALS as usize {
            return Err(ParseError::TooManyDecimals(raw.to_string()));
        }

        let whole_units: u128 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| ParseError::AmountOverflow(raw.to_string()))?
        };

        let frac_units: u128 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = AMOUNT_DECIMALS as usize);
            padded
                .parse()
                .map_err(|_| ParseError::InvalidAmount(raw.to_string()))?
        };

        whole_units
            .checked_mul(AMOUNT_UNIT)
            .and_then(|w| w.checked_add(frac_units))
            .map(Amount)
            .ok_or_else(|| ParseError::AmountOverflow(raw.to_string()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / AMOUNT_UNIT;
        let frac = self.0 % AMOUNT_UNIT;
        if frac == 0 {
            return write!(f, "{}", whole);
        }
        let frac = format!("{:018}", frac);
        write!(f, "{}.{}", whole, frac.trim_end_matches('0'))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Text(String),
            Number(u64),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Number(n) => Ok(Amount(n as u128)),
            Wire::Text(s) => s
                .parse::<u128>()
                .map(Amount)
                .map_err(|_| serde::de::Error::custom(format!("invalid amount '{}'", s))),
        }
    }
}

/// Opaque content fingerprint (e.g. a content-addressed file hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an existing fingerprint string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// SHA-256 hex fingerprint of file content.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// The raw fingerprint.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the fingerprint is blank.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Paper fields supplied on submission and resubmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPaper {
    pub title: String,
    pub fingerprint: Fingerprint,
    pub price: Amount,
    pub team_members: String,
    pub research_field: String,
}

impl NewPaper {
    /// Create a paper submission with no team or field.
    pub fn new(title: impl Into<String>, fingerprint: Fingerprint, price: Amount) -> Self {
        Self {
            title: title.into(),
            fingerprint,
            price,
            team_members: String::new(),
            research_field: String::new(),
        }
    }

    /// Set team members.
    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team_members = team.into();
        self
    }

    /// Set research field.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.research_field = field.into();
        self
    }
}

/// Ledger-owned paper record (`getPaperDetails`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperDetails {
    pub id: PaperId,
    pub author: Address,
    pub title: String,
    pub fingerprint: Fingerprint,
    pub price: Amount,
    pub team_members: String,
    pub research_field: String,
    pub is_approved: bool,
    pub is_revision: bool,
    #[serde(with = "previous_version")]
    pub previous_version: Option<PaperId>,
}

/// Stake sub-record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeInfo {
    /// Amount locked at submission
    pub amount: Amount,
    /// Stake was paid back to the author (approved papers)
    pub stake_returned: bool,
    /// Stake was claimed as forfeit (rejected papers)
    #[serde(default)]
    pub forfeited: bool,
}

impl StakeInfo {
    /// Whether settlement has already happened, in either direction.
    pub fn is_settled(&self) -> bool {
        self.stake_returned || self.forfeited
    }
}

/// Decision sub-record (`getPaperStatus`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperStatus {
    pub is_decided: bool,
    /// Meaningful only once decided
    pub is_approved: bool,
    pub approval_count: u32,
    pub rejection_count: u32,
    pub stake: StakeInfo,
}

impl PaperStatus {
    /// Total votes cast.
    pub fn total_votes(&self) -> u32 {
        self.approval_count + self.rejection_count
    }
}

/// Receipt of a confirmed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_hash: String,
    /// Id of the paper created by submit/resubmit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_id: Option<PaperId>,
}

/// Serde helper mapping the 0 sentinel to `None`.
pub mod previous_version {
    use super::PaperId;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<PaperId>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.map(PaperId::get).unwrap_or(0))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<PaperId>, D::Error> {
        let raw = Option::<u64>::deserialize(deserializer)?;
        Ok(raw.filter(|id| *id != 0).map(PaperId))
    }
}
