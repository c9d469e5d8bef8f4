use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ZoneError;

/// A logical endpoint exposing one IAS Zone server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(pub u8);

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep{}", self.0)
    }
}

/// Zone status bitfield (alarm / sensor condition flags).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneStatus(pub u16);

impl ZoneStatus {
    pub const ALARM1: u16 = 1 << 0;
    pub const ALARM2: u16 = 1 << 1;
    pub const TAMPER: u16 = 1 << 2;
    pub const BATTERY: u16 = 1 << 3;
    pub const SUPERVISION_REPORTS: u16 = 1 << 4;
    pub const RESTORE_REPORTS: u16 = 1 << 5;
    pub const TROUBLE: u16 = 1 << 6;
    pub const AC_MAINS: u16 = 1 << 7;
    pub const TEST: u16 = 1 << 8;
    pub const BATTERY_DEFECT: u16 = 1 << 9;

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, flags: u16) -> bool {
        self.0 & flags == flags
    }

    /// Either alarm bit set.
    pub fn is_alarm(self) -> bool {
        self.0 & (Self::ALARM1 | Self::ALARM2) != 0
    }
}

impl fmt::Display for ZoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// How this endpoint gets enrolled with the CIE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EnrollmentMode {
    /// Send an enroll request the first time the zone trips.
    TripToPair = 0,
    /// Wait for the CIE to push an unsolicited enroll response.
    AutoEnrollResponse = 1,
    /// Send an enroll request once the CIE has written its address.
    #[default]
    Request = 2,
}

impl TryFrom<u8> for EnrollmentMode {
    type Error = ZoneError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::TripToPair),
            1 => Ok(Self::AutoEnrollResponse),
            2 => Ok(Self::Request),
            other => Err(ZoneError::InvalidMode(other)),
        }
    }
}

/// Persisted ZoneState attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ZoneState {
    NotEnrolled = 0,
    Enrolled = 1,
}

impl From<u8> for ZoneState {
    fn from(raw: u8) -> Self {
        if raw == Self::Enrolled as u8 {
            Self::Enrolled
        } else {
            Self::NotEnrolled
        }
    }
}

/// Zone identifier assigned by the CIE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub u8);

impl ZoneId {
    /// Sentinel for "no zone assigned".
    pub const UNDEFINED: ZoneId = ZoneId(0xFF);

    pub fn is_defined(self) -> bool {
        self != Self::UNDEFINED
    }
}

impl Default for ZoneId {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

/// EUI-64 of the bound CIE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IeeeAddress(pub u64);

impl IeeeAddress {
    pub const UNSET: IeeeAddress = IeeeAddress(0);

    pub fn is_set(self) -> bool {
        self != Self::UNSET
    }
}

impl fmt::Display for IeeeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// Enroll response status carried in the CIE's Zone Enroll Response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnrollResponseCode {
    Success,
    NotSupported,
    NoEnrollPermit,
    TooManyZones,
    Unknown(u8),
}

impl EnrollResponseCode {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl From<u8> for EnrollResponseCode {
    fn from(raw: u8) -> Self {
        match raw {
            0x00 => Self::Success,
            0x01 => Self::NotSupported,
            0x02 => Self::NoEnrollPermit,
            0x03 => Self::TooManyZones,
            other => Self::Unknown(other),
        }
    }
}

impl From<EnrollResponseCode> for u8 {
    fn from(code: EnrollResponseCode) -> Self {
        match code {
            EnrollResponseCode::Success => 0x00,
            EnrollResponseCode::NotSupported => 0x01,
            EnrollResponseCode::NoEnrollPermit => 0x02,
            EnrollResponseCode::TooManyZones => 0x03,
            EnrollResponseCode::Unknown(raw) => raw,
        }
    }
}

/// Outcome of an accepted send, reported once by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SendResult {
    Delivered,
    NoAckReceived,
    OtherFailure,
}

/// Attribute identifier within the IAS Zone cluster.
pub type AttributeId = u16;

/// Attribute ids persisted per endpoint.
pub mod attr {
    use super::AttributeId;

    pub const ZONE_STATE: AttributeId = 0x0000;
    pub const ZONE_TYPE: AttributeId = 0x0001;
    pub const ZONE_STATUS: AttributeId = 0x0002;
    pub const IAS_CIE_ADDRESS: AttributeId = 0x0010;
    pub const ZONE_ID: AttributeId = 0x0011;
    /// Plugin-local, outside the cluster's standard range.
    pub const ENROLLMENT_MODE: AttributeId = 0xFF00;
}
