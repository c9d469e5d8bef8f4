//! ZCL frames for the IAS Zone cluster (0x0500).
//!
//! Only the three commands the server exchanges with its CIE are modelled:
//! Zone Status Change Notification and Zone Enroll Request (server → client),
//! Zone Enroll Response (client → server). All fields are little-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::types::{EnrollResponseCode, ZoneId, ZoneStatus};

pub const CLUSTER_IAS_ZONE: u16 = 0x0500;

/// Cluster-specific, server → client, default response disabled.
pub const FRAME_CONTROL_SERVER_TO_CLIENT: u8 = 0x19;
/// Cluster-specific, client → server.
pub const FRAME_CONTROL_CLIENT_TO_SERVER: u8 = 0x01;
const FRAME_CONTROL_DISABLE_DEFAULT_RESPONSE: u8 = 0x10;

pub const CMD_ZONE_STATUS_CHANGE_NOTIFICATION: u8 = 0x00;
pub const CMD_ZONE_ENROLL_REQUEST: u8 = 0x01;
pub const CMD_ZONE_ENROLL_RESPONSE: u8 = 0x00;

const HEADER_LEN: usize = 3;

/// Frame decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("unexpected command id {0:#04x}")]
    UnexpectedCommand(u8),

    #[error("unexpected frame control {0:#04x}")]
    UnexpectedFrameControl(u8),
}

/// Convert an elapsed time to the notification's quarter-second delay field.
pub fn quarter_seconds(elapsed_ms: u64) -> u16 {
    (elapsed_ms / 250).min(u16::MAX as u64) as u16
}

/// Payload of a Zone Status Change Notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChangeNotification {
    pub zone_status: ZoneStatus,
    pub extended_status: u8,
    pub zone_id: ZoneId,
    /// Time since the status change occurred, in quarter seconds.
    pub delay_qs: u16,
}

impl StatusChangeNotification {
    const PAYLOAD_LEN: usize = 6;

    pub fn encode(&self, seq: u8) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + Self::PAYLOAD_LEN);
        buf.put_u8(FRAME_CONTROL_SERVER_TO_CLIENT);
        buf.put_u8(seq);
        buf.put_u8(CMD_ZONE_STATUS_CHANGE_NOTIFICATION);
        buf.put_u16_le(self.zone_status.bits());
        buf.put_u8(self.extended_status);
        buf.put_u8(self.zone_id.0);
        buf.put_u16_le(self.delay_qs);
        buf.freeze()
    }

    /// Decode a full frame, returning the sequence number and payload.
    pub fn decode(frame: &[u8]) -> Result<(u8, Self), FrameError> {
        let (seq, mut payload) = split_header(
            frame,
            FRAME_CONTROL_SERVER_TO_CLIENT,
            CMD_ZONE_STATUS_CHANGE_NOTIFICATION,
            Self::PAYLOAD_LEN,
        )?;
        Ok((
            seq,
            Self {
                zone_status: ZoneStatus(payload.get_u16_le()),
                extended_status: payload.get_u8(),
                zone_id: ZoneId(payload.get_u8()),
                delay_qs: payload.get_u16_le(),
            },
        ))
    }
}

/// Payload of a Zone Enroll Request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollRequest {
    pub zone_type: u16,
    pub manufacturer_code: u16,
}

impl EnrollRequest {
    const PAYLOAD_LEN: usize = 4;

    pub fn encode(&self, seq: u8) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + Self::PAYLOAD_LEN);
        buf.put_u8(FRAME_CONTROL_SERVER_TO_CLIENT);
        buf.put_u8(seq);
        buf.put_u8(CMD_ZONE_ENROLL_REQUEST);
        buf.put_u16_le(self.zone_type);
        buf.put_u16_le(self.manufacturer_code);
        buf.freeze()
    }

    pub fn decode(frame: &[u8]) -> Result<(u8, Self), FrameError> {
        let (seq, mut payload) = split_header(
            frame,
            FRAME_CONTROL_SERVER_TO_CLIENT,
            CMD_ZONE_ENROLL_REQUEST,
            Self::PAYLOAD_LEN,
        )?;
        Ok((
            seq,
            Self {
                zone_type: payload.get_u16_le(),
                manufacturer_code: payload.get_u16_le(),
            },
        ))
    }
}

/// Payload of the CIE's Zone Enroll Response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollResponse {
    pub code: EnrollResponseCode,
    pub zone_id: ZoneId,
}

impl EnrollResponse {
    const PAYLOAD_LEN: usize = 2;

    pub fn encode(&self, seq: u8) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + Self::PAYLOAD_LEN);
        buf.put_u8(FRAME_CONTROL_CLIENT_TO_SERVER);
        buf.put_u8(seq);
        buf.put_u8(CMD_ZONE_ENROLL_RESPONSE);
        buf.put_u8(self.code.into());
        buf.put_u8(self.zone_id.0);
        buf.freeze()
    }

    /// Accepts the response with or without the disable-default-response bit.
    pub fn decode(frame: &[u8]) -> Result<(u8, Self), FrameError> {
        let (seq, mut payload) = split_header(
            frame,
            FRAME_CONTROL_CLIENT_TO_SERVER,
            CMD_ZONE_ENROLL_RESPONSE,
            Self::PAYLOAD_LEN,
        )?;
        Ok((
            seq,
            Self {
                code: EnrollResponseCode::from(payload.get_u8()),
                zone_id: ZoneId(payload.get_u8()),
            },
        ))
    }
}

/// Validate the 3-byte ZCL header and payload length.
fn split_header(
    frame: &[u8],
    frame_control: u8,
    command: u8,
    payload_len: usize,
) -> Result<(u8, &[u8]), FrameError> {
    let expected = HEADER_LEN + payload_len;
    if frame.len() < expected {
        return Err(FrameError::Truncated {
            expected,
            actual: frame.len(),
        });
    }
    let fc = frame[0];
    let mask = !FRAME_CONTROL_DISABLE_DEFAULT_RESPONSE;
    if fc & mask != frame_control & mask {
        return Err(FrameError::UnexpectedFrameControl(fc));
    }
    if frame[2] != command {
        return Err(FrameError::UnexpectedCommand(frame[2]));
    }
    Ok((frame[1], &frame[HEADER_LEN..expected]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_change_byte_layout() {
        let n = StatusChangeNotification {
            zone_status: ZoneStatus(0x0021),
            extended_status: 0,
            zone_id: ZoneId(7),
            delay_qs: 0x0104,
        };
        let frame = n.encode(0x42);
        assert_eq!(
            frame.as_ref(),
            &[0x19, 0x42, 0x00, 0x21, 0x00, 0x00, 0x07, 0x04, 0x01]
        );
        assert_eq!(StatusChangeNotification::decode(&frame).unwrap(), (0x42, n));
    }

    #[test]
    fn enroll_request_byte_layout() {
        let req = EnrollRequest {
            zone_type: 0x0015,
            manufacturer_code: 0x1002,
        };
        let frame = req.encode(1);
        assert_eq!(frame.as_ref(), &[0x19, 0x01, 0x01, 0x15, 0x00, 0x02, 0x10]);
    }

    #[test]
    fn enroll_response_accepts_default_response_bit() {
        let frame = [0x11, 0x09, 0x00, 0x00, 0x05];
        let (seq, resp) = EnrollResponse::decode(&frame).unwrap();
        assert_eq!(seq, 9);
        assert_eq!(resp.code, EnrollResponseCode::Success);
        assert_eq!(resp.zone_id, ZoneId(5));
    }

    #[test]
    fn truncated_frame_rejected() {
        let err = StatusChangeNotification::decode(&[0x19, 0x01, 0x00, 0x01]).unwrap_err();
        assert_eq!(
            err,
            FrameError::Truncated {
                expected: 9,
                actual: 4
            }
        );
    }

    #[test]
    fn wrong_command_rejected() {
        let frame = EnrollRequest {
            zone_type: 0x0015,
            manufacturer_code: 0,
        }
        .encode(3);
        // Long enough, but an enroll request is not a status notification.
        let mut padded = frame.to_vec();
        padded.extend_from_slice(&[0, 0]);
        assert_eq!(
            StatusChangeNotification::decode(&padded).unwrap_err(),
            FrameError::UnexpectedCommand(CMD_ZONE_ENROLL_REQUEST)
        );
    }

    #[test]
    fn client_frame_is_not_a_server_frame() {
        let frame = EnrollResponse {
            code: EnrollResponseCode::Success,
            zone_id: ZoneId(1),
        }
        .encode(0);
        let mut padded = frame.to_vec();
        padded.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(
            StatusChangeNotification::decode(&padded).unwrap_err(),
            FrameError::UnexpectedFrameControl(FRAME_CONTROL_CLIENT_TO_SERVER)
        );
    }

    #[test]
    fn quarter_seconds_saturate() {
        assert_eq!(quarter_seconds(0), 0);
        assert_eq!(quarter_seconds(999), 3);
        assert_eq!(quarter_seconds(1000), 4);
        assert_eq!(quarter_seconds(u64::MAX), u16::MAX);
    }
}
