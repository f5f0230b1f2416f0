//! Minimal MAVLink v2 codec for the two messages this system speaks:
//! `HEARTBEAT` (#0) and `OBSTACLE_DISTANCE_3D` (#11037).
//!
//! # Frame layout
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 1 | `0xFD` start marker |
//! | 1 | 1 | payload length (after trimming) |
//! | 2 | 1 | incompat flags (always 0, unsigned) |
//! | 3 | 1 | compat flags (0) |
//! | 4 | 1 | sequence |
//! | 5 | 1 | system id |
//! | 6 | 1 | component id |
//! | 7 | 3 | message id, little-endian |
//! | 10 | len | payload, trailing zero bytes trimmed (at least one byte kept) |
//! | 10+len | 2 | CRC-16/MCRF4XX over bytes 1..10+len and the message's CRC_EXTRA |

use gridlink_types::{GridError, ObstacleVector};

pub const MAVLINK_STX_V2: u8 = 0xFD;
const HEADER_LEN: usize = 10;
const CHECKSUM_LEN: usize = 2;

pub const HEARTBEAT_ID: u32 = 0;
const HEARTBEAT_CRC_EXTRA: u8 = 50;
const HEARTBEAT_LEN: usize = 9;

pub const OBSTACLE_DISTANCE_3D_ID: u32 = 11037;
const OBSTACLE_DISTANCE_3D_CRC_EXTRA: u8 = 130;
const OBSTACLE_DISTANCE_3D_LEN: usize = 28;

pub const MAV_TYPE_ONBOARD_CONTROLLER: u8 = 18;
pub const MAV_AUTOPILOT_INVALID: u8 = 8;
pub const MAV_DISTANCE_SENSOR_UNKNOWN: u8 = 4;
pub const MAVLINK_VERSION: u8 = 3;
/// `obstacle_id` value meaning "not tracked".
pub const UNKNOWN_OBSTACLE_ID: u16 = u16::MAX;

/// Sender identity stamped into every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MavIdentity {
    pub system_id: u8,
    pub component_id: u8,
}

impl Default for MavIdentity {
    fn default() -> Self {
        Self {
            system_id: 1,
            component_id: 93,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub mav_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
    pub mavlink_version: u8,
}

impl Heartbeat {
    /// Keep-alive sent by an onboard companion that is not an autopilot.
    pub fn onboard_controller() -> Self {
        Self {
            custom_mode: 0,
            mav_type: MAV_TYPE_ONBOARD_CONTROLLER,
            autopilot: MAV_AUTOPILOT_INVALID,
            base_mode: 0,
            system_status: 0,
            mavlink_version: MAVLINK_VERSION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObstacleDistance3d {
    pub time_boot_ms: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    pub obstacle_id: u16,
    pub sensor_type: u8,
    pub frame: u8,
}

impl From<&ObstacleVector> for ObstacleDistance3d {
    fn from(v: &ObstacleVector) -> Self {
        Self {
            time_boot_ms: v.timestamp_ms,
            x: v.x,
            y: v.y,
            z: v.z,
            min_distance: v.min_range,
            max_distance: v.max_range,
            obstacle_id: UNKNOWN_OBSTACLE_ID,
            sensor_type: MAV_DISTANCE_SENSOR_UNKNOWN,
            frame: v.frame.mav_frame(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MavMessage {
    Heartbeat(Heartbeat),
    ObstacleDistance3d(ObstacleDistance3d),
}

impl MavMessage {
    pub fn id(&self) -> u32 {
        match self {
            MavMessage::Heartbeat(_) => HEARTBEAT_ID,
            MavMessage::ObstacleDistance3d(_) => OBSTACLE_DISTANCE_3D_ID,
        }
    }

    fn crc_extra(&self) -> u8 {
        match self {
            MavMessage::Heartbeat(_) => HEARTBEAT_CRC_EXTRA,
            MavMessage::ObstacleDistance3d(_) => OBSTACLE_DISTANCE_3D_CRC_EXTRA,
        }
    }

    /// Untrimmed wire payload, fields in MAVLink order (largest type first).
    fn payload(&self) -> Vec<u8> {
        match self {
            MavMessage::Heartbeat(hb) => {
                let mut buf = Vec::with_capacity(HEARTBEAT_LEN);
                buf.extend_from_slice(&hb.custom_mode.to_le_bytes());
                buf.extend_from_slice(&[
                    hb.mav_type,
                    hb.autopilot,
                    hb.base_mode,
                    hb.system_status,
                    hb.mavlink_version,
                ]);
                buf
            }
            MavMessage::ObstacleDistance3d(od) => {
                let mut buf = Vec::with_capacity(OBSTACLE_DISTANCE_3D_LEN);
                buf.extend_from_slice(&od.time_boot_ms.to_le_bytes());
                for f in [od.x, od.y, od.z, od.min_distance, od.max_distance] {
                    buf.extend_from_slice(&f.to_le_bytes());
                }
                buf.extend_from_slice(&od.obstacle_id.to_le_bytes());
                buf.push(od.sensor_type);
                buf.push(od.frame);
                buf
            }
        }
    }

    fn parse(id: u32, payload: &[u8]) -> Result<Self, GridError> {
        let (_, full_len) = message_info(id)?;
        // Restore bytes trimmed on the wire.
        let mut buf = payload.to_vec();
        if buf.len() > full_len {
            return Err(GridError::Frame(format!(
                "message {id}: payload of {} bytes exceeds {full_len}",
                buf.len()
            )));
        }
        buf.resize(full_len, 0);

        let u32_at = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        let f32_at = |i: usize| f32::from_bits(u32_at(i));

        Ok(match id {
            HEARTBEAT_ID => MavMessage::Heartbeat(Heartbeat {
                custom_mode: u32_at(0),
                mav_type: buf[4],
                autopilot: buf[5],
                base_mode: buf[6],
                system_status: buf[7],
                mavlink_version: buf[8],
            }),
            _ => MavMessage::ObstacleDistance3d(ObstacleDistance3d {
                time_boot_ms: u32_at(0),
                x: f32_at(4),
                y: f32_at(8),
                z: f32_at(12),
                min_distance: f32_at(16),
                max_distance: f32_at(20),
                obstacle_id: u16::from_le_bytes([buf[24], buf[25]]),
                sensor_type: buf[26],
                frame: buf[27],
            }),
        })
    }
}

fn message_info(id: u32) -> Result<(u8, usize), GridError> {
    match id {
        HEARTBEAT_ID => Ok((HEARTBEAT_CRC_EXTRA, HEARTBEAT_LEN)),
        OBSTACLE_DISTANCE_3D_ID => Ok((OBSTACLE_DISTANCE_3D_CRC_EXTRA, OBSTACLE_DISTANCE_3D_LEN)),
        other => Err(GridError::Frame(format!("unsupported message id {other}"))),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CRC-16/MCRF4XX (X.25)
// ────────────────────────────────────────────────────────────────────────────

fn crc_accumulate(byte: u8, crc: u16) -> u16 {
    let mut tmp = byte ^ (crc & 0xFF) as u8;
    tmp ^= tmp << 4;
    let tmp = u16::from(tmp);
    (crc >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4)
}

/// CRC-16/MCRF4XX of `data`, seeded with `0xFFFF`.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF, |crc, &b| crc_accumulate(b, crc))
}

fn frame_crc(header_and_payload: &[u8], crc_extra: u8) -> u16 {
    crc_accumulate(crc_extra, crc16(&header_and_payload[1..]))
}

// ────────────────────────────────────────────────────────────────────────────
// Encode / decode
// ────────────────────────────────────────────────────────────────────────────

/// Serialise `msg` into a complete MAVLink v2 frame.
pub fn encode_frame(seq: u8, identity: MavIdentity, msg: &MavMessage) -> Vec<u8> {
    let mut payload = msg.payload();
    while payload.len() > 1 && payload.last() == Some(&0) {
        payload.pop();
    }
    let id = msg.id().to_le_bytes();

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    frame.extend_from_slice(&[
        MAVLINK_STX_V2,
        payload.len() as u8,
        0,
        0,
        seq,
        identity.system_id,
        identity.component_id,
        id[0],
        id[1],
        id[2],
    ]);
    frame.extend_from_slice(&payload);

    let crc = frame_crc(&frame, msg.crc_extra());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// A decoded frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MavFrame {
    pub seq: u8,
    pub identity: MavIdentity,
    pub message: MavMessage,
}

/// Parse exactly one MAVLink v2 frame from `bytes`.
///
/// # Errors
///
/// Returns [`GridError::Frame`] on a bad start marker, a length mismatch,
/// an unknown message id or a checksum failure.
pub fn decode_frame(bytes: &[u8]) -> Result<MavFrame, GridError> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(GridError::Frame(format!(
            "frame too short: {} bytes",
            bytes.len()
        )));
    }
    if bytes[0] != MAVLINK_STX_V2 {
        return Err(GridError::Frame(format!(
            "bad start marker 0x{:02X}",
            bytes[0]
        )));
    }
    let len = bytes[1] as usize;
    if bytes.len() != HEADER_LEN + len + CHECKSUM_LEN {
        return Err(GridError::Frame(format!(
            "length field says {len} payload bytes, frame holds {}",
            bytes.len() - HEADER_LEN - CHECKSUM_LEN
        )));
    }
    let id = u32::from_le_bytes([bytes[7], bytes[8], bytes[9], 0]);
    let (crc_extra, _) = message_info(id)?;

    let body_end = HEADER_LEN + len;
    let expected = frame_crc(&bytes[..body_end], crc_extra);
    let actual = u16::from_le_bytes([bytes[body_end], bytes[body_end + 1]]);
    if expected != actual {
        return Err(GridError::Frame(format!(
            "checksum mismatch: expected 0x{expected:04X}, got 0x{actual:04X}"
        )));
    }

    Ok(MavFrame {
        seq: bytes[4],
        identity: MavIdentity {
            system_id: bytes[5],
            component_id: bytes[6],
        },
        message: MavMessage::parse(id, &bytes[HEADER_LEN..body_end])?,
    })
}
