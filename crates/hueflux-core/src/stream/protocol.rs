//! HueStream v1 frame serializer.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │ Bytes 0-8:   "HueStream"                                  │
//! │ Bytes 9-10:  Version (0x01 0x00)                          │
//! │ Byte 11:     Sequence number (wraps)                      │
//! │ Bytes 12-13: Reserved                                     │
//! │ Byte 14:     Color space (0x00 = RGB)                     │
//! │ Byte 15:     Reserved                                     │
//! ├───────────────────────────────────────────────────────────┤
//! │ Per light, 9 bytes:                                       │
//! │   0x00 (device type: light), id u16 BE, R G B u16 BE      │
//! └───────────────────────────────────────────────────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::effect::Frame;

pub const PROTOCOL_NAME: &[u8] = b"HueStream";
pub const HEADER_SIZE: usize = 16;
pub const LIGHT_RECORD_SIZE: usize = 9;

const VERSION: [u8; 2] = [0x01, 0x00];
const COLOR_SPACE_RGB: u8 = 0x00;
const DEVICE_TYPE_LIGHT: u8 = 0x00;

/// Serializer that stamps each message with a wrapping sequence number.
#[derive(Debug, Default)]
pub struct HueStreamEncoder {
    sequence: u8,
}

impl HueStreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `frame` and advance the sequence number.
    pub fn encode(&mut self, frame: &Frame) -> Bytes {
        let bytes = encode(frame, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        bytes
    }
}

/// Encode `frame` with an explicit sequence number. Lights whose id is
/// not a `u16` are left out.
pub fn encode(frame: &Frame, sequence: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + frame.lights.len() * LIGHT_RECORD_SIZE);
    buf.put_slice(PROTOCOL_NAME);
    buf.put_slice(&VERSION);
    buf.put_u8(sequence);
    buf.put_u16(0);
    buf.put_u8(COLOR_SPACE_RGB);
    buf.put_u8(0);

    for light in &frame.lights {
        let Ok(id) = light.id.parse::<u16>() else {
            trace!(light = %light.id, "skipping light with non-numeric id");
            continue;
        };
        let [r, g, b] = light.color.to_rgb16();
        buf.put_u8(DEVICE_TYPE_LIGHT);
        buf.put_u16(id);
        buf.put_u16(r);
        buf.put_u16(g);
        buf.put_u16(b);
    }
    buf.freeze()
}
