//! CAN data frame representation and rendering.
//!
//! [`Frame`] is the single currency both transports deal in: the raw session
//! converts it to and from [`socketcan::CanFrame`], the broadcast-manager
//! session packs it into `can_frame` wire records. Construction validates
//! the identifier range and the payload length, so the conversions cannot
//! fail afterwards. Bytes past the payload length are zeroed and never
//! rendered or transmitted.

use std::fmt;
use std::mem;

use socketcan::{CanFrame, EmbeddedFrame, Frame as _};

use crate::core::error::{LinkError, Result};

/// Maximum payload length of a classic CAN data frame.
pub const MAX_DATA_LEN: usize = 8;

/// Highest valid 11-bit (standard format) identifier.
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Highest valid 29-bit (extended format) identifier.
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// A classic CAN 2.0 data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    id: u32,
    extended: bool,
    len: u8,
    data: [u8; MAX_DATA_LEN],
}

impl Frame {
    /// Build a standard (11-bit identifier) data frame.
    pub fn new(id: u32, data: &[u8]) -> Result<Self> {
        Self::build(id, false, data)
    }

    /// Build an extended (29-bit identifier) data frame.
    pub fn new_extended(id: u32, data: &[u8]) -> Result<Self> {
        Self::build(id, true, data)
    }

    fn build(id: u32, extended: bool, data: &[u8]) -> Result<Self> {
        let max = if extended {
            MAX_EXTENDED_ID
        } else {
            MAX_STANDARD_ID
        };
        if id > max {
            return Err(LinkError::InvalidFrame(format!(
                "identifier 0x{id:X} exceeds 0x{max:X}"
            )));
        }
        if data.len() > MAX_DATA_LEN {
            return Err(LinkError::InvalidFrame(format!(
                "payload length {} exceeds {MAX_DATA_LEN}",
                data.len()
            )));
        }
        let mut buf = [0u8; MAX_DATA_LEN];
        buf[..data.len()].copy_from_slice(data);
        Ok(Self {
            id,
            extended,
            len: data.len() as u8,
            data: buf,
        })
    }

    /// The identifier, without format flag bits.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// True for 29-bit (extended format) identifiers.
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Payload length in bytes (0–8).
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// True when the frame carries no payload.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The meaningful payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Same payload under a different identifier, using the narrowest
    /// format that fits.
    pub fn with_id(mut self, id: u32) -> Result<Self> {
        if id > MAX_EXTENDED_ID {
            return Err(LinkError::InvalidFrame(format!(
                "identifier 0x{id:X} exceeds 0x{MAX_EXTENDED_ID:X}"
            )));
        }
        self.id = id;
        self.extended = id > MAX_STANDARD_ID;
        Ok(self)
    }

    /// Increment every meaningful payload byte by one, wrapping on
    /// overflow.
    pub fn increment_payload(mut self) -> Self {
        for byte in &mut self.data[..self.len as usize] {
            *byte = byte.wrapping_add(1);
        }
        self
    }

    /// The composite SocketCAN id word, with the EFF flag for extended
    /// frames.
    fn id_word(&self) -> u32 {
        if self.extended {
            self.id | libc::CAN_EFF_FLAG
        } else {
            self.id
        }
    }

    /// Pack into a kernel `can_frame` record for the broadcast-manager
    /// wire.
    pub(crate) fn to_can_frame(&self) -> libc::can_frame {
        // Zeroing covers the reserved fields libc keeps private.
        let mut raw: libc::can_frame = unsafe { mem::zeroed() };
        raw.can_id = self.id_word();
        raw.can_dlc = self.len;
        raw.data[..self.len as usize].copy_from_slice(self.data());
        raw
    }

    /// Unpack a kernel `can_frame` record.
    pub(crate) fn from_can_frame(raw: &libc::can_frame) -> Self {
        let extended = raw.can_id & libc::CAN_EFF_FLAG != 0;
        let mask = if extended {
            libc::CAN_EFF_MASK
        } else {
            libc::CAN_SFF_MASK
        };
        let len = (raw.can_dlc as usize).min(MAX_DATA_LEN);
        let mut data = [0u8; MAX_DATA_LEN];
        data[..len].copy_from_slice(&raw.data[..len]);
        Self {
            id: raw.can_id & mask,
            extended,
            len: len as u8,
            data,
        }
    }

    /// Convert to a socketcan frame for the raw transport.
    pub(crate) fn to_socketcan(&self) -> CanFrame {
        let id: embedded_can::Id = if self.extended {
            embedded_can::ExtendedId::new(self.id)
                .expect("extended identifier validated at construction")
                .into()
        } else {
            embedded_can::StandardId::new(self.id as u16)
                .expect("standard identifier validated at construction")
                .into()
        };
        CanFrame::new(id, self.data()).expect("payload length validated at construction")
    }
}

impl From<&CanFrame> for Frame {
    fn from(frame: &CanFrame) -> Self {
        let data = frame.data();
        let len = data.len().min(MAX_DATA_LEN);
        let mut buf = [0u8; MAX_DATA_LEN];
        buf[..len].copy_from_slice(&data[..len]);
        Self {
            id: frame.raw_id(),
            extended: frame.is_extended(),
            len: len as u8,
            data: buf,
        }
    }
}

impl fmt::Display for Frame {
    /// Renders as `ID  [len]  B0 B1 ...`, candump-style: uppercase hex
    /// identifier padded to at least three digits, then each payload byte
    /// as a space-prefixed two-digit hex pair.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03X}  [{}] ", self.id, self.len)?;
        for byte in self.data() {
            write!(f, " {byte:02X}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_standard_frame() {
        let frame = Frame::new(0x456, &[0x10, 0x20]).unwrap();
        assert_eq!(frame.to_string(), "456  [2]  10 20");
    }

    #[test]
    fn test_render_pads_short_ids() {
        let frame = Frame::new(0xA, &[0xFF]).unwrap();
        assert_eq!(frame.to_string(), "00A  [1]  FF");
    }

    #[test]
    fn test_render_empty_payload() {
        let frame = Frame::new(0x7FF, &[]).unwrap();
        assert_eq!(frame.to_string(), "7FF  [0] ");
    }

    #[test]
    fn test_render_extended_id() {
        let frame = Frame::new_extended(0x1ABCDE, &[0x01]).unwrap();
        assert_eq!(frame.to_string(), "1ABCDE  [1]  01");
    }

    #[test]
    fn test_echo_transform_example() {
        let frame = Frame::new(0x456, &[0x10, 0x20]).unwrap();
        assert_eq!(frame.to_string(), "456  [2]  10 20");

        let frame = frame.with_id(0x0CC).unwrap().increment_payload();
        assert_eq!(frame.id(), 0x0CC);
        assert_eq!(frame.data(), &[0x11, 0x21]);
        assert_eq!(frame.to_string(), "0CC  [2]  11 21");
    }

    #[test]
    fn test_increment_wraps_on_overflow() {
        let frame = Frame::new(0x100, &[0xFF, 0x00]).unwrap().increment_payload();
        assert_eq!(frame.data(), &[0x00, 0x01]);
    }

    #[test]
    fn test_increment_256_times_is_identity() {
        let original = Frame::new(0x123, &[0x10, 0x80, 0xFE]).unwrap();
        let mut frame = original;
        for _ in 0..256 {
            frame = frame.increment_payload();
        }
        assert_eq!(frame.data(), original.data());
    }

    #[test]
    fn test_rejects_oversized_payload() {
        assert!(Frame::new(0x100, &[0u8; 9]).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_ids() {
        assert!(Frame::new(0x800, &[]).is_err());
        assert!(Frame::new_extended(0x2000_0000, &[]).is_err());
        assert!(Frame::new_extended(0x800, &[]).is_ok());
    }

    #[test]
    fn test_with_id_selects_narrowest_format() {
        let frame = Frame::new_extended(0x18DA_F110, &[1]).unwrap();
        let frame = frame.with_id(0x0CC).unwrap();
        assert!(!frame.is_extended());
        let frame = frame.with_id(0x18DA_F110).unwrap();
        assert!(frame.is_extended());
    }

    #[test]
    fn test_can_frame_round_trip() {
        let frame = Frame::new(0x456, &[1, 2, 3]).unwrap();
        let raw = frame.to_can_frame();
        assert_eq!(raw.can_id, 0x456);
        assert_eq!(raw.can_dlc, 3);
        assert_eq!(Frame::from_can_frame(&raw), frame);

        let frame = Frame::new_extended(MAX_EXTENDED_ID, &[9]).unwrap();
        let raw = frame.to_can_frame();
        assert_eq!(raw.can_id & libc::CAN_EFF_FLAG, libc::CAN_EFF_FLAG);
        assert_eq!(Frame::from_can_frame(&raw), frame);
    }

    #[test]
    fn test_socketcan_round_trip() {
        let frame = Frame::new(0x110, &[0x00, 0x11, 0x22, 0x33]).unwrap();
        assert_eq!(Frame::from(&frame.to_socketcan()), frame);

        let frame = Frame::new_extended(0x18DA_F110, &[0xAB]).unwrap();
        assert_eq!(Frame::from(&frame.to_socketcan()), frame);
    }
}
