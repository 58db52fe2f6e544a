//! Bit-exact broadcast-manager wire records.
//!
//! The kernel's broadcast manager speaks datagrams shaped as a
//! `bcm_msg_head` followed by `nframes` packed `can_frame` records, exactly
//! as laid out in `<linux/can/bcm.h>`. The structs here mirror that layout
//! with `#[repr(C)]` and are asserted against the ABI sizes at compile
//! time; a mismatch would corrupt every command on the channel.

use std::mem;
use std::ptr;

use bitflags::bitflags;
use libc::{c_long, can_frame};

use crate::core::error::{LinkError, Result};
use crate::frame::Frame;

// ============================================================================
// Opcodes and flags
// ============================================================================

/// Broadcast-manager operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    /// Create or update a cyclic transmission task.
    TxSetup = 1,
    /// Remove a cyclic transmission task.
    TxDelete = 2,
    /// Read properties of a cyclic transmission task.
    TxRead = 3,
    /// Send one or more frames immediately.
    TxSend = 4,
    /// Reply to a `TX_READ` request.
    TxStatus = 5,
    /// Notification that a count-limited transmission finished.
    TxExpired = 6,
    /// Subscribe to updates for one identifier.
    RxSetup = 7,
    /// Remove a receive subscription.
    RxDelete = 8,
    /// Read properties of a receive subscription.
    RxRead = 9,
    /// Reply to an `RX_READ` request.
    RxStatus = 10,
    /// Notification that a subscribed identifier went silent.
    RxTimeout = 11,
    /// Notification carrying a changed received frame.
    RxChanged = 12,
}

impl Opcode {
    /// Decode an opcode from the wire, if it is one the kernel defines.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => Self::TxSetup,
            2 => Self::TxDelete,
            3 => Self::TxRead,
            4 => Self::TxSend,
            5 => Self::TxStatus,
            6 => Self::TxExpired,
            7 => Self::RxSetup,
            8 => Self::RxDelete,
            9 => Self::RxRead,
            10 => Self::RxStatus,
            11 => Self::RxTimeout,
            12 => Self::RxChanged,
            _ => return None,
        })
    }
}

bitflags! {
    /// Flag bits of the command header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BcmFlags: u32 {
        /// `ival1`/`ival2` carry valid timer values.
        const SETTIMER = 0x0001;
        /// Start the timer as part of this command.
        const STARTTIMER = 0x0002;
        /// Notify when a count-limited transmission finishes.
        const TX_COUNTEVT = 0x0004;
        /// Send the sequence once immediately on setup.
        const TX_ANNOUNCE = 0x0008;
        /// Copy the header identifier into the frame records.
        const TX_CP_CAN_ID = 0x0010;
        /// Filter by identifier alone, no content comparison.
        const RX_FILTER_ID = 0x0020;
        /// Treat a payload length change as a content change.
        const RX_CHECK_DLC = 0x0040;
        /// Do not start the receive timeout timer automatically.
        const RX_NO_AUTOTIMER = 0x0080;
        /// Re-announce the current frame when reception resumes.
        const RX_ANNOUNCE_RESUME = 0x0100;
        /// Restart the multi-frame index on setup.
        const TX_RESET_MULTI_IDX = 0x0200;
        /// Deliver RTR frames unmodified.
        const RX_RTR_FRAME = 0x0400;
        /// The records after the header are CAN FD frames.
        const CAN_FD_FRAME = 0x0800;
    }
}

// ============================================================================
// Wire structs
// ============================================================================

/// `struct bcm_timeval`: a kernel timer interval as seconds + microseconds.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BcmTimeval {
    pub tv_sec: c_long,
    pub tv_usec: c_long,
}

impl BcmTimeval {
    /// Split a [`std::time::Duration`] into the wire representation.
    pub fn from_duration(interval: std::time::Duration) -> Self {
        Self {
            tv_sec: interval.as_secs() as c_long,
            tv_usec: interval.subsec_micros() as c_long,
        }
    }

    /// Reassemble the interval.
    pub fn to_duration(self) -> std::time::Duration {
        std::time::Duration::new(self.tv_sec as u64, self.tv_usec as u32 * 1_000)
    }
}

/// `struct bcm_msg_head` minus the trailing flexible frame array.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BcmMsgHead {
    pub opcode: u32,
    pub flags: u32,
    /// Number of `ival1` repetitions before the task switches to `ival2`.
    pub count: u32,
    pub ival1: BcmTimeval,
    pub ival2: BcmTimeval,
    pub can_id: u32,
    pub nframes: u32,
}

/// Size of the command header on the wire.
pub const MSG_HEAD_LEN: usize = mem::size_of::<BcmMsgHead>();

/// Size of one packed frame record on the wire.
pub const FRAME_RECORD_LEN: usize = mem::size_of::<can_frame>();

#[cfg(target_pointer_width = "64")]
const _: () = assert!(mem::size_of::<BcmMsgHead>() == 56);
const _: () = assert!(mem::size_of::<can_frame>() == 16);

// ============================================================================
// Encode / decode
// ============================================================================

/// A decoded broadcast-manager message: header plus embedded frames.
#[derive(Debug)]
pub struct BcmMessage {
    pub head: BcmMsgHead,
    pub frames: Vec<Frame>,
}

/// Pack a command header and its frame records into one contiguous
/// datagram, ready for a single `write(2)`.
pub fn encode(head: &BcmMsgHead, frames: &[Frame]) -> Vec<u8> {
    debug_assert_eq!(head.nframes as usize, frames.len());
    let mut buf = vec![0u8; MSG_HEAD_LEN + frames.len() * FRAME_RECORD_LEN];
    // SAFETY: BcmMsgHead and can_frame are plain #[repr(C)] data and the
    // buffer is sized for exactly one header plus `frames.len()` records.
    unsafe {
        ptr::copy_nonoverlapping(
            head as *const BcmMsgHead as *const u8,
            buf.as_mut_ptr(),
            MSG_HEAD_LEN,
        );
        for (i, frame) in frames.iter().enumerate() {
            let raw = frame.to_can_frame();
            ptr::copy_nonoverlapping(
                &raw as *const can_frame as *const u8,
                buf.as_mut_ptr().add(MSG_HEAD_LEN + i * FRAME_RECORD_LEN),
                FRAME_RECORD_LEN,
            );
        }
    }
    buf
}

/// Unwrap a datagram read from a broadcast-manager socket.
///
/// The header must be complete; trailing frame records are taken as far as
/// the buffer actually carries them.
pub fn decode(buf: &[u8]) -> Result<BcmMessage> {
    if buf.len() < MSG_HEAD_LEN {
        return Err(LinkError::Protocol(format!(
            "broadcast-manager message truncated: {} bytes",
            buf.len()
        )));
    }
    // SAFETY: length checked above; read_unaligned tolerates any buffer
    // alignment.
    let head = unsafe { ptr::read_unaligned(buf.as_ptr() as *const BcmMsgHead) };
    // The buffer bounds the record count; the header alone is not trusted.
    let carried = (buf.len() - MSG_HEAD_LEN) / FRAME_RECORD_LEN;
    let count = (head.nframes as usize).min(carried);
    let mut frames = Vec::with_capacity(count);
    for i in 0..count {
        let offset = MSG_HEAD_LEN + i * FRAME_RECORD_LEN;
        // SAFETY: the record lies fully inside the buffer.
        let raw = unsafe { ptr::read_unaligned(buf.as_ptr().add(offset) as *const can_frame) };
        frames.push(Frame::from_can_frame(&raw));
    }
    Ok(BcmMessage { head, frames })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_head_matches_kernel_layout() {
        #[cfg(target_pointer_width = "64")]
        assert_eq!(MSG_HEAD_LEN, 56);
        assert_eq!(FRAME_RECORD_LEN, 16);
    }

    #[test]
    fn test_opcode_round_trip() {
        for raw in 1..=12 {
            let opcode = Opcode::from_raw(raw).unwrap();
            assert_eq!(opcode as u32, raw);
        }
        assert!(Opcode::from_raw(0).is_none());
        assert!(Opcode::from_raw(13).is_none());
    }

    #[test]
    fn test_timeval_split() {
        let tv = BcmTimeval::from_duration(Duration::from_millis(1200));
        assert_eq!(tv.tv_sec, 1);
        assert_eq!(tv.tv_usec, 200_000);
        assert_eq!(tv.to_duration(), Duration::from_millis(1200));
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let frames: Vec<Frame> = (0..4u8)
            .map(|i| Frame::new(0x0C0 + u32::from(i), &[i, i, i]).unwrap())
            .collect();
        let head = BcmMsgHead {
            opcode: Opcode::TxSetup as u32,
            flags: (BcmFlags::SETTIMER | BcmFlags::STARTTIMER).bits(),
            count: 0,
            ival1: BcmTimeval::default(),
            ival2: BcmTimeval::from_duration(Duration::from_millis(1200)),
            can_id: 0,
            nframes: frames.len() as u32,
        };

        let buf = encode(&head, &frames);
        assert_eq!(buf.len(), MSG_HEAD_LEN + 4 * FRAME_RECORD_LEN);

        let message = decode(&buf).unwrap();
        assert_eq!(message.head.opcode, Opcode::TxSetup as u32);
        assert_eq!(
            message.head.flags,
            (BcmFlags::SETTIMER | BcmFlags::STARTTIMER).bits()
        );
        assert_eq!(
            message.head.ival2,
            BcmTimeval {
                tv_sec: 1,
                tv_usec: 200_000
            }
        );
        assert_eq!(message.head.can_id, 0);
        assert_eq!(message.head.nframes, 4);
        assert_eq!(message.frames.len(), 4);
        for (i, frame) in message.frames.iter().enumerate() {
            assert_eq!(frame.id(), 0x0C0 + i as u32);
            assert_eq!(frame.data(), &[i as u8; 3]);
        }
    }

    #[test]
    fn test_decode_rejects_truncated_head() {
        assert!(decode(&[0u8; 8]).is_err());
    }

    #[test]
    fn test_decode_stops_at_partial_record() {
        let frame = Frame::new(0x123, &[0xAA]).unwrap();
        let head = BcmMsgHead {
            opcode: Opcode::RxChanged as u32,
            flags: 0,
            count: 0,
            ival1: BcmTimeval::default(),
            ival2: BcmTimeval::default(),
            can_id: 0x123,
            nframes: 2,
        };
        let mut buf = encode(&head, &[frame, frame]);
        buf.truncate(MSG_HEAD_LEN + FRAME_RECORD_LEN + 4);

        let message = decode(&buf).unwrap();
        assert_eq!(message.frames.len(), 1);
        assert_eq!(message.frames[0].id(), 0x123);
    }
}
