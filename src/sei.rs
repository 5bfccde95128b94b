// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! SEI NAL unit framing.
//!
//! Wraps an already-serialized SEI payload into a complete NAL unit for
//! either codec family: start code, NAL header, payload type, ff-continuation
//! size bytes, the payload with emulation prevention applied, and the
//! RBSP stop trailer.

use enumn::N;

use crate::CodecFormat;

/// Total per-frame budget for assembled SEI NAL bytes. Items that would push
/// the frame over this are dropped, not truncated.
pub const MAX_SEI_BUF_SIZE: usize = 1024;

/// SEI payload types this crate produces or consumes.
#[derive(N, Copy, Clone, Debug, PartialEq, Eq)]
pub enum SeiPayloadType {
    UserDataRegisteredItuTT35 = 4,
    UserDataUnregistered = 5,
    MasteringDisplayColourVolume = 137,
    ContentLightLevel = 144,
    AlternativeTransferCharacteristics = 147,
}

/// RBSP stop: `rbsp_stop_one_bit` plus zero padding.
pub const SEI_TRAILER: u8 = 0x80;

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
const NAL_HEADER_H264: [u8; 1] = [0x06];
const NAL_HEADER_H265: [u8; 2] = [0x4e, 0x01];

/// Inserts emulation prevention bytes into `buf[from..]` in place.
///
/// Every `00 00 0x` sequence with `x <= 3` becomes `00 00 03 0x`. Returns
/// the number of bytes inserted; at most one per two payload bytes.
pub fn insert_emulation_prevention(buf: &mut Vec<u8>, from: usize) -> usize {
    let mut inserted = 0;
    let mut zeros = 0;
    let mut i = from;
    while i < buf.len() {
        if zeros == 2 && buf[i] <= 0x03 {
            buf.insert(i, 0x03);
            inserted += 1;
            i += 1;
            zeros = 0;
        }
        if buf[i] == 0x00 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        i += 1;
    }
    inserted
}

/// Appends a complete SEI NAL unit for `payload` to `out`.
///
/// The size bytes encode the pre-emulation-prevention payload length in
/// ff-continuation form. Returns the number of bytes appended.
pub fn build_sei_nal_into(
    out: &mut Vec<u8>,
    codec: CodecFormat,
    payload_type: SeiPayloadType,
    payload: &[u8],
) -> usize {
    let start = out.len();

    out.extend_from_slice(&START_CODE);
    match codec {
        CodecFormat::H264 => out.extend_from_slice(&NAL_HEADER_H264),
        CodecFormat::H265 => out.extend_from_slice(&NAL_HEADER_H265),
    }
    out.push(payload_type as u8);

    let mut size = payload.len();
    while size >= 0xff {
        out.push(0xff);
        size -= 0xff;
    }
    out.push(size as u8);

    let payload_start = out.len();
    out.extend_from_slice(payload);
    insert_emulation_prevention(out, payload_start);

    out.push(SEI_TRAILER);
    out.len() - start
}

/// Builds a complete SEI NAL unit for `payload` as a fresh vector.
pub fn build_sei_nal(codec: CodecFormat, payload_type: SeiPayloadType, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        START_CODE.len() + codec.nal_header_len() + 2 + payload.len() * 3 / 2 + 2,
    );
    build_sei_nal_into(&mut out, codec, payload_type, payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(input: &[u8]) -> Vec<u8> {
        let mut buf = input.to_vec();
        let inserted = insert_emulation_prevention(&mut buf, 0);
        assert_eq!(buf.len(), input.len() + inserted);
        buf
    }

    #[test]
    fn emulation_prevention_insertion() {
        assert_eq!(ep(&[0x00, 0x00, 0x00]), vec![0x00, 0x00, 0x03, 0x00]);
        assert_eq!(ep(&[0x00, 0x00, 0x01]), vec![0x00, 0x00, 0x03, 0x01]);
        assert_eq!(ep(&[0x00, 0x00, 0x02]), vec![0x00, 0x00, 0x03, 0x02]);
        assert_eq!(ep(&[0x00, 0x00, 0x03]), vec![0x00, 0x00, 0x03, 0x03]);

        assert_eq!(
            ep(&[0x00, 0x00, 0x00, 0x00]),
            vec![0x00, 0x00, 0x03, 0x00, 0x00]
        );
        assert_eq!(
            ep(&[0x00, 0x00, 0x00, 0x01]),
            vec![0x00, 0x00, 0x03, 0x00, 0x01]
        );
        assert_eq!(
            ep(&[0x00, 0x00, 0x00, 0x02]),
            vec![0x00, 0x00, 0x03, 0x00, 0x02]
        );
        assert_eq!(
            ep(&[0x00, 0x00, 0x00, 0x03]),
            vec![0x00, 0x00, 0x03, 0x00, 0x03]
        );
    }

    #[test]
    fn emulation_prevention_untouched() {
        assert_eq!(ep(&[]), Vec::<u8>::new());
        assert_eq!(ep(&[0x00, 0x01, 0x00]), vec![0x00, 0x01, 0x00]);
        assert_eq!(ep(&[0x00, 0x00, 0x04]), vec![0x00, 0x00, 0x04]);
        assert_eq!(ep(&[0xff; 8]), vec![0xff; 8]);
    }

    #[test]
    fn emulation_prevention_worst_case_bound() {
        // Alternating 00 00 pairs: one insertion per two payload bytes.
        let input = [0x00u8; 16];
        let out = ep(&input);
        assert!(out.len() <= input.len() + input.len() / 2);
    }

    #[test]
    fn emulation_prevention_respects_from() {
        let mut buf = vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x01];
        // Starting at index 3 leaves the first triple alone.
        let inserted = insert_emulation_prevention(&mut buf, 3);
        assert_eq!(inserted, 0);
        assert_eq!(buf, vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn sei_nal_framing_both_families() {
        let payload = [0xaa, 0xbb, 0xcc];
        let h264 = build_sei_nal(
            CodecFormat::H264,
            SeiPayloadType::ContentLightLevel,
            &payload,
        );
        assert_eq!(
            h264,
            vec![0x00, 0x00, 0x00, 0x01, 0x06, 144, 3, 0xaa, 0xbb, 0xcc, 0x80]
        );

        let h265 = build_sei_nal(
            CodecFormat::H265,
            SeiPayloadType::ContentLightLevel,
            &payload,
        );
        assert_eq!(
            h265,
            vec![0x00, 0x00, 0x00, 0x01, 0x4e, 0x01, 144, 3, 0xaa, 0xbb, 0xcc, 0x80]
        );

        // The two envelopes differ only in the NAL header bytes.
        assert_eq!(h264[..4], h265[..4]);
        assert_eq!(h264[5..], h265[6..]);
    }

    #[test]
    fn sei_nal_size_continuation() {
        let payload = vec![0x55u8; 300];
        let nal = build_sei_nal(
            CodecFormat::H264,
            SeiPayloadType::UserDataUnregistered,
            &payload,
        );
        // 300 = 255 + 45.
        assert_eq!(&nal[5..9], &[5, 0xff, 45, 0x55]);
        assert_eq!(*nal.last().unwrap(), 0x80);

        // Exactly 255 takes a continuation byte of zero.
        let payload = vec![0x55u8; 255];
        let nal = build_sei_nal(
            CodecFormat::H264,
            SeiPayloadType::UserDataUnregistered,
            &payload,
        );
        assert_eq!(&nal[5..9], &[5, 0xff, 0, 0x55]);
    }

    #[test]
    fn sei_nal_size_is_pre_ep_length() {
        // A payload that needs stuffing still declares its original length.
        let payload = [0x00, 0x00, 0x00, 0x00];
        let nal = build_sei_nal(
            CodecFormat::H264,
            SeiPayloadType::UserDataUnregistered,
            &payload,
        );
        assert_eq!(nal[6], 4);
        assert_eq!(&nal[7..12], &[0x00, 0x00, 0x03, 0x00, 0x00]);
    }

    #[test]
    fn payload_type_from_number() {
        assert_eq!(
            SeiPayloadType::n(4),
            Some(SeiPayloadType::UserDataRegisteredItuTT35)
        );
        assert_eq!(
            SeiPayloadType::n(137),
            Some(SeiPayloadType::MasteringDisplayColourVolume)
        );
        assert_eq!(SeiPayloadType::n(6), None);
    }
}
