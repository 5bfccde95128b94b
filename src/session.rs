// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-session SEI assembly and re-emission policy.
//!
//! An [`EncoderSession`] owns the state that outlives a single frame: the
//! frame counter, the forced-IDR phase offset, the last seen static HDR
//! metadata and the ROI map cache. Static HDR SEIs are cached when they
//! arrive and re-emitted only on frames that restart decodability (first
//! frame, IDR, or a forced-header intra-period boundary); per-frame items
//! like HDR10+, closed captions and user data go out with their frame.

use anyhow::anyhow;
use anyhow::Context;

use crate::hdr10::ContentLightLevel;
use crate::hdr10::MasteringDisplayMetadata;
use crate::hdr10plus;
use crate::hdr10plus::Hdr10PlusMetadata;
use crate::roi::QpMapEntry;
use crate::roi::RegionOfInterest;
use crate::roi::RoiState;
use crate::sei;
use crate::sei::SeiPayloadType;
use crate::vui::VuiColorInfo;
use crate::CodecFormat;
use crate::Resolution;

/// A/53 closed caption T.35 wrapper: country code, provider code 0x0031,
/// "GA94", user_data_type_code 3.
const A53_CC_PREFIX: [u8; 8] = [0xb5, 0x00, 0x31, 0x47, 0x41, 0x39, 0x34, 0x03];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PictureType {
    Idr,
    I,
    P,
    B,
}

/// Session-lifetime encoder parameters.
#[derive(Clone, Debug)]
pub struct EncoderConfig {
    pub codec: CodecFormat,
    pub resolution: Resolution,
    /// 0 disables the intra-period boundary rule.
    pub intra_period: u32,
    /// Repeat headers (and SEI) on every intra-period boundary.
    pub forced_header_enable: bool,
    pub roi_enable: bool,
    /// H.273 transfer characteristic to signal as preferred, if any.
    pub preferred_transfer_characteristics: Option<u8>,
}

/// Auxiliary data accompanying one frame on its way to the encoder.
#[derive(Clone, Debug, Default)]
pub struct FrameAuxData<'a> {
    pub mastering_display: Option<MasteringDisplayMetadata>,
    pub content_light_level: Option<ContentLightLevel>,
    pub hdr10plus: Option<Hdr10PlusMetadata>,
    /// Raw A/53 CC byte triplets.
    pub close_caption: Option<&'a [u8]>,
    pub user_data_unregistered: Option<&'a [u8]>,
    pub regions_of_interest: Option<&'a [RegionOfInterest]>,
}

/// The per-frame side data handed to the transport layer.
#[derive(Debug, Default)]
pub struct PreparedFrame {
    /// Concatenated SEI NAL units to prepend to the frame.
    pub sei_data: Vec<u8>,
    /// Length in bytes of the session's current ROI map for this frame,
    /// 0 when no map applies.
    pub roi_map_len: usize,
}

pub struct EncoderSession {
    config: EncoderConfig,
    frame_num: u64,
    force_idr_intra_offset: u64,
    mastering_display: Option<MasteringDisplayMetadata>,
    content_light_level: Option<ContentLightLevel>,
    roi: RoiState,
}

impl EncoderSession {
    pub fn new(config: EncoderConfig) -> Self {
        Self {
            config,
            frame_num: 0,
            force_idr_intra_offset: 0,
            mastering_display: None,
            content_light_level: None,
            roi: RoiState::new(),
        }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn frame_num(&self) -> u64 {
        self.frame_num
    }

    /// The current ROI QP map, empty until a frame carried ROI data.
    pub fn roi_map(&self) -> &[QpMapEntry] {
        self.roi.map()
    }

    pub fn roi_avg_qp(&self) -> u32 {
        self.roi.avg_qp()
    }

    /// Whether stream-level SEI should accompany this frame.
    ///
    /// True on the first frame, on IDR frames, and (with forced headers and
    /// an intra period configured) on every intra-period boundary. An IDR
    /// that lands off the period phase-shifts subsequent boundaries via
    /// `force_idr_intra_offset`.
    pub fn should_send_sei_with_frame(&mut self, pic_type: PictureType) -> bool {
        let period = u64::from(self.config.intra_period);
        let on_boundary = self.config.forced_header_enable
            && period != 0
            && (self.frame_num + self.force_idr_intra_offset) % period == 0;

        if self.frame_num == 0 || pic_type == PictureType::Idr || on_boundary {
            if pic_type == PictureType::Idr
                && self.config.forced_header_enable
                && period != 0
                && self.frame_num % period != 0
            {
                self.force_idr_intra_offset = period - self.frame_num % period;
            }
            log::trace!(
                "send sei: frame {} type {:?} offset {}",
                self.frame_num,
                pic_type,
                self.force_idr_intra_offset
            );
            true
        } else {
            false
        }
    }

    /// Appends one SEI NAL unit unless it would push the frame over the
    /// total budget, in which case the item is dropped.
    fn push_sei(out: &mut Vec<u8>, codec: CodecFormat, ty: SeiPayloadType, payload: &[u8]) {
        let nal = sei::build_sei_nal(codec, ty, payload);
        if out.len() + nal.len() > sei::MAX_SEI_BUF_SIZE {
            log::error!(
                "sei total length {} + {} exceeds maximum {}, discarding item",
                out.len(),
                nal.len(),
                sei::MAX_SEI_BUF_SIZE
            );
            return;
        }
        out.extend_from_slice(&nal);
    }

    /// Assembles the SEI block and ROI map for one frame and advances the
    /// frame counter. Malformed or over-budget items are dropped
    /// individually; the frame itself always goes through.
    pub fn prepare_frame(&mut self, pic_type: PictureType, aux: &FrameAuxData) -> PreparedFrame {
        let codec = self.config.codec;
        let should_send = self.should_send_sei_with_frame(pic_type);
        let mut sei_data = Vec::new();

        // Static HDR metadata is cached on arrival and re-sent only when
        // headers restart.
        if let Some(mdm) = &aux.mastering_display {
            self.mastering_display = Some(mdm.clone());
        }
        if let Some(cll) = aux.content_light_level {
            self.content_light_level = Some(cll);
        }

        if should_send {
            if let Some(mdm) = &self.mastering_display {
                Self::push_sei(
                    &mut sei_data,
                    codec,
                    SeiPayloadType::MasteringDisplayColourVolume,
                    &mdm.to_payload(),
                );
            }
            if let Some(cll) = &self.content_light_level {
                Self::push_sei(
                    &mut sei_data,
                    codec,
                    SeiPayloadType::ContentLightLevel,
                    &cll.to_payload(),
                );
            }
            if let Some(trc) = self.config.preferred_transfer_characteristics {
                Self::push_sei(
                    &mut sei_data,
                    codec,
                    SeiPayloadType::AlternativeTransferCharacteristics,
                    &[trc],
                );
            }
        }

        if let Some(cc) = aux.close_caption {
            match close_caption_payload(cc) {
                Ok(payload) => Self::push_sei(
                    &mut sei_data,
                    codec,
                    SeiPayloadType::UserDataRegisteredItuTT35,
                    &payload,
                ),
                Err(e) => log::error!("dropping close caption: {:#}", e),
            }
        }

        if let Some(hdrp) = &aux.hdr10plus {
            match hdr10plus::encode(hdrp) {
                Ok(payload) => Self::push_sei(
                    &mut sei_data,
                    codec,
                    SeiPayloadType::UserDataRegisteredItuTT35,
                    &payload,
                ),
                Err(e) => log::error!("dropping hdr10+ metadata: {:#}", e),
            }
        }

        if let Some(udu) = aux.user_data_unregistered {
            Self::push_sei(&mut sei_data, codec, SeiPayloadType::UserDataUnregistered, udu);
        }

        let mut roi_map_len = 0;
        if self.config.roi_enable {
            if let Some(rois) = aux.regions_of_interest {
                if self.roi.update(codec, self.config.resolution, rois) {
                    log::debug!(
                        "roi map rebuilt: {} bytes, avg qp {}",
                        self.roi.map().len(),
                        self.roi.avg_qp()
                    );
                }
            }
            roi_map_len = self.roi.map().len();
        }

        self.frame_num += 1;
        PreparedFrame {
            sei_data,
            roi_map_len,
        }
    }
}

/// Wraps A/53 CC triplets into the T.35 user data payload the caption SEI
/// carries: the GA94 prefix, a count byte, the data, and the marker byte.
fn close_caption_payload(cc: &[u8]) -> anyhow::Result<Vec<u8>> {
    if cc.is_empty() || cc.len() % 3 != 0 {
        return Err(anyhow!("caption data length {} is not a multiple of 3", cc.len()));
    }
    // The count field is 5 bits wide.
    let cc_count = cc.len() / 3;
    if cc_count > 31 {
        return Err(anyhow!("caption count {} exceeds 31", cc_count));
    }

    let mut payload = Vec::with_capacity(A53_CC_PREFIX.len() + 3 + cc.len());
    payload.extend_from_slice(&A53_CC_PREFIX);
    // process_cc_data_flag set, process_em_data_flag set.
    payload.push(cc_count as u8 | 0xc0);
    payload.push(0xff); // em_data
    payload.extend_from_slice(cc);
    payload.push(0xff); // marker_bits
    Ok(payload)
}

/// Structured views over the raw SEI byte ranges a decoder extracted from
/// the stream for one frame.
#[derive(Clone, Debug, Default)]
pub struct RawFrameSei<'a> {
    /// 24-byte mastering display colour volume payload.
    pub mastering_display: Option<&'a [u8]>,
    /// 4-byte content light level payload.
    pub content_light_level: Option<&'a [u8]>,
    /// T.35 payload starting with the HDR10+ header.
    pub hdr10plus: Option<&'a [u8]>,
    /// Decoder side-channel VUI colour block.
    pub vui: Option<&'a [u8]>,
    /// Preferred transfer characteristic from an alternative transfer
    /// characteristics SEI.
    pub alternative_transfer: Option<u8>,
}

/// Auxiliary data recovered from one decoded frame.
#[derive(Clone, Debug, Default)]
pub struct DecodedAuxData {
    pub mastering_display: Option<MasteringDisplayMetadata>,
    pub content_light_level: Option<ContentLightLevel>,
    pub hdr10plus: Option<Hdr10PlusMetadata>,
    pub vui: Option<VuiColorInfo>,
}

/// Parses a decoded frame's SEI byte ranges into structured metadata.
/// Each malformed item is dropped and logged on its own; the rest of the
/// frame's data is still returned.
pub fn retrieve_aux_data(raw: &RawFrameSei) -> DecodedAuxData {
    let mut out = DecodedAuxData::default();

    if let Some(data) = raw.mastering_display {
        match MasteringDisplayMetadata::parse(data).context("mastering display colour volume") {
            Ok(mdm) => out.mastering_display = Some(mdm),
            Err(e) => log::error!("retrieve_aux_data: {:#}", e),
        }
    }

    if let Some(data) = raw.content_light_level {
        match ContentLightLevel::parse(data).context("content light level") {
            Ok(cll) => out.content_light_level = Some(cll),
            Err(e) => log::error!("retrieve_aux_data: {:#}", e),
        }
    }

    if let Some(data) = raw.hdr10plus {
        match hdr10plus::decode(data).context("hdr10+ metadata") {
            Ok(hdrp) => out.hdr10plus = Some(hdrp),
            Err(e) => log::error!("retrieve_aux_data: {:#}", e),
        }
    }

    if let Some(data) = raw.vui {
        match VuiColorInfo::parse(data).context("vui colour info") {
            Ok(mut vui) => {
                if let Some(trc) = raw.alternative_transfer {
                    vui.apply_alternative_transfer(trc);
                }
                out.vui = Some(vui);
            }
            Err(e) => log::error!("retrieve_aux_data: {:#}", e),
        }
    }

    out
}
