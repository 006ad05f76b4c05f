//! Shared test support: a synthetic HEVC encoder.
//!
//! Emits structurally valid Annex-B output — correct NAL headers, VPS/SPS/
//! PPS preceding every IDR, TRAIL_R between keyframes — without performing
//! any actual compression. Enough for every wire-level assertion; never
//! decodable video.

use std::sync::Arc;

use framecast::encoder::{BgrFrame, EncodedPacket, EncoderConfig, EncoderFactory, HevcEncoder};
use framecast::media::h265;

pub struct SyntheticHevcEncoder {
    frame_index: u64,
    gop_size: u64,
    extradata: Option<Vec<u8>>,
}

impl SyntheticHevcEncoder {
    fn nal(nal_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0, 0, 0, 1, nal_type << 1, 0x01];
        out.extend_from_slice(payload);
        out
    }
}

impl HevcEncoder for SyntheticHevcEncoder {
    fn encode(
        &mut self,
        _frame: &BgrFrame<'_>,
        pts: i64,
    ) -> framecast::Result<Vec<EncodedPacket>> {
        let key = self.frame_index % self.gop_size == 0;
        self.frame_index += 1;

        let mut data = Vec::new();
        if key {
            let mut params = Vec::new();
            params.extend(Self::nal(h265::NAL_VPS, &[0x0C, 0x01, 0xFF, 0xFF]));
            params.extend(Self::nal(h265::NAL_SPS, &[0x01, 0x60, 0x00, 0x00]));
            params.extend(Self::nal(h265::NAL_PPS, &[0xC1, 0x62]));
            self.extradata = Some(params.clone());
            data.extend(params);
            data.extend(Self::nal(h265::NAL_IDR_W_RADL, &[0xAF; 64]));
        } else {
            data.extend(Self::nal(h265::NAL_TRAIL_R, &[0x5A; 24]));
        }
        Ok(vec![EncodedPacket { data, pts }])
    }

    fn flush(&mut self) -> framecast::Result<Vec<EncodedPacket>> {
        Ok(Vec::new())
    }

    fn extradata(&self) -> Option<&[u8]> {
        self.extradata.as_deref()
    }
}

pub fn synthetic_encoder_factory() -> EncoderFactory {
    Arc::new(|config: &EncoderConfig| {
        Ok(Box::new(SyntheticHevcEncoder {
            frame_index: 0,
            gop_size: config.gop_size.max(1) as u64,
            extradata: None,
        }) as Box<dyn HevcEncoder>)
    })
}
