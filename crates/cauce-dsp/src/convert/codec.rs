//! Per-encoding sample decode/encode.
//!
//! Integer to float divides by `2^(N-1) - 1`; float to integer clamps to
//! [-1.0, 1.0], scales by the same factor and truncates toward zero. The
//! `as` casts below rely on Rust's truncating, saturating float-to-int
//! conversion.

/// One PCM encoding's mapping to and from f32.
pub(crate) trait SampleCodec {
    /// Bytes per sample.
    const SIZE: usize;

    /// Reads one sample from exactly `SIZE` bytes.
    fn decode(bytes: &[u8]) -> f32;

    /// Writes one sample into exactly `SIZE` bytes.
    fn encode(value: f32, bytes: &mut [u8]);
}

#[inline]
fn clamp_unit(v: f32) -> f32 {
    v.clamp(-1.0, 1.0)
}

pub(crate) struct U8;
pub(crate) struct S8;
pub(crate) struct S16;
pub(crate) struct S24Le;
pub(crate) struct S24Be;
pub(crate) struct S24In32;
pub(crate) struct S32;
pub(crate) struct F32;

const S8_SCALE: f32 = 127.0;
const S16_SCALE: f32 = 32767.0;
const S24_SCALE: f32 = 8_388_607.0;
const S32_SCALE: f64 = 2_147_483_647.0;

impl SampleCodec for U8 {
    const SIZE: usize = 1;

    #[inline]
    fn decode(bytes: &[u8]) -> f32 {
        f32::from(bytes[0]) / 128.0 - 1.0
    }

    #[inline]
    fn encode(value: f32, bytes: &mut [u8]) {
        let v = (clamp_unit(value) * 128.0 + 128.0) as i32;
        bytes[0] = v.min(255) as u8;
    }
}

impl SampleCodec for S8 {
    const SIZE: usize = 1;

    #[inline]
    fn decode(bytes: &[u8]) -> f32 {
        f32::from(bytes[0] as i8) / S8_SCALE
    }

    #[inline]
    fn encode(value: f32, bytes: &mut [u8]) {
        bytes[0] = ((clamp_unit(value) * S8_SCALE) as i8) as u8;
    }
}

impl SampleCodec for S16 {
    const SIZE: usize = 2;

    #[inline]
    fn decode(bytes: &[u8]) -> f32 {
        f32::from(i16::from_le_bytes([bytes[0], bytes[1]])) / S16_SCALE
    }

    #[inline]
    fn encode(value: f32, bytes: &mut [u8]) {
        let v = (clamp_unit(value) * S16_SCALE) as i16;
        bytes.copy_from_slice(&v.to_le_bytes());
    }
}

impl SampleCodec for S24Le {
    const SIZE: usize = 3;

    #[inline]
    fn decode(bytes: &[u8]) -> f32 {
        // top-aligned load, arithmetic shift restores the sign
        let v = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
        v as f32 / S24_SCALE
    }

    #[inline]
    fn encode(value: f32, bytes: &mut [u8]) {
        let v = (clamp_unit(value) * S24_SCALE) as i32;
        bytes.copy_from_slice(&v.to_le_bytes()[..3]);
    }
}

impl SampleCodec for S24Be {
    const SIZE: usize = 3;

    #[inline]
    fn decode(bytes: &[u8]) -> f32 {
        let v = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], 0]) >> 8;
        v as f32 / S24_SCALE
    }

    #[inline]
    fn encode(value: f32, bytes: &mut [u8]) {
        let v = (clamp_unit(value) * S24_SCALE) as i32;
        bytes.copy_from_slice(&v.to_be_bytes()[1..]);
    }
}

impl SampleCodec for S24In32 {
    const SIZE: usize = 4;

    #[inline]
    fn decode(bytes: &[u8]) -> f32 {
        let raw = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        ((raw << 8) >> 8) as f32 / S24_SCALE
    }

    #[inline]
    fn encode(value: f32, bytes: &mut [u8]) {
        let v = (clamp_unit(value) * S24_SCALE) as i32;
        bytes.copy_from_slice(&v.to_le_bytes());
    }
}

impl SampleCodec for S32 {
    const SIZE: usize = 4;

    #[inline]
    fn decode(bytes: &[u8]) -> f32 {
        let v = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        (f64::from(v) / S32_SCALE) as f32
    }

    #[inline]
    fn encode(value: f32, bytes: &mut [u8]) {
        let v = (f64::from(clamp_unit(value)) * S32_SCALE) as i32;
        bytes.copy_from_slice(&v.to_le_bytes());
    }
}

impl SampleCodec for F32 {
    const SIZE: usize = 4;

    #[inline]
    fn decode(bytes: &[u8]) -> f32 {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[inline]
    fn encode(value: f32, bytes: &mut [u8]) {
        bytes.copy_from_slice(&value.to_le_bytes());
    }
}
