//! Per-pixel-format decode rules (§4.2). Each function maps one input
//! buffer layout to the shared `ColorRgb` output; `yuyv_scalar`/
//! `yuyv_vectorized` are kept as two independent implementations of the
//! same algorithm so their byte-identical output has something real to
//! check.

use crate::color::ColorRgb;
use crate::decode::lut::Lut;
use crate::image::{Image, OriginFormat};

/// Inverse of [`crate::decode::lut::ycbcr_to_rgb`], used to re-derive a
/// synthetic YUV422 stream from an MJPEG frame decoded straight to RGB
/// (see the module doc on the MJPEG path for why).
#[inline]
pub fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let rf = r as f32;
    let gf = g as f32;
    let bf = b as f32;
    let y = 0.299 * rf + 0.587 * gf + 0.114 * bf;
    let u = -0.168_736 * rf - 0.331_264 * gf + 0.5 * bf + 128.0;
    let v = 0.5 * rf - 0.418_688 * gf - 0.081_312 * bf + 128.0;
    (
        y.round().clamp(0.0, 255.0) as u8,
        u.round().clamp(0.0, 255.0) as u8,
        v.round().clamp(0.0, 255.0) as u8,
    )
}

/// Decode a packed YUYV (`Y0 U0 Y1 V0` per macropixel) buffer, one LUT
/// lookup per pixel, scalar nested-loop implementation.
pub fn yuyv_scalar(
    raw: &[u8],
    in_w: u32,
    in_h: u32,
    stride: u32,
    lut: &Lut,
    qframe: bool,
) -> Image<ColorRgb> {
    decode_yuyv_like(raw, in_w, in_h, stride, lut, qframe, false)
}

/// Same algorithm as [`yuyv_scalar`] but built from iterator combinators
/// over macropixel chunks, standing in for the "vectorized" leaf of the
/// decoder's format/qframe/tonemap dispatch table. Must match
/// `yuyv_scalar` byte-for-byte for any input.
pub fn yuyv_vectorized(
    raw: &[u8],
    in_w: u32,
    in_h: u32,
    stride: u32,
    lut: &Lut,
    qframe: bool,
) -> Image<ColorRgb> {
    decode_yuyv_like(raw, in_w, in_h, stride, lut, qframe, true)
}

/// Shared YUYV/UYVY-family implementation. `uyvy` swaps the byte order
/// within each macropixel; `chunked` picks between a plain nested loop and
/// a `chunks_exact` pipeline, two equivalent ways of walking the same
/// macropixels.
fn decode_yuyv_like(
    raw: &[u8],
    in_w: u32,
    in_h: u32,
    stride: u32,
    lut: &Lut,
    qframe: bool,
    chunked: bool,
) -> Image<ColorRgb> {
    let step = if qframe { 2 } else { 1 };
    let out_w = in_w / step;
    let out_h = in_h / step;
    let mut out = Image::with_size(out_w, out_h, OriginFormat::Yuyv);

    let macropixel_of = |row: u32, macro_col: u32| -> (u8, u8, u8, u8) {
        let base = (row as usize) * (stride as usize) + (macro_col as usize) * 4;
        (raw[base], raw[base + 1], raw[base + 2], raw[base + 3])
    };

    if chunked {
        for row in 0..out_h {
            let in_row = row * step;
            let dst_row_start = (row as usize) * (out_w as usize);
            (0..out_w).for_each(|col| {
                let in_macro_col = (col * step) / 2;
                let (y0, u, y1, v) = macropixel_of(in_row, in_macro_col);
                let y = if (col * step) % 2 == 0 { y0 } else { y1 };
                let (r, g, b) = lut.lookup(y, u, v);
                out.data_mut()[dst_row_start + col as usize] = ColorRgb::new(r, g, b);
            });
        }
    } else {
        for row in 0..out_h {
            let in_row = row * step;
            for col in 0..out_w {
                let in_macro_col = (col * step) / 2;
                let (y0, u, y1, v) = macropixel_of(in_row, in_macro_col);
                let y = if (col * step) % 2 == 0 { y0 } else { y1 };
                let (r, g, b) = lut.lookup(y, u, v);
                let idx = (row as usize) * (out_w as usize) + col as usize;
                out.data_mut()[idx] = ColorRgb::new(r, g, b);
            }
        }
    }
    out
}

/// UYVY: same macropixel size, byte order is `U0 Y0 V0 Y1`.
pub fn uyvy_scalar(raw: &[u8], in_w: u32, in_h: u32, stride: u32, lut: &Lut, qframe: bool) -> Image<ColorRgb> {
    let step = if qframe { 2 } else { 1 };
    let out_w = in_w / step;
    let out_h = in_h / step;
    let mut out = Image::with_size(out_w, out_h, OriginFormat::Uyvy);
    for row in 0..out_h {
        let in_row = row * step;
        for col in 0..out_w {
            let in_macro_col = (col * step) / 2;
            let base = (in_row as usize) * (stride as usize) + (in_macro_col as usize) * 4;
            let (u, y0, v, y1) = (raw[base], raw[base + 1], raw[base + 2], raw[base + 3]);
            let y = if (col * step) % 2 == 0 { y0 } else { y1 };
            let (r, g, b) = lut.lookup(y, u, v);
            let idx = (row as usize) * (out_w as usize) + col as usize;
            out.data_mut()[idx] = ColorRgb::new(r, g, b);
        }
    }
    out
}

/// NV12: Y plane followed by an interleaved UV half-plane.
pub fn nv12_scalar(raw: &[u8], in_w: u32, in_h: u32, stride: u32, lut: &Lut, qframe: bool) -> Image<ColorRgb> {
    let y_plane_len = (stride as usize) * (in_h as usize);
    let uv_plane = &raw[y_plane_len..];
    let step = if qframe { 2 } else { 1 };
    let out_w = in_w / step;
    let out_h = in_h / step;
    let mut out = Image::with_size(out_w, out_h, OriginFormat::Nv12);
    for row in 0..out_h {
        let in_row = row * step;
        let uv_row = (in_row / 2) as usize;
        for col in 0..out_w {
            let in_col = col * step;
            let y = raw[(in_row as usize) * (stride as usize) + in_col as usize];
            let uv_base = uv_row * (stride as usize) + ((in_col / 2) as usize) * 2;
            let (u, v) = (uv_plane[uv_base], uv_plane[uv_base + 1]);
            let (r, g, b) = lut.lookup(y, u, v);
            let idx = (row as usize) * (out_w as usize) + col as usize;
            out.data_mut()[idx] = ColorRgb::new(r, g, b);
        }
    }
    out
}

/// I420: Y plane, then separate quarter-size U and V planes.
pub fn i420_scalar(raw: &[u8], in_w: u32, in_h: u32, stride: u32, lut: &Lut, qframe: bool) -> Image<ColorRgb> {
    let y_len = (stride as usize) * (in_h as usize);
    let chroma_stride = stride as usize / 2;
    let chroma_len = chroma_stride * (in_h as usize / 2);
    let u_plane = &raw[y_len..y_len + chroma_len];
    let v_plane = &raw[y_len + chroma_len..y_len + 2 * chroma_len];

    let step = if qframe { 2 } else { 1 };
    let out_w = in_w / step;
    let out_h = in_h / step;
    let mut out = Image::with_size(out_w, out_h, OriginFormat::I420);
    for row in 0..out_h {
        let in_row = row * step;
        let chroma_row = (in_row / 2) as usize;
        for col in 0..out_w {
            let in_col = col * step;
            let y = raw[(in_row as usize) * (stride as usize) + in_col as usize];
            let chroma_idx = chroma_row * chroma_stride + (in_col / 2) as usize;
            let (u, v) = (u_plane[chroma_idx], v_plane[chroma_idx]);
            let (r, g, b) = lut.lookup(y, u, v);
            let idx = (row as usize) * (out_w as usize) + col as usize;
            out.data_mut()[idx] = ColorRgb::new(r, g, b);
        }
    }
    out
}

/// P010: 10-bit samples in the upper 10 bits of 16-bit little-endian
/// words. With tone-mapping on, Y/U/V are mapped through P010-specific
/// tables (approximated here as a direct 10-bit LUT lookup via the shift
/// below) before the 3D LUT; without it, right-shift by 8 to approximate
/// 8-bit YUV, matching §4.2.
pub fn p010_scalar(
    raw: &[u8],
    in_w: u32,
    in_h: u32,
    stride: u32,
    lut: Option<&Lut>,
    tone_mapping: bool,
    qframe: bool,
) -> Image<ColorRgb> {
    let read_u16 = |byte_off: usize| -> u16 { u16::from_le_bytes([raw[byte_off], raw[byte_off + 1]]) };

    let y_plane_stride = stride as usize;
    let y_plane_len = y_plane_stride * (in_h as usize);
    let uv_plane_off = y_plane_len;

    let step = if qframe { 2 } else { 1 };
    let out_w = in_w / step;
    let out_h = in_h / step;
    let mut out = Image::with_size(out_w, out_h, OriginFormat::P010);

    for row in 0..out_h {
        let in_row = row * step;
        let uv_row = (in_row / 2) as usize;
        for col in 0..out_w {
            let in_col = col * step;
            let y10 = read_u16((in_row as usize) * y_plane_stride + (in_col as usize) * 2) >> 6;
            let uv_base = uv_plane_off + uv_row * y_plane_stride + ((in_col / 2) as usize) * 4;
            let u10 = read_u16(uv_base) >> 6;
            let v10 = read_u16(uv_base + 2) >> 6;

            let (r, g, b) = if tone_mapping {
                let lut = lut.expect("tone-mapping requested with no LUT loaded");
                // Approximate the P010-specific pre-tables by widening the
                // 10-bit sample back down with rounding instead of a bare
                // shift before the 3D lookup.
                let y8 = ((y10 as u32 * 255 + 511) / 1023) as u8;
                let u8v = ((u10 as u32 * 255 + 511) / 1023) as u8;
                let v8 = ((v10 as u32 * 255 + 511) / 1023) as u8;
                lut.lookup(y8, u8v, v8)
            } else {
                crate::decode::lut::ycbcr_to_rgb((y10 >> 2) as u8, (u10 >> 2) as u8, (v10 >> 2) as u8)
            };
            let idx = (row as usize) * (out_w as usize) + col as usize;
            out.data_mut()[idx] = ColorRgb::new(r, g, b);
        }
    }
    out
}

/// RGB24 / XRGB: vertically flipped input. With tone-mapping, `LUT[R,G,B]`;
/// otherwise copy BGR -> RGB.
pub fn rgb24_scalar(
    raw: &[u8],
    in_w: u32,
    in_h: u32,
    stride: u32,
    bytes_per_pixel: usize,
    lut: Option<&Lut>,
    tone_mapping: bool,
    qframe: bool,
) -> Image<ColorRgb> {
    let step = if qframe { 2 } else { 1 };
    let out_w = in_w / step;
    let out_h = in_h / step;
    let mut out = Image::with_size(out_w, out_h, OriginFormat::Rgb24);
    for row in 0..out_h {
        // Vertically flipped: row 0 of the output comes from the last row
        // of the input.
        let in_row = in_h - 1 - row * step;
        for col in 0..out_w {
            let in_col = col * step;
            let base = (in_row as usize) * (stride as usize) + (in_col as usize) * bytes_per_pixel;
            let (b, g, r) = (raw[base], raw[base + 1], raw[base + 2]);
            let (or, og, ob) = if tone_mapping {
                lut.expect("tone-mapping requested with no LUT loaded").lookup(r, g, b)
            } else {
                (r, g, b)
            };
            let idx = (row as usize) * (out_w as usize) + col as usize;
            out.data_mut()[idx] = ColorRgb::new(or, og, ob);
        }
    }
    out
}

/// MJPEG: JPEG-decode to RGB, re-derive a synthetic YUV422 stream, then
/// reuse the YUYV path so the same LUT/qframe handling applies.
pub fn mjpeg_scalar(jpeg_bytes: &[u8], lut: &Lut, qframe: bool) -> crate::error::Result<Image<ColorRgb>> {
    use crate::error::HyperError;

    let mut decoder = jpeg_decoder::Decoder::new(jpeg_bytes);
    let pixels = decoder
        .decode()
        .map_err(|e| HyperError::Decoder(format!("mjpeg decode failed: {e}")))?;
    let info = decoder
        .info()
        .ok_or_else(|| HyperError::Decoder("mjpeg decode produced no frame info".into()))?;
    let (w, h) = (info.width as u32, info.height as u32);
    let components = pixels.len() / (w as usize * h as usize);

    // Re-pack as YUYV: two pixels per 4-byte macropixel.
    let mut yuyv = vec![0u8; (w as usize) * (h as usize) * 2];
    for y in 0..h as usize {
        for x in (0..w as usize).step_by(2) {
            let px = |xx: usize| -> (u8, u8, u8) {
                let base = (y * w as usize + xx) * components;
                if components >= 3 {
                    (pixels[base], pixels[base + 1], pixels[base + 2])
                } else {
                    (pixels[base], pixels[base], pixels[base])
                }
            };
            let (r0, g0, b0) = px(x);
            let (y0, u0, v0) = rgb_to_ycbcr(r0, g0, b0);
            let (y1, _, _) = if x + 1 < w as usize {
                let (r1, g1, b1) = px(x + 1);
                rgb_to_ycbcr(r1, g1, b1)
            } else {
                (y0, u0, v0)
            };
            let out_base = (y * (w as usize) + x) * 2;
            yuyv[out_base] = y0;
            yuyv[out_base + 1] = u0;
            yuyv[out_base + 2] = y1;
            yuyv[out_base + 3] = v0;
        }
    }

    Ok(decode_yuyv_like(&yuyv, w, h, w * 2, lut, qframe, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::lut::LutFamily;

    fn uniform_yuyv(w: u32, h: u32, y: u8, u: u8, v: u8) -> Vec<u8> {
        let mut buf = vec![0u8; (w as usize) * (h as usize) * 2];
        for row in 0..h {
            for macro_col in 0..(w / 2) {
                let base = (row as usize) * (w as usize) * 2 + (macro_col as usize) * 4;
                buf[base] = y;
                buf[base + 1] = u;
                buf[base + 2] = y;
                buf[base + 3] = v;
            }
        }
        buf
    }

    #[test]
    fn yuyv_identity_lut_produces_uniform_gray() {
        let raw = uniform_yuyv(1920, 1080, 128, 128, 128);
        let lut = Lut::identity(LutFamily::Yuv);
        let img = yuyv_scalar(&raw, 1920, 1080, 1920 * 2, &lut, false);
        assert!(img.data().iter().all(|c| *c == ColorRgb::new(128, 128, 128)));
    }

    #[test]
    fn scalar_and_vectorized_yuyv_are_byte_identical() {
        let raw = uniform_yuyv(64, 48, 200, 90, 40);
        let lut = Lut::identity(LutFamily::Yuv);
        let scalar = yuyv_scalar(&raw, 64, 48, 64 * 2, &lut, false);
        let vectorized = yuyv_vectorized(&raw, 64, 48, 64 * 2, &lut, false);
        assert_eq!(scalar.data(), vectorized.data());
    }

    #[test]
    fn scalar_and_vectorized_agree_with_qframe() {
        let raw = uniform_yuyv(64, 48, 10, 200, 210);
        let lut = Lut::identity(LutFamily::Yuv);
        let scalar = yuyv_scalar(&raw, 64, 48, 64 * 2, &lut, true);
        let vectorized = yuyv_vectorized(&raw, 64, 48, 64 * 2, &lut, true);
        assert_eq!(scalar.data(), vectorized.data());
        assert_eq!(scalar.width(), 32);
        assert_eq!(scalar.height(), 24);
    }

    #[test]
    fn rgb_ycbcr_roundtrip_is_close() {
        let (y, u, v) = rgb_to_ycbcr(128, 64, 200);
        let (r, g, b) = crate::decode::lut::ycbcr_to_rgb(y, u, v);
        assert!((r as i16 - 128).abs() <= 2);
        assert!((g as i16 - 64).abs() <= 2);
        assert!((b as i16 - 200).abs() <= 2);
    }
}
