//! `Image<T>`: a row-major pixel buffer with an origin format tag and a
//! scratch-allocator cache, matching §3's data-model entry. `resize` is the
//! only way the backing buffer changes size, keeping the invariant
//! `rawMem.len() == width*height*sizeof(T)` trivially true.

use crate::color::ColorRgb;

/// Tags the pixel format an image was decoded from, kept around for
/// diagnostics and for the decoder's byte-identical vector/scalar test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OriginFormat {
    Yuyv,
    Uyvy,
    Nv12,
    I420,
    P010,
    Rgb24,
    Xrgb,
    Mjpeg,
    Synthetic,
}

/// A decoded, row-major image of pixels of type `T`.
///
/// `resize` reuses the backing allocation when the new size is no larger
/// than the cached capacity, the "scratch-allocator cache" behavior named
/// in §3 — repeated decodes at a stable resolution never reallocate.
#[derive(Clone, Debug)]
pub struct Image<T> {
    width: u32,
    height: u32,
    origin: OriginFormat,
    data: Vec<T>,
}

impl<T: Clone + Default> Image<T> {
    pub fn new(origin: OriginFormat) -> Self {
        Image { width: 0, height: 0, origin, data: Vec::new() }
    }

    pub fn with_size(width: u32, height: u32, origin: OriginFormat) -> Self {
        let mut img = Self::new(origin);
        img.resize(width, height);
        img
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn origin(&self) -> OriginFormat {
        self.origin
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Resize the backing buffer to `width*height` elements, reusing
    /// capacity when possible (the scratch-allocator cache).
    pub fn resize(&mut self, width: u32, height: u32) {
        let n = (width as usize) * (height as usize);
        self.width = width;
        self.height = height;
        if self.data.len() != n {
            self.data.resize(n, T::default());
        }
    }

    pub fn set_origin(&mut self, origin: OriginFormat) {
        self.origin = origin;
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Option<&T> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get((y as usize) * (self.width as usize) + x as usize)
    }

    #[inline]
    pub fn row(&self, y: u32) -> &[T] {
        let w = self.width as usize;
        let start = (y as usize) * w;
        &self.data[start..start + w]
    }
}

impl Image<ColorRgb> {
    /// Crop in-place by adjusting bounds and compacting rows; used by the
    /// blackbar detector (§4.4) to remove near-black margins before
    /// reduction, and by the decoder's crop handling (§4.2).
    pub fn cropped_view(&self, xmin: u32, xmax: u32, ymin: u32, ymax: u32) -> Image<ColorRgb> {
        let new_w = xmax.saturating_sub(xmin);
        let new_h = ymax.saturating_sub(ymin);
        let mut out = Image::with_size(new_w, new_h, self.origin);
        for y in 0..new_h {
            let src_row = self.row(ymin + y);
            let dst_start = (y as usize) * (new_w as usize);
            out.data[dst_start..dst_start + new_w as usize]
                .clone_from_slice(&src_row[xmin as usize..(xmin + new_w) as usize]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_preserves_invariant() {
        let mut img: Image<ColorRgb> = Image::new(OriginFormat::Synthetic);
        img.resize(4, 3);
        assert_eq!(img.data().len(), 12);
        img.resize(2, 2);
        assert_eq!(img.data().len(), 4);
    }

    #[test]
    fn crop_extracts_expected_subregion() {
        let mut img: Image<ColorRgb> = Image::with_size(4, 2, OriginFormat::Synthetic);
        for (i, px) in img.data_mut().iter_mut().enumerate() {
            *px = ColorRgb::new(i as u8, 0, 0);
        }
        let cropped = img.cropped_view(1, 3, 0, 2);
        assert_eq!(cropped.width(), 2);
        assert_eq!(cropped.height(), 2);
        assert_eq!(cropped.get(0, 0).unwrap().r, 1);
        assert_eq!(cropped.get(1, 1).unwrap().r, 6);
    }
}
