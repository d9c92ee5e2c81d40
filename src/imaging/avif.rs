//! AVIF decoding: `avif-parse` for the ISO-BMFF container, `rav1d` for the
//! AV1 payload, and a BT.601 YUV→RGB conversion.
//!
//! The `image` crate's `"avif"` feature only provides the encoder (rav1e);
//! its decoder needs the C library dav1d. `rav1d` is the pure Rust port.

use super::backend::{BackendError, Dimensions};
use image::DynamicImage;
use std::io::Cursor;
use std::ptr::NonNull;

fn parse(data: &[u8]) -> Result<avif_parse::AvifData, BackendError> {
    avif_parse::read_avif(&mut Cursor::new(data))
        .map_err(|e| BackendError::Decode(format!("invalid AVIF container: {e:?}")))
}

/// Dimensions from the container metadata alone, without decoding AV1.
pub fn identify_avif(data: &[u8]) -> Result<Dimensions, BackendError> {
    let avif = parse(data)?;
    let meta = avif
        .primary_item_metadata()
        .map_err(|e| BackendError::Decode(format!("invalid AVIF metadata: {e:?}")))?;
    Ok(Dimensions {
        width: meta.max_frame_width.get(),
        height: meta.max_frame_height.get(),
    })
}

/// Decode an AVIF buffer to RGB8, or RGBA8 when it carries an alpha item.
pub fn decode_avif(data: &[u8]) -> Result<DynamicImage, BackendError> {
    let avif = parse(data)?;
    let (width, height, rgb) = decode_av1(&avif.primary_item, picture_to_rgb)?;

    let Some(alpha_item) = avif.alpha_item.as_deref() else {
        return image::RgbImage::from_raw(width, height, rgb)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| BackendError::Decode("decoded AVIF buffer has the wrong size".into()));
    };

    let (alpha_width, alpha_height, alpha) = decode_av1(alpha_item, picture_to_alpha)?;
    if (alpha_width, alpha_height) != (width, height) {
        return Err(BackendError::Decode(format!(
            "AVIF alpha plane is {alpha_width}x{alpha_height}, color is {width}x{height}"
        )));
    }

    let rgba = interleave_alpha(&rgb, &alpha, avif.premultiplied_alpha);
    image::RgbaImage::from_raw(width, height, rgba)
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| BackendError::Decode("decoded AVIF buffer has the wrong size".into()))
}

/// Merge RGB and alpha planes, undoing premultiplication when flagged.
fn interleave_alpha(rgb: &[u8], alpha: &[u8], premultiplied: bool) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(alpha.len() * 4);
    for (pixel, &a) in rgb.chunks_exact(3).zip(alpha) {
        for &c in pixel {
            let c = if premultiplied && a > 0 {
                (c as u32 * 255 / a as u32).min(255) as u8
            } else {
                c
            };
            rgba.push(c);
        }
        rgba.push(a);
    }
    rgba
}

/// Decode one AV1 payload with rav1d and hand the picture to `convert`.
fn decode_av1<T>(
    av1_bytes: &[u8],
    convert: impl FnOnce(&rav1d::include::dav1d::picture::Dav1dPicture) -> Result<T, BackendError>,
) -> Result<T, BackendError> {
    use rav1d::include::dav1d::dav1d::Dav1dSettings;
    use rav1d::src::lib::{dav1d_close, dav1d_default_settings, dav1d_open};

    let mut settings = std::mem::MaybeUninit::<Dav1dSettings>::uninit();
    let settings_ptr = NonNull::new(settings.as_mut_ptr())
        .ok_or_else(|| BackendError::Decode("rav1d settings allocation failed".into()))?;
    unsafe { dav1d_default_settings(settings_ptr) };
    let mut settings = unsafe { settings.assume_init() };
    settings.n_threads = 1;
    settings.max_frame_delay = 1;

    let mut ctx = None;
    let rc = unsafe { dav1d_open(NonNull::new(&mut ctx), NonNull::new(&mut settings)) };
    if rc.0 != 0 {
        return Err(BackendError::Decode(format!("rav1d open failed ({})", rc.0)));
    }

    // Every path below returns through here so the context is closed once.
    let result = (|| {
        use rav1d::include::dav1d::data::Dav1dData;
        use rav1d::include::dav1d::picture::Dav1dPicture;
        use rav1d::src::lib::{
            dav1d_data_create, dav1d_data_unref, dav1d_get_picture, dav1d_picture_unref,
            dav1d_send_data,
        };

        let mut packet = Dav1dData::default();
        let buf = unsafe { dav1d_data_create(NonNull::new(&mut packet), av1_bytes.len()) };
        if buf.is_null() {
            return Err(BackendError::Decode("rav1d data_create failed".into()));
        }
        unsafe { std::ptr::copy_nonoverlapping(av1_bytes.as_ptr(), buf, av1_bytes.len()) };

        let rc = unsafe { dav1d_send_data(ctx, NonNull::new(&mut packet)) };
        if rc.0 != 0 {
            unsafe { dav1d_data_unref(NonNull::new(&mut packet)) };
            return Err(BackendError::Decode(format!("rav1d send_data failed ({})", rc.0)));
        }

        let mut pic: Dav1dPicture = unsafe { std::mem::zeroed() };
        let rc = unsafe { dav1d_get_picture(ctx, NonNull::new(&mut pic)) };
        if rc.0 != 0 {
            return Err(BackendError::Decode(format!("rav1d get_picture failed ({})", rc.0)));
        }

        let converted = convert(&pic);
        unsafe { dav1d_picture_unref(NonNull::new(&mut pic)) };
        converted
    })();

    unsafe { dav1d_close(NonNull::new(&mut ctx)) };

    result
}

fn plane_ptr(
    pic: &rav1d::include::dav1d::picture::Dav1dPicture,
    i: usize,
) -> Result<*const u8, BackendError> {
    pic.data[i]
        .map(|p| p.as_ptr() as *const u8)
        .ok_or_else(|| BackendError::Decode(format!("AVIF picture missing plane {i}")))
}

/// Copy a decoded picture out into owned interleaved RGB8 samples.
fn picture_to_rgb(
    pic: &rav1d::include::dav1d::picture::Dav1dPicture,
) -> Result<(u32, u32, Vec<u8>), BackendError> {
    use rav1d::include::dav1d::headers::{
        DAV1D_PIXEL_LAYOUT_I400, DAV1D_PIXEL_LAYOUT_I420, DAV1D_PIXEL_LAYOUT_I422,
        DAV1D_PIXEL_LAYOUT_I444,
    };

    let width = pic.p.w as u32;
    let height = pic.p.h as u32;
    let layout = pic.p.layout;

    let subsampling = match layout {
        DAV1D_PIXEL_LAYOUT_I400 => None,
        DAV1D_PIXEL_LAYOUT_I420 => Some((true, true)),
        DAV1D_PIXEL_LAYOUT_I422 => Some((true, false)),
        DAV1D_PIXEL_LAYOUT_I444 => Some((false, false)),
        _ => {
            return Err(BackendError::Decode(format!(
                "unsupported AVIF pixel layout: {layout}"
            )));
        }
    };

    let source = PlaneSource {
        y: plane_ptr(pic, 0)?,
        uv: match subsampling {
            Some(ss) => Some((plane_ptr(pic, 1)?, plane_ptr(pic, 2)?, ss)),
            None => None,
        },
        y_stride: pic.stride[0],
        uv_stride: pic.stride[1],
        bpc: pic.p.bpc as u32,
    };

    Ok((width, height, source.to_rgb(width, height)))
}

/// Copy the luma plane of an alpha picture out as 8-bit alpha samples.
fn picture_to_alpha(
    pic: &rav1d::include::dav1d::picture::Dav1dPicture,
) -> Result<(u32, u32, Vec<u8>), BackendError> {
    let width = pic.p.w as u32;
    let height = pic.p.h as u32;
    let source = PlaneSource {
        y: plane_ptr(pic, 0)?,
        uv: None,
        y_stride: pic.stride[0],
        uv_stride: 0,
        bpc: pic.p.bpc as u32,
    };
    Ok((width, height, source.to_luma(width, height)))
}

/// Raw plane pointers borrowed from a live `Dav1dPicture`.
struct PlaneSource {
    y: *const u8,
    /// Cb, Cr and (horizontal, vertical) chroma subsampling; `None` for monochrome.
    uv: Option<(*const u8, *const u8, (bool, bool))>,
    y_stride: isize,
    uv_stride: isize,
    bpc: u32,
}

impl PlaneSource {
    fn scale(&self) -> f32 {
        255.0 / ((1u32 << self.bpc) - 1) as f32
    }

    /// The luma plane alone, narrowed to 8 bits.
    fn to_luma(&self, width: u32, height: u32) -> Vec<u8> {
        let scale = self.scale();
        let mut luma = Vec::with_capacity(width as usize * height as usize);
        for row in 0..height {
            for col in 0..width {
                let y = read_sample(self.y, self.y_stride, col, row, self.bpc);
                luma.push((y * scale).clamp(0.0, 255.0) as u8);
            }
        }
        luma
    }

    /// Convert to interleaved RGB8 using BT.601 coefficients.
    fn to_rgb(&self, width: u32, height: u32) -> Vec<u8> {
        let center = (1u32 << (self.bpc - 1)) as f32;
        let scale = self.scale();

        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        for row in 0..height {
            for col in 0..width {
                let y = read_sample(self.y, self.y_stride, col, row, self.bpc);

                let (r, g, b) = match self.uv {
                    None => (y, y, y),
                    Some((u_ptr, v_ptr, (ss_x, ss_y))) => {
                        let cx = if ss_x { col / 2 } else { col };
                        let cy = if ss_y { row / 2 } else { row };
                        let cb = read_sample(u_ptr, self.uv_stride, cx, cy, self.bpc) - center;
                        let cr = read_sample(v_ptr, self.uv_stride, cx, cy, self.bpc) - center;
                        (
                            y + 1.402 * cr,
                            y - 0.344136 * cb - 0.714136 * cr,
                            y + 1.772 * cb,
                        )
                    }
                };

                for channel in [r, g, b] {
                    rgb.push((channel * scale).clamp(0.0, 255.0) as u8);
                }
            }
        }
        rgb
    }
}

/// Read one sample, handling both 8-bit and 16-bit storage.
#[inline]
fn read_sample(ptr: *const u8, stride: isize, x: u32, y: u32, bpc: u32) -> f32 {
    if bpc <= 8 {
        (unsafe { *ptr.offset(y as isize * stride + x as isize) }) as f32
    } else {
        // 10-bit and 12-bit are stored as u16
        let byte_offset = y as isize * stride + x as isize * 2;
        (unsafe { (ptr.offset(byte_offset) as *const u16).read_unaligned() }) as f32
    }
}
