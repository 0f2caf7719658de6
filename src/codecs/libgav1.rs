// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![allow(clippy::unnecessary_cast)]

use crate::codecs::Decoder;
use crate::codecs::DecoderConfig;
use crate::decoder::CodecChoice;
use crate::decoder::GridImageHelper;
use crate::image::Image;
use crate::image::YuvRange;
use crate::utils::pixels::*;
use crate::*;

use libgav1_sys::bindings::*;

use std::mem::MaybeUninit;

#[derive(Default)]
pub struct Libgav1 {
    decoder: Option<*mut Libgav1Decoder>,
    config: Option<DecoderConfig>,
}

impl Libgav1 {
    fn initialize_impl(&mut self) -> AvifResult<()> {
        if self.decoder.is_some() {
            return Ok(());
        }
        let config = self.config.unwrap_ref();
        let mut settings_uninit: MaybeUninit<Libgav1DecoderSettings> = MaybeUninit::uninit();
        // # Safety: Calling a C function with valid parameters.
        unsafe { Libgav1DecoderSettingsInitDefault(settings_uninit.as_mut_ptr()) };
        // # Safety: settings_uninit was initialized in the C function above.
        let mut settings = unsafe { settings_uninit.assume_init() };
        settings.threads = config.max_threads.max(1) as i32;
        settings.operating_point = config.operating_point as i32;
        settings.output_all_layers = if config.all_layers { 1 } else { 0 };
        let mut dec = MaybeUninit::uninit();
        // # Safety: Calling a C function with valid parameters.
        let ret = unsafe { Libgav1DecoderCreate(&settings, dec.as_mut_ptr()) };
        if ret != Libgav1StatusCode_kLibgav1StatusOk {
            return AvifError::unknown_error(format!("Libgav1DecoderCreate returned {ret}"));
        }
        // # Safety: dec was initialized in the C function above.
        self.decoder = Some(unsafe { dec.assume_init() });
        Ok(())
    }

    fn buffer_to_image(
        &self,
        buffer: &Libgav1DecoderBuffer,
        image: &mut Image,
        category: Category,
    ) -> AvifResult<()> {
        match category {
            Category::Alpha => {
                image.width = buffer.displayed_width[0] as u32;
                image.height = buffer.displayed_height[0] as u32;
                image.depth = buffer.bitdepth as u8;
                image.row_bytes[3] = buffer.stride[0] as u32;
                image.planes[3] = Some(Pixels::from_raw_pointer(
                    buffer.plane[0] as *mut u8,
                    image.depth as u32,
                    image.height,
                    image.row_bytes[3],
                )?);
                image.image_owns_planes[3] = false;
                image.yuv_range = if buffer.color_range
                    == Libgav1ColorRange_kLibgav1ColorRangeStudio
                {
                    YuvRange::Limited
                } else {
                    YuvRange::Full
                };
            }
            Category::Color => {
                image.width = buffer.displayed_width[0] as u32;
                image.height = buffer.displayed_height[0] as u32;
                image.depth = buffer.bitdepth as u8;
                image.yuv_format = match buffer.image_format {
                    Libgav1ImageFormat_kLibgav1ImageFormatMonochrome400 => PixelFormat::Yuv400,
                    Libgav1ImageFormat_kLibgav1ImageFormatYuv420 => PixelFormat::Yuv420,
                    Libgav1ImageFormat_kLibgav1ImageFormatYuv422 => PixelFormat::Yuv422,
                    Libgav1ImageFormat_kLibgav1ImageFormatYuv444 => PixelFormat::Yuv444,
                    _ => return AvifError::unknown_error("unknown libgav1 image format"),
                };
                image.yuv_range = if buffer.color_range
                    == Libgav1ColorRange_kLibgav1ColorRangeStudio
                {
                    YuvRange::Limited
                } else {
                    YuvRange::Full
                };
                image.chroma_sample_position = (buffer.chroma_sample_position as u32).into();
                image.color_primaries = (buffer.color_primary as u16).into();
                image.transfer_characteristics = (buffer.transfer_characteristics as u16).into();
                image.matrix_coefficients = (buffer.matrix_coefficients as u16).into();
                for plane in 0usize..image.yuv_format.plane_count() {
                    image.row_bytes[plane] = buffer.stride[plane] as u32;
                    image.planes[plane] = Some(Pixels::from_raw_pointer(
                        buffer.plane[plane] as *mut u8,
                        image.depth as u32,
                        image.height,
                        image.row_bytes[plane],
                    )?);
                    image.image_owns_planes[plane] = false;
                }
                if image.yuv_format == PixelFormat::Yuv400 {
                    image.clear_chroma_planes();
                }
            }
        }
        Ok(())
    }
}

impl Decoder for Libgav1 {
    fn codec(&self) -> CodecChoice {
        CodecChoice::Libgav1
    }

    fn initialize(&mut self, config: &DecoderConfig) -> AvifResult<()> {
        self.config = Some(config.clone());
        Ok(())
    }

    fn get_next_image(
        &mut self,
        av1_payload: &[u8],
        spatial_id: u8,
        image: &mut Image,
        category: Category,
    ) -> AvifResult<()> {
        if self.decoder.is_none() {
            self.initialize_impl()?;
        }
        let decoder = self.decoder.unwrap();
        // # Safety: Calling a C function with valid parameters.
        let ret = unsafe {
            Libgav1DecoderEnqueueFrame(
                decoder,
                av1_payload.as_ptr(),
                av1_payload.len(),
                0,
                std::ptr::null_mut(),
            )
        };
        if ret != Libgav1StatusCode_kLibgav1StatusOk {
            return AvifError::unknown_error(format!("Libgav1DecoderEnqueueFrame returned {ret}"));
        }
        let mut next_frame: *const Libgav1DecoderBuffer = std::ptr::null_mut();
        loop {
            // # Safety: Calling a C function with valid parameters.
            let ret = unsafe { Libgav1DecoderDequeueFrame(decoder, &mut next_frame) };
            if ret != Libgav1StatusCode_kLibgav1StatusOk {
                return AvifError::unknown_error(format!(
                    "Libgav1DecoderDequeueFrame returned {ret}"
                ));
            }
            // # Safety: next_frame was populated by the C function above when non-null.
            if !next_frame.is_null()
                && spatial_id != 0xFF
                && unsafe { (*next_frame).spatial_id as u8 } != spatial_id
            {
                next_frame = std::ptr::null_mut();
            } else {
                break;
            }
        }
        if next_frame.is_null() {
            return AvifError::unknown_error("libgav1 did not produce a frame");
        }
        // # Safety: next_frame was validated non-null above.
        self.buffer_to_image(unsafe { &*next_frame }, image, category)
    }

    fn get_next_image_grid(
        &mut self,
        _payloads: &[Vec<u8>],
        _spatial_id: u8,
        _grid_image_helper: &mut GridImageHelper,
    ) -> AvifResult<()> {
        AvifError::not_implemented()
    }
}

impl Drop for Libgav1 {
    fn drop(&mut self) {
        if let Some(decoder) = self.decoder {
            // # Safety: Calling a C function with a valid, owned pointer.
            unsafe { Libgav1DecoderDestroy(decoder) };
        }
    }
}
