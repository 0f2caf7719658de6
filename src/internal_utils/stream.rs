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

use crate::internal_utils::*;
use crate::parser::mp4box::BoxSize;

#[derive(Debug)]
pub struct IBitStream<'a> {
    pub data: &'a [u8],
    pub bit_offset: usize,
}

#[allow(dead_code)]
impl IBitStream<'_> {
    pub(crate) fn sub_stream(&mut self, num_bits: usize) -> AvifResult<IBitStream<'_>> {
        let start_byte_offset = self.bit_offset / 8;
        let start_bit_offset = self.bit_offset % 8;
        checked_incr!(self.bit_offset, num_bits);
        let end_byte_offset = self.bit_offset.div_ceil(8);
        Ok(IBitStream {
            data: &self.data[start_byte_offset..end_byte_offset],
            bit_offset: start_bit_offset,
        })
    }

    fn read_bit(&mut self) -> AvifResult<u8> {
        let byte_offset = self.bit_offset / 8;
        if byte_offset >= self.data.len() {
            return Err(AvifError::BmffParseFailed("Not enough bits".into()));
        }
        let byte = self.data[byte_offset];
        let shift = 7 - (self.bit_offset % 8);
        self.bit_offset += 1;
        Ok((byte >> shift) & 0x01)
    }

    pub(crate) fn read(&mut self, n: usize) -> AvifResult<u32> {
        assert!(n <= 32);
        let mut value: u32 = 0;
        for _i in 0..n {
            value <<= 1;
            value |= self.read_bit()? as u32;
        }
        Ok(value)
    }

    pub(crate) fn read_bool(&mut self) -> AvifResult<bool> {
        let bit = self.read_bit()?;
        Ok(bit == 1)
    }

    pub(crate) fn pad(&mut self) -> AvifResult<()> {
        let unaligned_bits = self.bit_offset % 8;
        if unaligned_bits != 0 && self.read(8 - unaligned_bits)? != 0 {
            return Err(AvifError::BmffParseFailed("Padding not set to 0".into()));
        }
        Ok(())
    }

    pub(crate) fn skip(&mut self, n: usize) -> AvifResult<()> {
        if checked_add!(self.bit_offset, n)? > checked_mul!(self.data.len(), 8)? {
            return Err(AvifError::BmffParseFailed("Not enough bytes".into()));
        }
        self.bit_offset += n;
        Ok(())
    }

    pub(crate) fn skip_uvlc(&mut self) -> AvifResult<()> {
        // See the section 4.10.3. uvlc() of the AV1 specification.
        let mut leading_zeros = 0u128; // leadingZeros
        while !self.read_bool()? {
            leading_zeros += 1;
        }
        if leading_zeros < 32 {
            self.skip(leading_zeros as usize)?; // f(leadingZeros) value;
        }
        Ok(())
    }

    pub(crate) fn remaining_bits(&self) -> AvifResult<usize> {
        checked_sub!(checked_mul!(self.data.len(), 8)?, self.bit_offset)
    }
}

#[derive(Debug)]
pub struct IStream<'a> {
    // The bytes to parse.
    pub data: &'a [u8],
    // The number of bytes read so far within self.data.
    pub offset: usize,
}

impl IStream<'_> {
    pub(crate) fn create(data: &[u8]) -> IStream<'_> {
        IStream { data, offset: 0 }
    }

    fn check(&self, size: usize) -> AvifResult<()> {
        if self.bytes_left()? < size {
            return Err(AvifError::BmffParseFailed("".into()));
        }
        Ok(())
    }

    pub(crate) fn sub_stream<'a>(&'a mut self, size: &BoxSize) -> AvifResult<IStream<'a>> {
        let offset = self.offset;
        checked_incr!(
            self.offset,
            match size {
                BoxSize::FixedSize(size) => {
                    self.check(*size)?;
                    *size
                }
                BoxSize::UntilEndOfStream => self.bytes_left()?,
            }
        );
        Ok(IStream {
            data: &self.data[offset..self.offset],
            offset: 0,
        })
    }

    pub(crate) fn sub_bit_stream(&mut self, num_bytes: usize) -> AvifResult<IBitStream<'_>> {
        self.check(num_bytes)?;
        let offset = self.offset;
        checked_incr!(self.offset, num_bytes);
        Ok(IBitStream {
            data: &self.data[offset..self.offset],
            bit_offset: 0,
        })
    }

    pub(crate) fn bytes_left(&self) -> AvifResult<usize> {
        if self.data.len() < self.offset {
            return Err(AvifError::UnknownError("".into()));
        }
        Ok(self.data.len() - self.offset)
    }

    pub(crate) fn has_bytes_left(&self) -> AvifResult<bool> {
        Ok(self.bytes_left()? > 0)
    }

    pub(crate) fn get_slice(&mut self, size: usize) -> AvifResult<&[u8]> {
        self.check(size)?;
        let offset_start = self.offset;
        checked_incr!(self.offset, size);
        Ok(&self.data[offset_start..offset_start + size])
    }

    pub(crate) fn get_immutable_vec(&self, size: usize) -> AvifResult<Vec<u8>> {
        self.check(size)?;
        Ok(self.data[self.offset..self.offset + size].to_vec())
    }

    fn get_vec(&mut self, size: usize) -> AvifResult<Vec<u8>> {
        Ok(self.get_slice(size)?.to_vec())
    }

    pub(crate) fn read_u8(&mut self) -> AvifResult<u8> {
        self.check(1)?;
        let value = self.data[self.offset];
        checked_incr!(self.offset, 1);
        Ok(value)
    }

    pub(crate) fn read_u16(&mut self) -> AvifResult<u16> {
        Ok(u16::from_be_bytes(self.get_slice(2)?.try_into().unwrap()))
    }

    pub(crate) fn read_u24(&mut self) -> AvifResult<u32> {
        Ok(self.read_uxx(3)? as u32)
    }

    pub(crate) fn read_u32(&mut self) -> AvifResult<u32> {
        Ok(u32::from_be_bytes(self.get_slice(4)?.try_into().unwrap()))
    }

    pub(crate) fn read_u64(&mut self) -> AvifResult<u64> {
        Ok(u64::from_be_bytes(self.get_slice(8)?.try_into().unwrap()))
    }

    pub(crate) fn read_i32(&mut self) -> AvifResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub(crate) fn skip_u32(&mut self) -> AvifResult<()> {
        self.skip(4)
    }

    pub(crate) fn skip_u64(&mut self) -> AvifResult<()> {
        self.skip(8)
    }

    pub(crate) fn read_fraction(&mut self) -> AvifResult<Fraction> {
        Ok(Fraction(self.read_i32()?, self.read_u32()?))
    }

    pub(crate) fn read_ufraction(&mut self) -> AvifResult<UFraction> {
        Ok(UFraction(self.read_u32()?, self.read_u32()?))
    }

    // Reads size characters of a non-null-terminated string.
    pub(crate) fn read_string(&mut self, size: usize) -> AvifResult<String> {
        Ok(String::from_utf8(self.get_vec(size)?).unwrap_or("".into()))
    }

    // Reads an xx-byte unsigner integer.
    pub(crate) fn read_uxx(&mut self, xx: u8) -> AvifResult<u64> {
        let n: usize = xx.into();
        if n == 0 {
            return Ok(0);
        }
        if n > 8 {
            return Err(AvifError::NotImplemented);
        }
        let mut out = [0; 8];
        let start = out.len() - n;
        out[start..].copy_from_slice(self.get_slice(n)?);
        Ok(u64::from_be_bytes(out))
    }

    // Reads a null-terminated string.
    pub(crate) fn read_c_string(&mut self) -> AvifResult<String> {
        self.check(1)?;
        let null_position = self.data[self.offset..]
            .iter()
            .position(|&x| x == b'\0')
            .ok_or(AvifError::BmffParseFailed("".into()))?;
        let range = self.offset..self.offset + null_position;
        self.offset += null_position + 1;
        Ok(String::from_utf8(self.data[range].to_vec()).unwrap_or("".into()))
    }

    pub(crate) fn read_version_and_flags(&mut self) -> AvifResult<(u8, u32)> {
        let version = self.read_u8()?;
        let flags = self.read_u24()?;
        Ok((version, flags))
    }

    pub(crate) fn read_and_enforce_version_and_flags(
        &mut self,
        enforced_version: u8,
    ) -> AvifResult<(u8, u32)> {
        let (version, flags) = self.read_version_and_flags()?;
        if version != enforced_version {
            return Err(AvifError::BmffParseFailed("".into()));
        }
        Ok((version, flags))
    }

    pub(crate) fn skip(&mut self, size: usize) -> AvifResult<()> {
        self.check(size)?;
        checked_incr!(self.offset, size);
        Ok(())
    }

    pub(crate) fn rewind(&mut self, size: usize) -> AvifResult<()> {
        checked_decr!(self.offset, size);
        Ok(())
    }

    pub(crate) fn read_uleb128(&mut self) -> AvifResult<u32> {
        // See the section 4.10.5. of the AV1 specification.
        let mut value: u64 = 0;
        for i in 0..8 {
            // leb128_byte contains 8 bits read from the bitstream.
            let leb128_byte = self.read_u8()?;
            // The bottom 7 bits are used to compute the variable value.
            value |= u64::from(leb128_byte & 0x7F) << (i * 7);
            // The most significant bit is used to indicate that there are more
            // bytes to be read.
            if (leb128_byte & 0x80) == 0 {
                // It is a requirement of bitstream conformance that the value
                // returned from the leb128 parsing process is less than or
                // equal to (1 << 32)-1.
                return u32_from_u64(value);
            }
        }
        // It is a requirement of bitstream conformance that the most
        // significant bit of leb128_byte is equal to 0 if i is equal to 7.
        Err(AvifError::BmffParseFailed(
            "uleb value did not terminate after 8 bytes".into(),
        ))
    }
}

#[cfg(feature = "encoder")]
#[derive(Default)]
pub struct OStream {
    // The bytes written so far.
    pub data: Vec<u8>,
    // If not zero, number of most significant bits already written in the last
    // byte of self.data.
    num_bits: u8,
    // The positions in self.data where are written the 4-byte sizes of the
    // boxes that were started but not yet finished.
    box_marker_offsets: Vec<usize>,
}

#[cfg(feature = "encoder")]
#[allow(dead_code)]
impl OStream {
    pub(crate) fn offset(&self) -> usize {
        assert_eq!(self.num_bits, 0);
        self.data.len()
    }

    pub(crate) fn try_reserve(&mut self, size: usize) -> AvifResult<()> {
        self.data.try_reserve(size).or(Err(AvifError::OutOfMemory))
    }

    pub(crate) fn write_bits(&mut self, value: u32, num_bits: u8) -> AvifResult<()> {
        if num_bits == 0 || num_bits > 31 {
            return Err(AvifError::UnknownError("".into()));
        }
        if value >= (1 << num_bits) {
            return Err(AvifError::UnknownError("".into()));
        }
        let mut num_remaining_bits = num_bits;
        while num_remaining_bits != 0 {
            if self.num_bits == 0 {
                self.write_u8(0)?;
            }
            let byte = self.data.last_mut().unwrap();
            // Number of bits among num_bits that can be written in the last byte of self.data.
            let num_written_bits = std::cmp::min(8 - self.num_bits, num_remaining_bits);
            // Write the most significant bits first (somewhat big endian).
            let written_bits = (value >> (num_remaining_bits - num_written_bits))
                & ((1u32 << num_written_bits) - 1);
            *byte |= (written_bits as u8) << (8 - self.num_bits - num_written_bits);
            num_remaining_bits -= num_written_bits;
            self.num_bits = (self.num_bits + num_written_bits) % 8;
        }
        Ok(())
    }

    pub(crate) fn pad(&mut self) -> AvifResult<()> {
        if self.num_bits != 0 {
            self.write_bits(0, 8 - self.num_bits)?;
            assert_eq!(self.num_bits, 0);
        }
        Ok(())
    }

    pub(crate) fn write_bool(&mut self, value: bool) -> AvifResult<()> {
        self.write_bits(if value { 1 } else { 0 }, 1)
    }

    pub(crate) fn write_u8(&mut self, value: u8) -> AvifResult<()> {
        assert_eq!(self.num_bits, 0);
        self.try_reserve(1)?;
        self.data.push(value);
        Ok(())
    }

    pub(crate) fn write_u16(&mut self, value: u16) -> AvifResult<()> {
        assert_eq!(self.num_bits, 0);
        self.try_reserve(2)?;
        self.data.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub(crate) fn write_u24(&mut self, value: u32) -> AvifResult<()> {
        assert_eq!(self.num_bits, 0);
        if value > 0xFFFFFF {
            return Err(AvifError::InvalidArgument);
        }
        self.try_reserve(3)?;
        self.data.extend_from_slice(&value.to_be_bytes()[1..]);
        Ok(())
    }

    pub(crate) fn write_u32(&mut self, value: u32) -> AvifResult<()> {
        assert_eq!(self.num_bits, 0);
        self.try_reserve(4)?;
        self.data.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub(crate) fn write_u32_at_offset(&mut self, value: u32, offset: usize) -> AvifResult<()> {
        assert_eq!(self.num_bits, 0);
        let range = offset..offset + 4;
        check_slice_range(self.data.len(), &range)?;
        self.data[range].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub(crate) fn write_u64(&mut self, value: u64) -> AvifResult<()> {
        assert_eq!(self.num_bits, 0);
        self.try_reserve(8)?;
        self.data.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub(crate) fn write_str(&mut self, value: &str) -> AvifResult<()> {
        assert_eq!(self.num_bits, 0);
        let bytes = value.as_bytes();
        self.try_reserve(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn write_str_with_nul(&mut self, value: &str) -> AvifResult<()> {
        assert_eq!(self.num_bits, 0);
        self.write_str(value)?;
        self.write_u8(0)?;
        Ok(())
    }

    pub(crate) fn write_string(&mut self, value: &String) -> AvifResult<()> {
        assert_eq!(self.num_bits, 0);
        let bytes = value.as_bytes();
        self.try_reserve(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn write_string_with_nul(&mut self, value: &String) -> AvifResult<()> {
        assert_eq!(self.num_bits, 0);
        self.write_string(value)?;
        self.write_u8(0)?;
        Ok(())
    }

    // Searches through existing data for the given slice starting at offset |start_offset| and
    // writes it to the stream if it does not exist already. Returns the offset in which the slice
    // was found or written to.
    pub(crate) fn write_slice_dedupe(
        &mut self,
        start_offset: usize,
        data: &[u8],
    ) -> AvifResult<usize> {
        Ok(
            match self.data[start_offset..]
                .windows(data.len())
                .position(|window| window == data)
            {
                Some(position) => start_offset + position,
                None => {
                    let offset = self.offset();
                    self.write_slice(data)?;
                    offset
                }
            },
        )
    }

    pub(crate) fn write_slice(&mut self, data: &[u8]) -> AvifResult<()> {
        assert_eq!(self.num_bits, 0);
        self.try_reserve(data.len())?;
        self.data.extend_from_slice(data);
        Ok(())
    }

    pub(crate) fn write_ufraction(&mut self, value: UFraction) -> AvifResult<()> {
        self.write_u32(value.0)?;
        self.write_u32(value.1)
    }

    fn write_i32(&mut self, value: i32) -> AvifResult<()> {
        self.write_u32(value as u32)
    }

    pub(crate) fn write_fraction(&mut self, value: Fraction) -> AvifResult<()> {
        self.write_i32(value.0)?;
        self.write_u32(value.1)
    }

    fn start_box_impl(
        &mut self,
        box_type: &str,
        version_and_flags: Option<(u8, u32)>,
    ) -> AvifResult<()> {
        assert_eq!(self.num_bits, 0);
        self.box_marker_offsets.push(self.offset());
        // 4 bytes for size to be filled out later.
        self.write_u32(0)?;
        self.write_str(box_type)?;
        if let Some((version, flags)) = version_and_flags {
            self.write_u8(version)?;
            self.write_u24(flags)?;
        }
        Ok(())
    }

    pub(crate) fn start_box(&mut self, box_type: &str) -> AvifResult<()> {
        self.start_box_impl(box_type, None)
    }

    pub(crate) fn start_full_box(
        &mut self,
        box_type: &str,
        version_and_flags: (u8, u32),
    ) -> AvifResult<()> {
        self.start_box_impl(box_type, Some(version_and_flags))
    }

    pub(crate) fn finish_box(&mut self) -> AvifResult<()> {
        assert_eq!(self.num_bits, 0);
        let offset = self
            .box_marker_offsets
            .pop()
            .ok_or(AvifError::UnknownError("".into()))?;
        let box_size = u32_from_usize(checked_sub!(self.offset(), offset)?)?;
        self.write_u32_at_offset(box_size, offset)?;
        Ok(())
    }
}
