// Derived from code in LLVM, which is:
// Part of the LLVM Project, under the Apache License v2.0 with LLVM Exceptions.
// See https://llvm.org/LICENSE.txt for license information.
// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! The symbol-to-member index ("armap") in its binary encodings.

use std::io::Write;

use log::debug;
use object::Endianness;

use crate::alignment::offset_to_alignment;
use crate::error::{Error, Result};

/// One entry of a [`SymbolMap`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ArchiveSymbol<'a> {
    name: &'a [u8],
    file_offset: u64,
}

impl<'a> ArchiveSymbol<'a> {
    pub fn name(&self) -> &'a [u8] {
        self.name
    }

    /// Offset of the header of the member that defines this symbol.
    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Carsym {
    name_start: usize,
    name_end: usize,
    file_offset: u64,
}

/// The symbol index of an archive, in on-disk order. Names live in one
/// string blob owned by the map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SymbolMap {
    strings: Vec<u8>,
    symbols: Vec<Carsym>,
}

impl SymbolMap {
    fn with_strings(strings: &[u8]) -> SymbolMap {
        SymbolMap {
            strings: strings.to_vec(),
            symbols: Vec::new(),
        }
    }

    /// Adds the NUL-terminated name starting at `name_start` in the blob.
    fn push(&mut self, name_start: usize, file_offset: u64) -> Result<()> {
        if name_start >= self.strings.len() {
            return Err(Error::malformed(format!(
                "symbol name offset {} outside string table",
                name_start
            )));
        }
        let name_end = self.strings[name_start..]
            .iter()
            .position(|&c| c == 0)
            .map_or(self.strings.len(), |len| name_start + len);
        self.symbols.push(Carsym {
            name_start,
            name_end,
            file_offset,
        });
        Ok(())
    }

    /// Adds the entries of `other` after this map's entries.
    pub(crate) fn append(&mut self, other: SymbolMap) {
        let base = self.strings.len();
        self.strings.extend_from_slice(&other.strings);
        self.symbols
            .extend(other.symbols.into_iter().map(|sym| Carsym {
                name_start: sym.name_start + base,
                name_end: sym.name_end + base,
                file_offset: sym.file_offset,
            }));
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<ArchiveSymbol<'_>> {
        self.symbols.get(index).map(|sym| ArchiveSymbol {
            name: &self.strings[sym.name_start..sym.name_end],
            file_offset: sym.file_offset,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = ArchiveSymbol<'_>> + '_ {
        (0..self.len()).filter_map(move |index| self.get(index))
    }
}

/// A symbol map entry whose member offset has been resolved.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ArmapEntry {
    /// Offset of the name in the string table being written.
    pub(crate) string_offset: u64,
    /// Offset of the defining member's header.
    pub(crate) member_offset: u64,
}

/// One binary encoding of the symbol map member's payload.
pub(crate) trait SymbolMapCodec {
    fn decode(&self, payload: &[u8]) -> Result<SymbolMap>;

    /// Returns the payload size, including trailing padding, and the
    /// padding.
    fn payload_size(&self, num_syms: u64, string_table_size: u64) -> (u64, u64);

    fn encode(
        &self,
        w: &mut dyn Write,
        entries: &[ArmapEntry],
        string_table: &[u8],
    ) -> Result<()>;
}

fn flip(endian: Endianness) -> Endianness {
    match endian {
        Endianness::Little => Endianness::Big,
        Endianness::Big => Endianness::Little,
    }
}

fn read_u16(endian: Endianness, bytes: &[u8], offset: usize) -> Option<u64> {
    let b: [u8; 2] = bytes.get(offset..offset + 2)?.try_into().ok()?;
    Some(u64::from(match endian {
        Endianness::Little => u16::from_le_bytes(b),
        Endianness::Big => u16::from_be_bytes(b),
    }))
}

fn read_u32(endian: Endianness, bytes: &[u8], offset: usize) -> Option<u64> {
    let b: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
    Some(u64::from(match endian {
        Endianness::Little => u32::from_le_bytes(b),
        Endianness::Big => u32::from_be_bytes(b),
    }))
}

fn read_u64_be(bytes: &[u8], offset: usize) -> Option<u64> {
    let b: [u8; 8] = bytes.get(offset..offset + 8)?.try_into().ok()?;
    Some(u64::from_be_bytes(b))
}

fn truncated() -> Error {
    Error::malformed("symbol map is truncated")
}

fn print_u16(w: &mut dyn Write, endian: Endianness, val: u64) -> Result<()> {
    let val = u16::try_from(val).map_err(|_| Error::MemberTooBig("symbol map".to_string()))?;
    w.write_all(&match endian {
        Endianness::Little => val.to_le_bytes(),
        Endianness::Big => val.to_be_bytes(),
    })?;
    Ok(())
}

/// The format only has 4 bytes for offsets, so the archive cannot grow past
/// 4GiB while it has a 32-bit symbol map.
fn print_u32(w: &mut dyn Write, endian: Endianness, val: u64) -> Result<()> {
    let val =
        u32::try_from(val).map_err(|_| Error::MemberTooBig(format!("at offset {}", val)))?;
    w.write_all(&match endian {
        Endianness::Little => val.to_le_bytes(),
        Endianness::Big => val.to_be_bytes(),
    })?;
    Ok(())
}

const BSD_SYMDEF_SIZE: u64 = 8;

/// `__.SYMDEF`: a byte count, `(string offset, member offset)` pairs, the
/// string table size, then the strings. Integers use the target byte order.
#[derive(Copy, Clone, Debug)]
pub(crate) struct BsdSymbolMap {
    pub(crate) endian: Endianness,
    /// Two-byte symbol count followed by the string table and then the
    /// pairs, as written by one historical host.
    pub(crate) short_count: bool,
}

impl BsdSymbolMap {
    fn count_size(&self) -> usize {
        if self.short_count {
            2
        } else {
            4
        }
    }

    fn symdef_count(&self, endian: Endianness, payload: &[u8]) -> Option<u64> {
        if self.short_count {
            read_u16(endian, payload, 0)
        } else {
            read_u32(endian, payload, 0).map(|bytes| bytes / BSD_SYMDEF_SIZE)
        }
    }

    /// A count that claims more pairs than the payload holds probably means
    /// the map was written with the other byte order. Try that once.
    fn choose_endian(&self, payload: &[u8]) -> Result<Endianness> {
        let available = (payload.len() - self.count_size()) as u64;
        let plausible = |endian| {
            self.symdef_count(endian, payload)
                .is_some_and(|count| count * BSD_SYMDEF_SIZE <= available)
        };
        if plausible(self.endian) {
            return Ok(self.endian);
        }
        let flipped = flip(self.endian);
        if plausible(flipped) {
            debug!("BSD symbol map count implausible, reading as {:?}", flipped);
            return Ok(flipped);
        }
        Err(Error::WrongFormat)
    }

    fn decode_standard(&self, endian: Endianness, payload: &[u8]) -> Result<SymbolMap> {
        let byte_count = read_u32(endian, payload, 0).ok_or_else(truncated)?;
        let count = byte_count / BSD_SYMDEF_SIZE;
        let string_size_at = 4 + byte_count as usize;
        let string_size = read_u32(endian, payload, string_size_at).ok_or_else(truncated)?;
        let strings_at = string_size_at + 4;
        let strings_end = payload
            .len()
            .min(strings_at.saturating_add(string_size as usize));
        let mut map = SymbolMap::with_strings(&payload[strings_at..strings_end]);
        for i in 0..count as usize {
            let at = 4 + i * BSD_SYMDEF_SIZE as usize;
            let name = read_u32(endian, payload, at).ok_or_else(truncated)?;
            let file_offset = read_u32(endian, payload, at + 4).ok_or_else(truncated)?;
            map.push(name as usize, file_offset)?;
        }
        Ok(map)
    }

    fn decode_short_count(&self, endian: Endianness, payload: &[u8]) -> Result<SymbolMap> {
        let count = read_u16(endian, payload, 0).ok_or_else(truncated)?;
        let string_size = read_u32(endian, payload, 2).ok_or_else(truncated)? as usize;
        let strings_at = 6;
        let pairs_at = strings_at + string_size;
        if pairs_at as u64 + count * BSD_SYMDEF_SIZE > payload.len() as u64 {
            return Err(truncated());
        }
        let mut map = SymbolMap::with_strings(&payload[strings_at..pairs_at]);
        for i in 0..count as usize {
            let at = pairs_at + i * BSD_SYMDEF_SIZE as usize;
            let name = read_u32(endian, payload, at).ok_or_else(truncated)?;
            let file_offset = read_u32(endian, payload, at + 4).ok_or_else(truncated)?;
            map.push(name as usize, file_offset)?;
        }
        Ok(map)
    }
}

impl SymbolMapCodec for BsdSymbolMap {
    fn decode(&self, payload: &[u8]) -> Result<SymbolMap> {
        if payload.len() < self.count_size() + 4 {
            return Err(truncated());
        }
        let endian = self.choose_endian(payload)?;
        if self.short_count {
            self.decode_short_count(endian, payload)
        } else {
            self.decode_standard(endian, payload)
        }
    }

    fn payload_size(&self, num_syms: u64, string_table_size: u64) -> (u64, u64) {
        let pad = offset_to_alignment(string_table_size, 2);
        let size = self.count_size() as u64 + num_syms * BSD_SYMDEF_SIZE + 4 + string_table_size;
        (size + pad, pad)
    }

    fn encode(
        &self,
        w: &mut dyn Write,
        entries: &[ArmapEntry],
        string_table: &[u8],
    ) -> Result<()> {
        let pad = offset_to_alignment(string_table.len() as u64, 2);
        let string_size = string_table.len() as u64 + pad;
        let write_pairs = |w: &mut dyn Write| -> Result<()> {
            for entry in entries {
                print_u32(w, self.endian, entry.string_offset)?;
                print_u32(w, self.endian, entry.member_offset)?;
            }
            Ok(())
        };
        let write_strings = |w: &mut dyn Write| -> Result<()> {
            print_u32(w, self.endian, string_size)?;
            w.write_all(string_table)?;
            // Binary map, so padded with NUL rather than newline.
            if pad != 0 {
                w.write_all(&[0])?;
            }
            Ok(())
        };

        if self.short_count {
            print_u16(w, self.endian, entries.len() as u64)?;
            write_strings(w)?;
            write_pairs(w)
        } else {
            print_u32(w, self.endian, entries.len() as u64 * BSD_SYMDEF_SIZE)?;
            write_pairs(w)?;
            write_strings(w)
        }
    }
}

/// Derived string table sizes above this are treated as a sign that the
/// count was written little-endian.
const COFF_IMPLAUSIBLE_STRING_SIZE: u64 = 0xfffff;

/// Reads names packed back to back after the offsets, bounded by the end of
/// the payload.
fn decode_packed_names(
    payload: &[u8],
    strings_at: usize,
    offsets: impl Iterator<Item = u64>,
) -> Result<SymbolMap> {
    let mut map = SymbolMap::with_strings(&payload[strings_at..]);
    let mut name_start = 0;
    for file_offset in offsets {
        if name_start >= map.strings.len() {
            return Err(Error::malformed("symbol map names run past its end"));
        }
        map.push(name_start, file_offset)?;
        name_start = map.symbols[map.symbols.len() - 1].name_end + 1;
    }
    Ok(map)
}

/// `/`: a symbol count, one member offset per symbol, then the names.
/// Integers are big-endian whatever the target.
#[derive(Copy, Clone, Debug)]
pub(crate) struct CoffSymbolMap {
    /// Re-read an implausible count as little-endian. Only some toolchains
    /// for one little-endian architecture family wrote maps that way.
    pub(crate) little_endian_fallback: bool,
}

impl SymbolMapCodec for CoffSymbolMap {
    fn decode(&self, payload: &[u8]) -> Result<SymbolMap> {
        let len = payload.len() as u64;
        let string_size = |count: u64| len.checked_sub(4 + 4 * count);

        let mut endian = Endianness::Big;
        let mut count = read_u32(endian, payload, 0).ok_or_else(truncated)?;
        if self.little_endian_fallback
            && string_size(count).map_or(true, |size| size > COFF_IMPLAUSIBLE_STRING_SIZE)
        {
            debug!("COFF symbol map count implausible, reading as little-endian");
            endian = Endianness::Little;
            count = read_u32(endian, payload, 0).ok_or_else(truncated)?;
        }
        if string_size(count).is_none() {
            return Err(Error::malformed(format!(
                "symbol count {} inconsistent with symbol map size {}",
                count, len
            )));
        }

        let offsets = (0..count as usize).map(|i| read_u32(endian, payload, 4 + 4 * i).unwrap_or(0));
        decode_packed_names(payload, 4 + 4 * count as usize, offsets)
    }

    fn payload_size(&self, num_syms: u64, string_table_size: u64) -> (u64, u64) {
        let size = 4 + num_syms * 4 + string_table_size;
        let pad = offset_to_alignment(size, 2);
        (size + pad, pad)
    }

    fn encode(
        &self,
        w: &mut dyn Write,
        entries: &[ArmapEntry],
        string_table: &[u8],
    ) -> Result<()> {
        let (_, pad) = self.payload_size(entries.len() as u64, string_table.len() as u64);
        print_u32(w, Endianness::Big, entries.len() as u64)?;
        for entry in entries {
            print_u32(w, Endianness::Big, entry.member_offset)?;
        }
        w.write_all(string_table)?;
        if pad != 0 {
            w.write_all(&[0])?;
        }
        Ok(())
    }
}

/// XCOFF global symbol table: like the COFF map, with 4-byte (small, and
/// big 32-bit) or 8-byte (big 64-bit) big-endian integers.
#[derive(Copy, Clone, Debug)]
pub(crate) struct XcoffSymbolMap {
    pub(crate) offset_size: u64,
}

impl XcoffSymbolMap {
    fn read(&self, payload: &[u8], offset: usize) -> Option<u64> {
        if self.offset_size == 8 {
            read_u64_be(payload, offset)
        } else {
            read_u32(Endianness::Big, payload, offset)
        }
    }
}

impl SymbolMapCodec for XcoffSymbolMap {
    fn decode(&self, payload: &[u8]) -> Result<SymbolMap> {
        let width = self.offset_size as usize;
        let count = self.read(payload, 0).ok_or_else(truncated)?;
        let strings_at = count
            .checked_add(1)
            .and_then(|n| n.checked_mul(self.offset_size))
            .filter(|&end| end <= payload.len() as u64)
            .ok_or_else(|| {
                Error::malformed(format!(
                    "symbol count {} inconsistent with symbol table size {}",
                    count,
                    payload.len()
                ))
            })?;
        let offsets = (0..count as usize).map(|i| self.read(payload, width * (i + 1)).unwrap_or(0));
        decode_packed_names(payload, strings_at as usize, offsets)
    }

    fn payload_size(&self, num_syms: u64, string_table_size: u64) -> (u64, u64) {
        // Padding goes between tables rather than inside them.
        ((num_syms + 1) * self.offset_size + string_table_size, 0)
    }

    fn encode(
        &self,
        w: &mut dyn Write,
        entries: &[ArmapEntry],
        string_table: &[u8],
    ) -> Result<()> {
        let print = |w: &mut dyn Write, val: u64| -> Result<()> {
            if self.offset_size == 8 {
                w.write_all(&val.to_be_bytes())?;
                Ok(())
            } else {
                print_u32(w, Endianness::Big, val)
            }
        };
        print(w, entries.len() as u64)?;
        for entry in entries {
            print(w, entry.member_offset)?;
        }
        w.write_all(string_table)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(offsets: &[(u64, u64)]) -> Vec<ArmapEntry> {
        offsets
            .iter()
            .map(|&(string_offset, member_offset)| ArmapEntry {
                string_offset,
                member_offset,
            })
            .collect()
    }

    fn names(map: &SymbolMap) -> Vec<(&[u8], u64)> {
        map.iter().map(|s| (s.name(), s.file_offset())).collect()
    }

    #[test]
    fn bsd_round_trip_both_layouts() {
        let strings = b"foo\0bar\0";
        for short_count in [false, true] {
            let codec = BsdSymbolMap {
                endian: Endianness::Little,
                short_count,
            };
            let mut out = Vec::new();
            codec
                .encode(&mut out, &entries(&[(0, 68), (4, 68)]), strings)
                .unwrap();
            assert_eq!(out.len() as u64, codec.payload_size(2, 8).0);
            let map = codec.decode(&out).unwrap();
            assert_eq!(names(&map), vec![(&b"foo"[..], 68), (&b"bar"[..], 68)]);
        }
    }

    #[test]
    fn bsd_retries_with_flipped_byte_order() {
        let writer = BsdSymbolMap {
            endian: Endianness::Big,
            short_count: false,
        };
        let mut out = Vec::new();
        writer
            .encode(&mut out, &entries(&[(0, 100)]), b"sym\0")
            .unwrap();

        let reader = BsdSymbolMap {
            endian: Endianness::Little,
            short_count: false,
        };
        let map = reader.decode(&out).unwrap();
        assert_eq!(names(&map), vec![(&b"sym"[..], 100)]);

        // Implausible in either byte order.
        let mut bogus = vec![0xff, 0xff, 0xff, 0x7f];
        bogus.extend_from_slice(&[0; 12]);
        assert!(matches!(reader.decode(&bogus), Err(Error::WrongFormat)));
    }

    #[test]
    fn bsd_rejects_name_outside_strings() {
        let codec = BsdSymbolMap {
            endian: Endianness::Little,
            short_count: false,
        };
        let mut out = Vec::new();
        codec
            .encode(&mut out, &entries(&[(40, 100)]), b"sym\0")
            .unwrap();
        assert!(codec.decode(&out).unwrap_err().is_malformed());
    }

    #[test]
    fn coff_is_big_endian_with_optional_little_endian_fallback() {
        let codec = CoffSymbolMap {
            little_endian_fallback: false,
        };
        let mut out = Vec::new();
        codec
            .encode(&mut out, &entries(&[(0, 8), (6, 200)]), b"alpha\0beta\0")
            .unwrap();
        assert_eq!(&out[..4], &[0, 0, 0, 2]);
        assert_eq!(out.len() % 2, 0);
        let map = codec.decode(&out).unwrap();
        assert_eq!(names(&map), vec![(&b"alpha"[..], 8), (&b"beta"[..], 200)]);

        let mut little = Vec::new();
        little.extend_from_slice(&1u32.to_le_bytes());
        little.extend_from_slice(&72u32.to_le_bytes());
        little.extend_from_slice(b"le\0\0");
        assert!(codec.decode(&little).unwrap_err().is_malformed());
        let fallback = CoffSymbolMap {
            little_endian_fallback: true,
        };
        let map = fallback.decode(&little).unwrap();
        assert_eq!(names(&map), vec![(&b"le"[..], 72)]);
    }

    #[test]
    fn xcoff_64_bit_table() {
        let codec = XcoffSymbolMap { offset_size: 8 };
        let mut out = Vec::new();
        codec
            .encode(&mut out, &entries(&[(0, 128)]), b"x64\0")
            .unwrap();
        assert_eq!(out.len() as u64, codec.payload_size(1, 4).0);
        let map = codec.decode(&out).unwrap();
        assert_eq!(names(&map), vec![(&b"x64"[..], 128)]);
    }

    #[test]
    fn empty_map_is_not_absent() {
        let codec = CoffSymbolMap {
            little_endian_fallback: false,
        };
        let mut out = Vec::new();
        codec.encode(&mut out, &[], b"").unwrap();
        let map = codec.decode(&out).unwrap();
        assert!(map.is_empty());
    }
}
