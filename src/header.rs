// Derived from code in LLVM, which is:
// Part of the LLVM Project, under the Apache License v2.0 with LLVM Exceptions.
// See https://llvm.org/LICENSE.txt for license information.
// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::io::{self, Read, Write};
use std::str;

use crate::alignment::align_even;
use crate::archive::xcoff::{self, Layout};
use crate::archive::*;
use crate::error::{Error, Result};
use crate::name_table::ExtendedNameTable;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum HeaderFormat {
    Ar,
    Xcoff,
}

/// Decoded form of one on-disk member header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberHeader {
    format: HeaderFormat,
    raw: Vec<u8>,
    name: String,
    mtime: u64,
    uid: u32,
    gid: u32,
    mode: u32,
    parsed_size: u64,
    extra_size: u64,
    next_offset: u64,
    prev_offset: u64,
}

impl MemberHeader {
    /// The member's file name, resolved through the extended name table or
    /// the inline BSD name where needed.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last modification time in Unix time format.
    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Number of payload bytes following the header. For a 4.4BSD inline
    /// name this excludes the name bytes counted by the raw size field.
    pub fn size(&self) -> u64 {
        self.parsed_size
    }

    /// The fixed-size field block as read from the archive.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Total bytes between the start of the header and the payload.
    pub fn header_len(&self) -> u64 {
        self.raw.len() as u64 + self.extra_size
    }

    pub(crate) fn format(&self) -> HeaderFormat {
        self.format
    }

    /// XCOFF only: offset of the next member's header, zero otherwise.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// XCOFF only: offset of the previous member's header, zero otherwise.
    pub fn prev_offset(&self) -> u64 {
        self.prev_offset
    }
}

/// Decodes one member header at the current position of a stream.
pub(crate) trait HeaderCodec: Sync {
    /// Returns `Ok(None)` when the stream is at a clean end of file.
    fn decode(
        &self,
        r: &mut dyn Read,
        names: Option<&ExtendedNameTable>,
    ) -> Result<Option<MemberHeader>>;
}

/// Codec for the 60-byte header shared by the BSD and SVR4/COFF dialects.
pub(crate) struct ArHeaderCodec;

/// Codec for XCOFF small and big member headers.
pub(crate) struct XcoffHeaderCodec(pub(crate) &'static Layout);

/// Reads as many bytes as are available up to `buf.len()`, returning the
/// count. Only a real I/O failure is an error.
pub(crate) fn read_block(r: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Reads up to `len` bytes. The buffer grows with the data actually read,
/// so a huge claimed length in a corrupt header costs nothing up front.
pub(crate) fn read_up_to(r: &mut dyn Read, len: u64) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.take(len).read_to_end(&mut buf)?;
    Ok(buf)
}

pub(crate) fn parse_decimal(field_name: &str, bytes: &[u8]) -> Result<u64> {
    if let Ok(string) = str::from_utf8(bytes) {
        if let Ok(value) = string.trim().parse::<u64>() {
            return Ok(value);
        }
    }
    Err(Error::malformed(format!(
        "invalid {} field in member header ({:?})",
        field_name,
        String::from_utf8_lossy(bytes)
    )))
}

/// Informational fields are blank in some writers' symbol map headers and
/// hold -1 in others; neither is worth failing a read over.
fn parse_lenient(bytes: &[u8], radix: u32) -> u64 {
    str::from_utf8(bytes)
        .ok()
        .and_then(|s| u64::from_str_radix(s.trim(), radix).ok())
        .unwrap_or(0)
}

/// A leading `/`, or a leading space with no `/` anywhere in the field,
/// marks a reference into the extended name table.
pub(crate) fn refers_to_name_table(name_field: &[u8]) -> bool {
    match name_field.first() {
        Some(b'/') => true,
        Some(b' ') => !name_field[..AR_NAME_LEN.min(name_field.len())].contains(&b'/'),
        _ => false,
    }
}

pub(crate) fn is_bsd44_extended_name(name_field: &[u8]) -> bool {
    name_field.len() > 3 && name_field.starts_with(b"#1/") && name_field[3].is_ascii_digit()
}

/// The name ends at the first NUL, else the first `/`, else the first space.
/// SVR4 names may embed spaces, so `/` wins over space.
pub(crate) fn embedded_name(name_field: &[u8]) -> &[u8] {
    let field = &name_field[..AR_NAME_LEN.min(name_field.len())];
    let end = field
        .iter()
        .position(|&c| c == 0)
        .or_else(|| field.iter().position(|&c| c == b'/'))
        .or_else(|| field.iter().position(|&c| c == b' '))
        .unwrap_or(field.len());
    &field[..end]
}

impl HeaderCodec for ArHeaderCodec {
    fn decode(
        &self,
        r: &mut dyn Read,
        names: Option<&ExtendedNameTable>,
    ) -> Result<Option<MemberHeader>> {
        let mut raw = [0; AR_HDR_SIZE as usize];
        match read_block(r, &mut raw)? {
            0 => return Ok(None),
            n if n < raw.len() => return Err(Error::NoMoreArchivedFiles),
            _ => {}
        }
        if &raw[58..60] != ARFMAG {
            return Err(Error::malformed("member header trailer mismatch"));
        }
        let size = parse_decimal("size", &raw[AR_SIZE_RANGE])?;
        let name_field = &raw[..AR_NAME_LEN];

        let mut parsed_size = size;
        let mut extra_size = 0;
        let name = match names {
            Some(names) if refers_to_name_table(name_field) => names.resolve(&name_field[1..])?,
            _ if is_bsd44_extended_name(name_field) => {
                let name_len = parse_decimal("BSD name length", &name_field[3..])?;
                if name_len > size {
                    return Err(Error::malformed(format!(
                        "member size ({}) smaller than inline name length ({})",
                        size, name_len
                    )));
                }
                let mut name = read_up_to(r, name_len)?;
                if (name.len() as u64) < name_len {
                    return Err(Error::NoMoreArchivedFiles);
                }
                if let Some(nul) = name.iter().position(|&c| c == 0) {
                    name.truncate(nul);
                }
                parsed_size -= name_len;
                extra_size = name_len;
                String::from_utf8_lossy(&name).into_owned()
            }
            _ => String::from_utf8_lossy(embedded_name(name_field)).into_owned(),
        };

        Ok(Some(MemberHeader {
            format: HeaderFormat::Ar,
            name,
            mtime: parse_lenient(&raw[16..28], 10),
            uid: parse_lenient(&raw[28..34], 10) as u32,
            gid: parse_lenient(&raw[34..40], 10) as u32,
            mode: parse_lenient(&raw[40..48], 8) as u32,
            parsed_size,
            extra_size,
            next_offset: 0,
            prev_offset: 0,
            raw: raw.to_vec(),
        }))
    }
}

impl HeaderCodec for XcoffHeaderCodec {
    fn decode(
        &self,
        r: &mut dyn Read,
        _names: Option<&ExtendedNameTable>,
    ) -> Result<Option<MemberHeader>> {
        let layout = self.0;
        let fixed = layout.member_header_size() as usize;
        let mut raw = vec![0; fixed];
        match read_block(r, &mut raw)? {
            0 => return Ok(None),
            n if n < fixed => return Err(Error::NoMoreArchivedFiles),
            _ => {}
        }

        let w = layout.offset_width;
        let size = parse_decimal("size", &raw[..w])?;
        let next_offset = parse_decimal("next member offset", &raw[w..2 * w])?;
        let prev_offset = parse_decimal("previous member offset", &raw[2 * w..3 * w])?;
        let field = |index: usize| {
            let start = 3 * w + index * xcoff::FIELD_WIDTH;
            &raw[start..start + xcoff::FIELD_WIDTH]
        };
        let mtime = parse_lenient(field(0), 10);
        let uid = parse_lenient(field(1), 10) as u32;
        let gid = parse_lenient(field(2), 10) as u32;
        let mode = parse_lenient(field(3), 8) as u32;
        let name_len = parse_decimal("name length", &raw[fixed - xcoff::NAME_LEN_WIDTH..])?;

        // The name is padded to an even length and followed by the trailer.
        let tail = (align_even(name_len) + ARFMAG.len() as u64) as usize;
        raw.resize(fixed + tail, 0);
        if read_block(r, &mut raw[fixed..])? < tail {
            return Err(Error::NoMoreArchivedFiles);
        }
        if &raw[raw.len() - 2..] != ARFMAG {
            return Err(Error::malformed("member header trailer mismatch"));
        }
        let name = String::from_utf8_lossy(&raw[fixed..fixed + name_len as usize]).into_owned();

        Ok(Some(MemberHeader {
            format: HeaderFormat::Xcoff,
            raw,
            name,
            mtime,
            uid,
            gid,
            mode,
            parsed_size: size,
            extra_size: 0,
            next_offset,
            prev_offset,
        }))
    }
}

pub(crate) fn print_rest_of_member_header<W: Write>(
    w: &mut W,
    mtime: u64,
    uid: u32,
    gid: u32,
    perms: u32,
    size: u64,
) -> io::Result<()> {
    // The format has only 6 chars for uid and gid. Truncate if the provided
    // values don't fit.
    write!(
        w,
        "{:<12}{:<6}{:<6}{:<8o}{:<10}`\n",
        mtime % 1000000000000,
        uid % 1000000,
        gid % 1000000,
        perms & 0o7777777,
        size
    )
}

/// Writes a 60-byte header whose name field is already encoded.
pub(crate) fn print_member_header_with_name_field<W: Write>(
    w: &mut W,
    name_field: &str,
    mtime: u64,
    uid: u32,
    gid: u32,
    perms: u32,
    size: u64,
) -> io::Result<()> {
    write!(w, "{:<16}", name_field)?;
    print_rest_of_member_header(w, mtime, uid, gid, perms, size)
}

/// Writes a 4.4BSD header with the name stored inline after it, padded so
/// that the payload lands on an 8-byte boundary.
pub(crate) fn print_bsd_member_header<W: Write>(
    w: &mut W,
    pos: u64,
    name: &str,
    mtime: u64,
    uid: u32,
    gid: u32,
    perms: u32,
    size: u64,
) -> io::Result<u64> {
    let pos_after_header = pos + AR_HDR_SIZE + name.len() as u64;
    // Pad so that even 64 bit object files are aligned.
    let pad = crate::alignment::offset_to_alignment(pos_after_header, 8);
    let name_with_padding = name.len() as u64 + pad;
    write!(w, "#1/{:<13}", name_with_padding)?;
    print_rest_of_member_header(w, mtime, uid, gid, perms, name_with_padding + size)?;
    write!(w, "{}", name)?;
    write!(
        w,
        "{nil:\0<pad$}",
        nil = "",
        pad = pad as usize
    )?;
    Ok(name_with_padding)
}

/// Replaces the name field of a raw 60-byte header, producing a new block.
pub(crate) fn with_name_field(raw: &[u8], name_field: &str) -> Vec<u8> {
    let mut header = Vec::with_capacity(raw.len());
    write!(header, "{:<16}", name_field).unwrap();
    header.truncate(AR_NAME_LEN);
    header.extend_from_slice(&raw[AR_NAME_LEN..]);
    header
}

pub(crate) fn print_xcoff_member_header<W: Write>(
    w: &mut W,
    layout: &Layout,
    name: &str,
    mtime: u64,
    uid: u32,
    gid: u32,
    perms: u32,
    size: u64,
    prev_offset: u64,
    next_offset: u64,
) -> io::Result<()> {
    let width = layout.offset_width;
    write!(
        w,
        "{:<width$}{:<width$}{:<width$}{:<12}{:<12}{:<12}{:<12o}{:<4}",
        size,
        next_offset,
        prev_offset,
        mtime,
        u64::from(uid) % 1000000000000u64,
        u64::from(gid) % 1000000000000u64,
        perms,
        name.len(),
    )?;

    if !name.is_empty() {
        write!(w, "{}", name)?;

        if name.len() % 2 != 0 {
            write!(w, "\0")?;
        }
    }

    write!(w, "`\n")?;

    Ok(())
}
