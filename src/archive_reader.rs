// Derived from code in LLVM, which is:
// Part of the LLVM Project, under the Apache License v2.0 with LLVM Exceptions.
// See https://llvm.org/LICENSE.txt for license information.
// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Lazy, offset-addressed reading of an archive.
//!
//! Opening an [`Archive`] only checks the magic. The symbol map and the
//! extended name table are loaded on first use, and members are decoded one
//! header at a time as they are reached, either by walking the chain with
//! [`Archive::next_member`] or by jumping through the symbol map with
//! [`Archive::member_at_symbol`]. Both paths share one cache keyed by header
//! offset, so a member is decoded at most once.

use std::cell::RefCell;
use std::io::{self, Read, Seek, SeekFrom, Write};

use log::debug;
use object::Endianness;

use crate::alignment::align_even;
use crate::archive::xcoff::{BIG_MAGIC, SMALL_MAGIC};
use crate::archive::*;
use crate::cache::{Member, MemberCache, MemberId};
use crate::error::{Error, Result};
use crate::header::{is_bsd44_extended_name, read_block, ArHeaderCodec, HeaderCodec};
use crate::name_table::{self, ExtendedNameTable, NameDialect};
use crate::symbol_map::{BsdSymbolMap, CoffSymbolMap, SymbolMap, SymbolMapCodec};
use crate::xcoff;

/// Options that affect how an archive is interpreted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReadOptions {
    /// Byte order of the target, used for BSD symbol maps. A map that is
    /// implausible in this order is retried once in the other.
    pub endianness: Endianness,
    /// BSD symbol maps use the two-byte count layout.
    pub bsd_short_count: bool,
    /// Re-read an implausible COFF symbol map count as little-endian. Only
    /// needed for archives from a few old toolchains of one architecture
    /// family.
    pub coff_armap_little_endian_fallback: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            endianness: Endianness::Little,
            bsd_short_count: false,
            coff_armap_little_endian_fallback: false,
        }
    }
}

/// Everything learned from the special members at the front of the archive
/// (or, for XCOFF, from the fixed-length header).
#[derive(Debug)]
struct Index {
    kind: Option<ArchiveKind>,
    symbol_map: Option<SymbolMap>,
    names: Option<ExtendedNameTable>,
    first_member_offset: u64,
    xcoff: Option<xcoff::FileHeader>,
}

/// An archive open for reading.
pub struct Archive<R> {
    reader: RefCell<R>,
    options: ReadOptions,
    /// Set for the XCOFF magics, `None` for the ar family.
    xcoff_kind: Option<ArchiveKind>,
    big_endian_magic: bool,
    index: Option<Index>,
    cache: MemberCache,
    malformed: RefCell<Option<String>>,
    headers_decoded: usize,
}

impl<R: Read + Seek> Archive<R> {
    pub fn open(reader: R) -> Result<Self> {
        Self::open_with(reader, ReadOptions::default())
    }

    /// Checks the magic at the start of `reader`. A short read that is not
    /// caused by an I/O error is [`Error::WrongFormat`].
    pub fn open_with(mut reader: R, options: ReadOptions) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let mut magic = [0; MAGIC_LEN as usize];
        if read_block(&mut reader, &mut magic)? < magic.len() {
            return Err(Error::WrongFormat);
        }
        let xcoff_kind = match &magic {
            ARMAG | ARMAGB => None,
            SMALL_MAGIC => Some(ArchiveKind::XcoffSmall),
            BIG_MAGIC => Some(ArchiveKind::XcoffBig),
            THIN_MAGIC => return Err(Error::UnsupportedFormat("thin archive")),
            _ => return Err(Error::WrongFormat),
        };
        debug!(
            "opened archive with magic {:?}",
            String::from_utf8_lossy(&magic)
        );
        Ok(Archive {
            reader: RefCell::new(reader),
            options,
            xcoff_kind,
            big_endian_magic: &magic == ARMAGB,
            index: None,
            cache: MemberCache::default(),
            malformed: RefCell::new(None),
            headers_decoded: 0,
        })
    }

    fn header_codec(&self) -> &'static dyn HeaderCodec {
        match self.xcoff_kind {
            Some(kind) => kind.header_codec(),
            None => &ArHeaderCodec,
        }
    }

    fn check(&self) -> Result<()> {
        match &*self.malformed.borrow() {
            Some(msg) => Err(Error::MalformedArchive(msg.clone())),
            None => Ok(()),
        }
    }

    /// Once the archive has been found malformed, every later call fails
    /// the same way.
    fn record<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(Error::MalformedArchive(msg)) = &result {
            let mut malformed = self.malformed.borrow_mut();
            if malformed.is_none() {
                *malformed = Some(msg.clone());
            }
        }
        result
    }

    fn ensure_indexed(&mut self) -> Result<&Index> {
        self.check()?;
        let index = match self.index.take() {
            Some(index) => index,
            None => {
                let result = match self.xcoff_kind {
                    Some(kind) => self.build_xcoff_index(kind),
                    None => self.build_ar_index(),
                };
                let index = self.record(result)?;
                debug!(
                    "indexed archive: {} symbols, name table {}, first member at {}",
                    index.symbol_map.as_ref().map_or(0, SymbolMap::len),
                    if index.names.is_some() { "present" } else { "absent" },
                    index.first_member_offset
                );
                index
            }
        };
        Ok(self.index.insert(index))
    }

    fn build_ar_index(&mut self) -> Result<Index> {
        let endian = if self.big_endian_magic {
            Endianness::Big
        } else {
            self.options.endianness
        };
        let reader = self.reader.get_mut();
        let mut kind = None;
        let mut symbol_map = None;
        let mut offset = MAGIC_LEN;

        reader.seek(SeekFrom::Start(offset))?;
        if let Some(header) = ArHeaderCodec.decode(reader, None)? {
            let name_field = &header.raw()[..AR_NAME_LEN];
            let inline_name = header.header_len() > AR_HDR_SIZE;
            if name_field == SYM64_NAME {
                return Err(Error::WrongFormat);
            }
            let map_codec: Option<Box<dyn SymbolMapCodec>> = match header.name() {
                BSD_SYMDEF_64_NAME => {
                    return Err(Error::UnsupportedFormat("64-bit BSD symbol map"));
                }
                BSD_SYMDEF_NAME | BSD_SYMDEF_SORTED_NAME => {
                    kind = Some(if inline_name {
                        ArchiveKind::Bsd44
                    } else {
                        ArchiveKind::Bsd
                    });
                    Some(Box::new(BsdSymbolMap {
                        endian,
                        short_count: self.options.bsd_short_count,
                    }))
                }
                _ if name_field == COFF_SYMDEF_FIELD => {
                    kind = Some(ArchiveKind::Coff);
                    Some(Box::new(CoffSymbolMap {
                        little_endian_fallback: self.options.coff_armap_little_endian_fallback,
                    }))
                }
                _ => None,
            };
            if let Some(codec) = map_codec {
                let payload = read_payload(reader, header.size())?;
                let map = codec.decode(&payload)?;
                debug!(
                    "decoded symbol map {:?} with {} symbols",
                    header.name(),
                    map.len()
                );
                symbol_map = Some(map);
                offset = align_even(offset + header.header_len() + header.size());
                if kind == Some(ArchiveKind::Coff) {
                    offset = skip_second_linker_member(reader, offset)?;
                }
            }
        }

        let mut names = None;
        if let Some(loaded) = name_table::load(reader, offset)? {
            offset = loaded.next_offset;
            kind = kind.or(Some(match loaded.dialect {
                NameDialect::Bsd => ArchiveKind::Bsd,
                NameDialect::Svr4 => ArchiveKind::Coff,
            }));
            names = Some(loaded.table);
        }

        Ok(Index {
            kind,
            symbol_map,
            names,
            first_member_offset: offset,
            xcoff: None,
        })
    }

    fn build_xcoff_index(&mut self, kind: ArchiveKind) -> Result<Index> {
        let layout = kind
            .xcoff_layout()
            .ok_or(Error::UnsupportedFormat("unknown XCOFF layout"))?;
        let reader = self.reader.get_mut();
        reader.seek(SeekFrom::Start(MAGIC_LEN))?;
        let header = xcoff::FileHeader::read(reader, layout)?;

        let mut symbol_map: Option<SymbolMap> = None;
        for table_offset in [header.symbol_table_offset, header.symbol_table64_offset] {
            if table_offset == 0 {
                continue;
            }
            let table = xcoff::read_symbol_table(reader, layout, table_offset)?;
            debug!(
                "decoded XCOFF global symbol table at {} with {} symbols",
                table_offset,
                table.len()
            );
            match &mut symbol_map {
                Some(map) => map.append(table),
                None => symbol_map = Some(table),
            }
        }

        Ok(Index {
            kind: Some(kind),
            symbol_map,
            names: None,
            first_member_offset: header.first_member_offset,
            xcoff: Some(header),
        })
    }

    /// The dialect of the archive, judged from its magic, its special
    /// members and, failing those, the name encoding of its first member.
    pub fn kind(&mut self) -> Result<ArchiveKind> {
        if let Some(kind) = self.ensure_indexed()?.kind {
            return Ok(kind);
        }
        let kind = match self.next_member(None)? {
            Some(id) if is_bsd44_extended_name(self.member(id).header().raw()) => {
                ArchiveKind::Bsd44
            }
            _ => ArchiveKind::Coff,
        };
        debug!("no special members, assuming {:?}", kind);
        Ok(kind)
    }

    /// The symbol map, or `None` when the archive has none. An empty map is
    /// `Some`.
    pub fn symbol_map(&mut self) -> Result<Option<&SymbolMap>> {
        Ok(self.ensure_indexed()?.symbol_map.as_ref())
    }

    pub fn name_table(&mut self) -> Result<Option<&ExtendedNameTable>> {
        Ok(self.ensure_indexed()?.names.as_ref())
    }

    /// Returns the member after `prev`, or the first member when `prev` is
    /// `None`. `Ok(None)` means the end of the archive was reached cleanly.
    pub fn next_member(&mut self, prev: Option<MemberId>) -> Result<Option<MemberId>> {
        let result = self.next_member_inner(prev);
        self.record(result)
    }

    fn next_member_inner(&mut self, prev: Option<MemberId>) -> Result<Option<MemberId>> {
        let (first_member_offset, xcoff_header) = {
            let index = self.ensure_indexed()?;
            (index.first_member_offset, index.xcoff)
        };
        let offset = match (prev, xcoff_header) {
            (None, Some(header)) if header.first_member_offset == 0 => return Ok(None),
            (None, _) => first_member_offset,
            (Some(prev), Some(header)) => {
                let prev = self.cache.get(prev);
                match header.next_member_offset(prev.header_offset(), prev.header())? {
                    Some(offset) => offset,
                    None => return Ok(None),
                }
            }
            // The payload may end on an odd byte when an inline name made
            // the header odd-length, so round the sum.
            (Some(prev), None) => {
                let prev = self.cache.get(prev);
                align_even(prev.origin() + prev.size())
            }
        };
        self.member_at_offset(offset)
    }

    /// Returns the member defining symbol `index` of the symbol map.
    pub fn member_at_symbol(&mut self, index: usize) -> Result<MemberId> {
        let result = self.member_at_symbol_inner(index);
        self.record(result)
    }

    fn member_at_symbol_inner(&mut self, index: usize) -> Result<MemberId> {
        let map = self
            .ensure_indexed()?
            .symbol_map
            .as_ref()
            .ok_or_else(|| Error::InvalidOperation("archive has no symbol map".to_string()))?;
        let symbol = map.get(index).ok_or_else(|| {
            Error::InvalidOperation(format!(
                "symbol index {} out of range ({} symbols)",
                index,
                map.len()
            ))
        })?;
        let offset = symbol.file_offset();
        self.member_at_offset(offset)?.ok_or_else(|| {
            Error::malformed(format!(
                "symbol {} points past the end of the archive ({})",
                index, offset
            ))
        })
    }

    fn member_at_offset(&mut self, offset: u64) -> Result<Option<MemberId>> {
        if let Some(id) = self.cache.lookup(offset) {
            return Ok(Some(id));
        }
        let codec = self.header_codec();
        let names = self.index.as_ref().and_then(|index| index.names.as_ref());
        let mut reader = self.reader.borrow_mut();
        reader.seek(SeekFrom::Start(offset))?;
        let Some(header) = codec.decode(&mut *reader, names)? else {
            return Ok(None);
        };
        drop(reader);
        self.headers_decoded += 1;
        Ok(Some(self.cache.insert(offset, header)))
    }

    /// Iterates over all members from the first one.
    pub fn members(&mut self) -> Members<'_, R> {
        Members {
            archive: self,
            prev: None,
            done: false,
        }
    }

    /// Reads the payload of a member. The stream is repositioned first, so
    /// this may be interleaved freely with other reads.
    pub fn read_member_data(&self, id: MemberId) -> Result<Vec<u8>> {
        self.check()?;
        let member = self.cache.get(id);
        let result = self.read_payload(member.origin(), member.size());
        self.record(result)
    }

    /// Copies the payload of a member to `w`, returning the number of bytes
    /// copied.
    pub fn copy_member_data(&self, id: MemberId, w: &mut dyn Write) -> Result<u64> {
        self.check()?;
        let member = self.cache.get(id);
        let result = self.copy_payload(member.origin(), member.size(), w);
        self.record(result)?;
        Ok(member.size())
    }

    pub fn member(&self, id: MemberId) -> &Member {
        self.cache.get(id)
    }

    /// Number of member headers decoded so far.
    pub fn headers_decoded(&self) -> usize {
        self.headers_decoded
    }

    /// Number of distinct members reached so far.
    pub fn cached_members(&self) -> usize {
        self.cache.len()
    }

    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

/// Access to payload bytes of members of an open archive, used when members
/// are copied into a new archive.
pub(crate) trait PayloadSource {
    fn read_payload(&self, origin: u64, size: u64) -> Result<Vec<u8>>;

    fn copy_payload(&self, origin: u64, size: u64, w: &mut dyn Write) -> Result<()>;
}

impl<R: Read + Seek> PayloadSource for Archive<R> {
    fn read_payload(&self, origin: u64, size: u64) -> Result<Vec<u8>> {
        let mut reader = self.reader.borrow_mut();
        reader.seek(SeekFrom::Start(origin))?;
        read_payload(&mut *reader, size)
    }

    fn copy_payload(&self, origin: u64, size: u64, w: &mut dyn Write) -> Result<()> {
        let mut reader = self.reader.borrow_mut();
        reader.seek(SeekFrom::Start(origin))?;
        let copied = io::copy(&mut Read::take(&mut *reader, size), w)?;
        if copied < size {
            return Err(Error::malformed(format!(
                "member at offset {} is truncated ({} of {} bytes)",
                origin, copied, size
            )));
        }
        Ok(())
    }
}

fn read_payload<R: Read + ?Sized>(r: &mut R, size: u64) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    Read::take(r, size).read_to_end(&mut payload)?;
    if (payload.len() as u64) < size {
        return Err(Error::malformed(format!(
            "member payload is truncated ({} of {} bytes)",
            payload.len(),
            size
        )));
    }
    Ok(payload)
}

/// Some PE toolchains put a second `/` member after the symbol map.
fn skip_second_linker_member<R: Read + Seek>(r: &mut R, offset: u64) -> Result<u64> {
    r.seek(SeekFrom::Start(offset))?;
    let mut name_field = [0; AR_NAME_LEN];
    if read_block(r, &mut name_field)? < AR_NAME_LEN || &name_field != COFF_SYMDEF_FIELD {
        return Ok(offset);
    }
    r.seek(SeekFrom::Start(offset))?;
    match ArHeaderCodec.decode(r, None)? {
        Some(header) => {
            debug!("skipping second linker member at {}", offset);
            Ok(align_even(offset + header.header_len() + header.size()))
        }
        None => Ok(offset),
    }
}

/// Iterator returned by [`Archive::members`]. Stops after the first error.
pub struct Members<'a, R> {
    archive: &'a mut Archive<R>,
    prev: Option<MemberId>,
    done: bool,
}

impl<R: Read + Seek> Iterator for Members<'_, R> {
    type Item = Result<MemberId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.archive.next_member(self.prev) {
            Ok(Some(id)) => {
                self.prev = Some(id);
                Some(Ok(id))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
