// Derived from code in LLVM, which is:
// Part of the LLVM Project, under the Apache License v2.0 with LLVM Exceptions.
// See https://llvm.org/LICENSE.txt for license information.
// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{self, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use object::Endianness;

use crate::alignment::*;
use crate::archive::*;
use crate::archive_reader::{Archive, PayloadSource};
use crate::cache::MemberId;
use crate::error::{Error, Result};
use crate::header::{
    print_bsd_member_header, print_member_header_with_name_field, with_name_field, HeaderFormat,
    MemberHeader,
};
use crate::name_table::{self, normalize, HostPathStyle, NameDialect, NameField};
use crate::symbol_map::{ArmapEntry, BsdSymbolMap, CoffSymbolMap, SymbolMapCodec};
use crate::xcoff;
use crate::ObjectReader;

/// How many times the symbol map timestamp is checked against the file's
/// modification time before giving up.
const ARMAP_STAMP_ATTEMPTS: u32 = 5;

/// Options controlling the layout of a new archive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WriteOptions {
    pub kind: ArchiveKind,
    /// Write a symbol map when at least one member is a recognized object.
    pub symbol_table: bool,
    /// Zero timestamps and owners, use mode 0644 for new headers, and skip
    /// timestamp stabilization.
    pub deterministic: bool,
    /// Byte order of BSD symbol maps.
    pub endianness: Endianness,
    /// Rules for reducing member paths to archive names.
    pub path_style: HostPathStyle,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            kind: ArchiveKind::Coff,
            symbol_table: true,
            deterministic: true,
            endianness: Endianness::Little,
            path_style: HostPathStyle::native(),
        }
    }
}

enum MemberSource<'a> {
    Memory(Box<dyn AsRef<[u8]> + 'a>),
    /// Read, and for the header `stat`ed, when the archive is written.
    File(PathBuf),
    /// A member of an open archive, copied from its source when written.
    Archive {
        archive: &'a dyn PayloadSource,
        header: MemberHeader,
        origin: u64,
    },
}

/// A member to be written to a new archive.
pub struct NewArchiveMember<'a> {
    source: MemberSource<'a>,
    pub object_reader: &'static ObjectReader,
    /// Path or name of the member. Directory parts are stripped according
    /// to [`WriteOptions::path_style`].
    pub member_name: String,
    /// Ignored for file members, which take their metadata from the file.
    pub mtime: u64,
    pub uid: u32,
    pub gid: u32,
    pub perms: u32,
}

impl<'a> NewArchiveMember<'a> {
    pub fn new<T: AsRef<[u8]> + 'a>(
        buf: T,
        object_reader: &'static ObjectReader,
        member_name: String,
    ) -> Self {
        NewArchiveMember {
            source: MemberSource::Memory(Box::new(buf)),
            object_reader,
            member_name,
            mtime: 0,
            uid: 0,
            gid: 0,
            perms: 0o644,
        }
    }

    /// A member whose contents and metadata come from `path` at write time.
    pub fn from_file(path: impl Into<PathBuf>, object_reader: &'static ObjectReader) -> Self {
        let path = path.into();
        NewArchiveMember {
            member_name: path.to_string_lossy().into_owned(),
            source: MemberSource::File(path),
            object_reader,
            mtime: 0,
            uid: 0,
            gid: 0,
            perms: 0o644,
        }
    }

    /// A member copied from an open archive. Its header is reused as far as
    /// the output dialect allows.
    pub fn from_archive<R: Read + Seek>(
        archive: &'a Archive<R>,
        id: MemberId,
        object_reader: &'static ObjectReader,
    ) -> Self {
        let member = archive.member(id);
        let header = member.header().clone();
        NewArchiveMember {
            member_name: header.name().to_string(),
            mtime: header.mtime(),
            uid: header.uid(),
            gid: header.gid(),
            perms: header.mode(),
            source: MemberSource::Archive {
                archive,
                header,
                origin: member.origin(),
            },
            object_reader,
        }
    }
}

/// An output an archive can be written to.
pub trait ArchiveOutput: Write + Seek {
    /// The output's current modification time, in seconds since the Unix
    /// epoch, if it has one.
    fn modified_time(&mut self) -> io::Result<Option<u64>> {
        Ok(None)
    }
}

fn metadata_mtime(metadata: &fs::Metadata) -> io::Result<u64> {
    Ok(metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs()))
}

impl ArchiveOutput for File {
    fn modified_time(&mut self) -> io::Result<Option<u64>> {
        Ok(Some(metadata_mtime(&self.metadata()?)?))
    }
}

impl<W: ArchiveOutput> ArchiveOutput for BufWriter<W> {
    fn modified_time(&mut self) -> io::Result<Option<u64>> {
        self.get_mut().modified_time()
    }
}

impl ArchiveOutput for Cursor<Vec<u8>> {}

impl ArchiveOutput for Cursor<&mut Vec<u8>> {}

impl<W: ArchiveOutput + ?Sized> ArchiveOutput for &mut W {
    fn modified_time(&mut self) -> io::Result<Option<u64>> {
        (**self).modified_time()
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// A member with its metadata settled and its symbols collected.
pub(crate) struct PreparedMember<'m> {
    pub(crate) name: String,
    pub(crate) mtime: u64,
    pub(crate) uid: u32,
    pub(crate) gid: u32,
    pub(crate) perms: u32,
    pub(crate) size: u64,
    /// A 60-byte header taken over from a source archive.
    raw_header: Option<&'m [u8]>,
    /// Offsets of this member's symbol names in the shared name blob.
    pub(crate) symbols: Vec<u64>,
    pub(crate) is_64_bit: bool,
    member: &'m NewArchiveMember<'m>,
}

impl PreparedMember<'_> {
    fn payload(&self) -> Result<Cow<'_, [u8]>> {
        match &self.member.source {
            MemberSource::Memory(buf) => Ok(Cow::Borrowed((**buf).as_ref())),
            MemberSource::File(path) => Ok(Cow::Owned(fs::read(path)?)),
            MemberSource::Archive {
                archive, origin, ..
            } => Ok(Cow::Owned(archive.read_payload(*origin, self.size)?)),
        }
    }

    /// Copies exactly `size` payload bytes to `w`, repositioning shared
    /// sources first.
    pub(crate) fn copy_payload(&self, w: &mut dyn Write) -> Result<()> {
        match &self.member.source {
            MemberSource::Memory(buf) => {
                w.write_all((**buf).as_ref())?;
                Ok(())
            }
            MemberSource::File(path) => {
                let file = File::open(path)?;
                let copied = io::copy(&mut file.take(self.size), w)?;
                if copied < self.size {
                    return Err(Error::SystemCall(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} shrank while being archived", path.display()),
                    )));
                }
                Ok(())
            }
            MemberSource::Archive {
                archive, origin, ..
            } => archive.copy_payload(*origin, self.size, w),
        }
    }
}

/// Settles each member's metadata. File members are `stat`ed here, and
/// nowhere else.
fn prepare_members<'m>(
    members: &'m [NewArchiveMember<'m>],
    options: &WriteOptions,
) -> Result<Vec<PreparedMember<'m>>> {
    members
        .iter()
        .map(|m| {
            let name = normalize(&m.member_name, options.path_style).to_string();
            if name.is_empty() {
                return Err(Error::InvalidOperation(format!(
                    "member {:?} has an empty name",
                    m.member_name
                )));
            }
            let mut raw_header = None;
            let (mut mtime, mut uid, mut gid, mut perms, size) = match &m.source {
                MemberSource::Memory(buf) => {
                    let len = (**buf).as_ref().len() as u64;
                    (m.mtime, m.uid, m.gid, m.perms, len)
                }
                MemberSource::File(path) => stat_member(path)?,
                MemberSource::Archive { header, .. } => {
                    if header.format() == HeaderFormat::Ar && header.header_len() == AR_HDR_SIZE
                    {
                        raw_header = Some(header.raw());
                    }
                    (m.mtime, m.uid, m.gid, m.perms, header.size())
                }
            };
            if options.deterministic && raw_header.is_none() {
                mtime = 0;
                uid = 0;
                gid = 0;
                perms = 0o644;
            }
            check_field_limits(&name, size, options.kind)?;
            Ok(PreparedMember {
                name,
                mtime,
                uid,
                gid,
                perms,
                size,
                raw_header,
                symbols: Vec::new(),
                is_64_bit: false,
                member: m,
            })
        })
        .collect()
}

/// Rejects a member whose size or name length would overflow its header
/// field.
fn check_field_limits(name: &str, size: u64, kind: ArchiveKind) -> Result<()> {
    let name_len = name.len() as u64;
    let too_big = match kind {
        ArchiveKind::XcoffSmall | ArchiveKind::XcoffBig => {
            size > MAX_MEMBER_SIZE || name_len > crate::archive::xcoff::MAX_NAME_LEN
        }
        // The size field also covers the inline name and up to 7 bytes of
        // padding after it.
        ArchiveKind::Bsd44 if needs_inline_name(name) => {
            size.saturating_add(name_len + 7) > MAX_MEMBER_SIZE
        }
        _ => size > MAX_MEMBER_SIZE,
    };
    if too_big {
        return Err(Error::MemberTooBig(name.to_string()));
    }
    Ok(())
}

fn stat_member(path: &Path) -> Result<(u64, u32, u32, u32, u64)> {
    let metadata = fs::metadata(path)?;
    let mtime = metadata_mtime(&metadata)?;
    #[cfg(unix)]
    let (uid, gid, mode) = {
        use std::os::unix::fs::MetadataExt;
        (metadata.uid(), metadata.gid(), metadata.mode())
    };
    #[cfg(not(unix))]
    let (uid, gid, mode) = (0, 0, if metadata.permissions().readonly() { 0o444 } else { 0o644 });
    Ok((mtime, uid, gid, mode, metadata.len()))
}

/// Collects the symbols of every member into `sym_names`. Returns whether
/// any member was a recognized object.
fn collect_symbols(
    members: &mut [PreparedMember<'_>],
    sym_names: &mut Vec<u8>,
    split_64_bit: bool,
) -> Result<bool> {
    let mut has_object = false;
    for m in members.iter_mut() {
        let object_reader = m.member.object_reader;
        let buf = m.payload()?;
        let mut symbols = Vec::new();
        let recognized = (object_reader.get_symbols)(&buf, &mut |name| {
            symbols.push(sym_names.len() as u64);
            sym_names.extend_from_slice(name);
            sym_names.push(0);
            Ok(())
        })?;
        let is_64_bit = split_64_bit && (object_reader.is_64_bit_object_file)(&buf);
        drop(buf);
        has_object |= recognized;
        m.symbols = symbols;
        m.is_64_bit = is_64_bit;
    }
    Ok(has_object)
}

/// How a member's name is written in a 60-byte header.
enum NameEncoding {
    /// The complete 16-byte name field.
    Field(String),
    /// 4.4BSD `#1/<len>` with the name after the header.
    Inline,
}

fn needs_inline_name(name: &str) -> bool {
    name.len() > AR_NAME_LEN || name.contains(' ') || name.starts_with("#1/")
}

fn compute_string_table(names: &[u8], table_name: &str) -> Vec<u8> {
    let size = names.len() as u64;
    let pad = offset_to_alignment(size, 2);
    let mut member = Vec::new();
    write!(member, "{:<48}", table_name).unwrap();
    write!(member, "{:<10}", size + pad).unwrap();
    write!(member, "`\n").unwrap();
    member.extend_from_slice(names);
    if pad != 0 {
        member.push(b'\n');
    }
    member
}

fn write_symbol_table_header<W: Write>(
    w: &mut W,
    kind: ArchiveKind,
    mtime: u64,
    size: u64,
) -> io::Result<()> {
    match kind {
        ArchiveKind::Bsd44 => {
            print_bsd_member_header(w, MAGIC_LEN, BSD_SYMDEF_NAME, mtime, 0, 0, 0, size)?;
            Ok(())
        }
        ArchiveKind::Bsd => {
            print_member_header_with_name_field(w, BSD_SYMDEF_NAME, mtime, 0, 0, 0, size)
        }
        _ => print_member_header_with_name_field(w, "/", mtime, 0, 0, 0, size),
    }
}

/// Reuses a source header when its name field already says the right thing.
/// Anything else, including a stale name table reference, is rewritten.
fn member_header_with_field(m: &PreparedMember<'_>, name_field: &str) -> Result<Vec<u8>> {
    let padded = format!("{:<16}", name_field);
    match m.raw_header {
        Some(raw) if &raw[..AR_NAME_LEN] == padded.as_bytes() => Ok(raw.to_vec()),
        Some(raw) => {
            debug!("rewriting name field of {:?} to {:?}", m.name, name_field);
            Ok(with_name_field(raw, name_field))
        }
        None => {
            let mut header = Vec::new();
            print_member_header_with_name_field(
                &mut header,
                name_field,
                m.mtime,
                m.uid,
                m.gid,
                m.perms,
                m.size,
            )?;
            Ok(header)
        }
    }
}

/// Writes `members`, in order, as an archive of `options.kind`. The member
/// order is fixed once the members are handed over, which the symbol map's
/// offsets rely on.
pub fn write_archive_to_stream<W: ArchiveOutput>(
    w: &mut W,
    new_members: Vec<NewArchiveMember<'_>>,
    options: WriteOptions,
) -> Result<()> {
    let kind = options.kind;
    let mut members = prepare_members(&new_members, &options)?;

    let mut sym_names = Vec::new();
    let has_object = options.symbol_table
        && collect_symbols(&mut members, &mut sym_names, kind == ArchiveKind::XcoffBig)?;
    let stamp = if options.deterministic {
        0
    } else if kind.is_bsd_like() {
        w.modified_time()?.unwrap_or_else(now) + ARMAP_TIME_OFFSET
    } else {
        now()
    };

    if let Some(layout) = kind.xcoff_layout() {
        xcoff::write_archive(w, layout, &members, &sym_names, stamp)?;
        w.flush()?;
        return Ok(());
    }

    // Name fields, and the name table they may refer to.
    let mut string_table = Vec::new();
    let encodings: Vec<NameEncoding> = match kind.name_dialect() {
        Some(dialect) => {
            let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
            let plan = name_table::construct(&names, dialect);
            if !plan.names.is_empty() {
                string_table = compute_string_table(&plan.names, plan.table_name);
            }
            plan.fields
                .iter()
                .zip(&members)
                .map(|(field, m)| {
                    NameEncoding::Field(match *field {
                        NameField::Embedded => dialect.embedded_field(&m.name),
                        NameField::External(offset) => dialect.external_field(offset),
                    })
                })
                .collect()
        }
        None => members
            .iter()
            .map(|m| {
                if needs_inline_name(&m.name) {
                    NameEncoding::Inline
                } else {
                    NameEncoding::Field(NameDialect::Bsd.embedded_field(&m.name))
                }
            })
            .collect(),
    };

    let armap_codec: Option<Box<dyn SymbolMapCodec>> = has_object.then(|| -> Box<dyn SymbolMapCodec> {
        if kind == ArchiveKind::Coff {
            Box::new(CoffSymbolMap {
                little_endian_fallback: false,
            })
        } else {
            Box::new(BsdSymbolMap {
                endian: options.endianness,
                short_count: false,
            })
        }
    });
    let num_syms: u64 = members.iter().map(|m| m.symbols.len() as u64).sum();

    let mut armap_header = Vec::new();
    let mut armap_size = 0;
    if let Some(codec) = &armap_codec {
        armap_size = codec.payload_size(num_syms, sym_names.len() as u64).0;
        write_symbol_table_header(&mut armap_header, kind, stamp, armap_size)?;
    }

    // First pass: member offsets.
    let members_offset =
        MAGIC_LEN + armap_header.len() as u64 + armap_size + string_table.len() as u64;
    let mut pos = members_offset;
    let mut headers = Vec::with_capacity(members.len());
    let mut member_offsets = Vec::with_capacity(members.len());
    for (m, encoding) in members.iter().zip(&encodings) {
        let header = match encoding {
            NameEncoding::Field(field) => member_header_with_field(m, field)?,
            NameEncoding::Inline => {
                let mut header = Vec::new();
                print_bsd_member_header(
                    &mut header,
                    pos,
                    &m.name,
                    m.mtime,
                    m.uid,
                    m.gid,
                    m.perms,
                    m.size,
                )?;
                header
            }
        };
        member_offsets.push(pos);
        pos += header.len() as u64 + align_even(m.size);
        headers.push(header);
    }

    // Second pass: write everything out.
    let archive_start = w.stream_position()?;
    w.write_all(ARMAG)?;
    if let Some(codec) = &armap_codec {
        let entries: Vec<ArmapEntry> = members
            .iter()
            .zip(&member_offsets)
            .flat_map(|(m, &member_offset)| {
                m.symbols.iter().map(move |&string_offset| ArmapEntry {
                    string_offset,
                    member_offset,
                })
            })
            .collect();
        w.write_all(&armap_header)?;
        codec.encode(w, &entries, &sym_names)?;
    }
    w.write_all(&string_table)?;
    for (m, header) in members.iter().zip(&headers) {
        w.write_all(header)?;
        m.copy_payload(w)?;
        if m.size % 2 != 0 {
            w.write_all(b"\n")?;
        }
    }
    w.flush()?;
    debug!(
        "wrote {:?} archive with {} members and {} symbols",
        kind,
        members.len(),
        num_syms
    );

    if armap_codec.is_some() && kind.is_bsd_like() && !options.deterministic {
        stabilize_armap_timestamp(w, archive_start, stamp);
    }
    Ok(())
}

/// Linkers that compare the symbol map's date with the archive's own
/// modification time treat an older map as stale. Pushes the date past the
/// file's mtime, giving up after a few tries.
fn stabilize_armap_timestamp<W: ArchiveOutput + ?Sized>(
    w: &mut W,
    archive_start: u64,
    mut stamp: u64,
) {
    for _ in 0..ARMAP_STAMP_ATTEMPTS {
        match update_armap_timestamp(w, archive_start, &mut stamp) {
            Ok(true) => return,
            Ok(false) => warn!("writing archive was slow: rewriting timestamp"),
            Err(err) => {
                warn!("could not rewrite archive symbol map timestamp: {}", err);
                return;
            }
        }
    }
}

/// Returns `true` when the written date is already new enough.
fn update_armap_timestamp<W: ArchiveOutput + ?Sized>(
    w: &mut W,
    archive_start: u64,
    stamp: &mut u64,
) -> io::Result<bool> {
    w.flush()?;
    let Some(mtime) = w.modified_time()? else {
        return Ok(true);
    };
    if mtime <= *stamp {
        return Ok(true);
    }
    *stamp = mtime + ARMAP_TIME_OFFSET;
    let end = w.stream_position()?;
    w.seek(SeekFrom::Start(archive_start + MAGIC_LEN + AR_DATE_OFFSET))?;
    write!(w, "{:<12}", *stamp % 1000000000000)?;
    w.seek(SeekFrom::Start(end))?;
    Ok(false)
}

/// Writes the archive to `path` through a temporary file in the same
/// directory, so members may be copied from an archive open at `path`.
/// A file member that is `path` itself is rejected.
pub fn write_archive_to_file(
    path: &Path,
    new_members: Vec<NewArchiveMember<'_>>,
    options: WriteOptions,
) -> Result<()> {
    if let Ok(output) = fs::canonicalize(path) {
        for m in &new_members {
            if let MemberSource::File(source) = &m.source {
                if fs::canonicalize(source).is_ok_and(|source| source == output) {
                    return Err(Error::InvalidOperation(format!(
                        "{} cannot be a member of itself",
                        path.display()
                    )));
                }
            }
        }
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::InvalidOperation(format!("{} is not a file", path.display())))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = tempfile::Builder::new()
        .prefix(file_name)
        .suffix(".tmp")
        .tempfile_in(dir)?;
    debug!("writing {} through {}", path.display(), temp.path().display());

    let mut w = BufWriter::new(temp.as_file_mut());
    write_archive_to_stream(&mut w, new_members, options)?;
    w.into_inner().map_err(|err| err.into_error())?;
    // Dropping `temp` on an earlier error removes it.
    temp.persist(path).map_err(io::Error::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_names_count_towards_the_size_field() {
        let long_name = "a_long_inline_member.o";
        let size = MAX_MEMBER_SIZE - long_name.len() as u64;
        assert!(check_field_limits(long_name, size, ArchiveKind::Coff).is_ok());
        assert!(check_field_limits(long_name, size, ArchiveKind::Bsd).is_ok());
        assert!(matches!(
            check_field_limits(long_name, size, ArchiveKind::Bsd44),
            Err(Error::MemberTooBig(_))
        ));
        assert!(check_field_limits(long_name, size - 7, ArchiveKind::Bsd44).is_ok());
        // Short names stay in the name field.
        assert!(check_field_limits("a.o", MAX_MEMBER_SIZE, ArchiveKind::Bsd44).is_ok());
        assert!(matches!(
            check_field_limits("a.o", MAX_MEMBER_SIZE + 1, ArchiveKind::Bsd44),
            Err(Error::MemberTooBig(_))
        ));
    }

    #[test]
    fn xcoff_name_length_fits_four_digits() {
        for kind in [ArchiveKind::XcoffSmall, ArchiveKind::XcoffBig] {
            assert!(check_field_limits(&"n".repeat(9999), 1, kind).is_ok());
            assert!(matches!(
                check_field_limits(&"n".repeat(10000), 1, kind),
                Err(Error::MemberTooBig(_))
            ));
        }
        assert!(check_field_limits(&"n".repeat(10000), 1, ArchiveKind::Coff).is_ok());
    }
}
