#![allow(dead_code)]

use std::fs;
use std::io::Cursor;
use std::path::PathBuf;

use ar_container::{
    Archive, ArchiveKind, NewArchiveMember, WriteOptions, DEFAULT_OBJECT_READER,
};
use object::write::{self, Object};
use object::{Architecture, BinaryFormat, Endianness, SymbolFlags, SymbolKind, SymbolScope};

/// Creates the temporary directory for a test.
pub fn create_tmp_dir(test_name: &str) -> PathBuf {
    let tmpdir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(test_name);
    match fs::remove_dir_all(&tmpdir) {
        Ok(_) => {}
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                panic!("Failed to delete directory: {:?}", tmpdir);
            }
        }
    }
    fs::create_dir_all(&tmpdir).unwrap();
    tmpdir
}

pub fn add_file_with_functions_to_object(
    object: &mut Object<'_>,
    file_name: &[u8],
    func_names: &[&[u8]],
) {
    object.add_file_symbol(file_name.to_vec());

    let text = object.section_id(write::StandardSection::Text);
    object.append_section_data(text, &[1; 30], 4);

    for func_name in func_names {
        let offset = object.append_section_data(text, &[1; 30], 4);

        object.add_symbol(write::Symbol {
            name: func_name.to_vec(),
            value: offset,
            size: 32,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: write::SymbolSection::Section(text),
            flags: SymbolFlags::None,
        });
    }
}

/// An x86-64 ELF object defining `func_names`.
pub fn elf_object(file_name: &[u8], func_names: &[&[u8]]) -> Vec<u8> {
    elf_object_for(Architecture::X86_64, file_name, func_names)
}

pub fn elf_object_for(
    architecture: Architecture,
    file_name: &[u8],
    func_names: &[&[u8]],
) -> Vec<u8> {
    let mut object = Object::new(BinaryFormat::Elf, architecture, Endianness::Little);
    add_file_with_functions_to_object(&mut object, file_name, func_names);
    object.write().unwrap()
}

pub fn deterministic(kind: ArchiveKind) -> WriteOptions {
    WriteOptions {
        kind,
        ..WriteOptions::default()
    }
}

/// Writes an archive of in-memory members.
pub fn write_archive<'data>(
    options: WriteOptions,
    input_objects: impl IntoIterator<Item = (&'data str, &'data [u8])>,
) -> Vec<u8> {
    let members = input_objects
        .into_iter()
        .map(|(name, bytes)| {
            NewArchiveMember::new(bytes, &DEFAULT_OBJECT_READER, name.to_string())
        })
        .collect::<Vec<_>>();
    let mut output_bytes = Cursor::new(Vec::new());
    ar_container::write_archive_to_stream(&mut output_bytes, members, options).unwrap();
    output_bytes.into_inner()
}

/// Reads every member's name and payload.
pub fn read_members(archive_bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = Archive::open(Cursor::new(archive_bytes)).unwrap();
    let ids = archive.members().collect::<Result<Vec<_>, _>>().unwrap();
    ids.into_iter()
        .map(|id| {
            (
                archive.member(id).name().to_string(),
                archive.read_member_data(id).unwrap(),
            )
        })
        .collect()
}

/// Symbol names in map order, with the name of the member each resolves to.
pub fn read_symbols(archive_bytes: &[u8]) -> Option<Vec<(String, String)>> {
    let mut archive = Archive::open(Cursor::new(archive_bytes)).unwrap();
    let names = archive
        .symbol_map()
        .unwrap()?
        .iter()
        .map(|sym| String::from_utf8_lossy(sym.name()).into_owned())
        .collect::<Vec<_>>();
    Some(
        names
            .into_iter()
            .enumerate()
            .map(|(index, name)| {
                let id = archive.member_at_symbol(index).unwrap();
                (name, archive.member(id).name().to_string())
            })
            .collect(),
    )
}
