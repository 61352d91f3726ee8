use std::io::Cursor;

use ar_container::{
    write_archive_to_stream, Archive, ArchiveKind, Error, NewArchiveMember, DEFAULT_OBJECT_READER,
};
use object::Architecture;
use pretty_assertions::assert_eq;

mod common;

const BIG_FILE_HEADER_SIZE: usize = 8 + 6 * 20;
const SMALL_FILE_HEADER_SIZE: usize = 8 + 5 * 12;

fn field(bytes: &[u8], start: usize, width: usize) -> u64 {
    std::str::from_utf8(&bytes[start..start + width])
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}

fn mixed_width_members() -> (Vec<u8>, Vec<u8>) {
    (
        common::elf_object_for(Architecture::X86_64, b"wide.c", &[b"func64"]),
        common::elf_object_for(Architecture::I386, b"narrow.c", &[b"func32"]),
    )
}

#[test]
fn big_archive_splits_symbol_tables() {
    let (wide, narrow) = mixed_width_members();
    let bytes = common::write_archive(
        common::deterministic(ArchiveKind::XcoffBig),
        [("wide.o", wide.as_slice()), ("narrow.o", narrow.as_slice())],
    );
    assert_eq!(&bytes[..8], b"<bigaf>\n");

    let member_table = field(&bytes, 8, 20);
    let symbols32 = field(&bytes, 28, 20);
    let symbols64 = field(&bytes, 48, 20);
    assert_eq!(field(&bytes, 68, 20), BIG_FILE_HEADER_SIZE as u64);
    assert!(member_table > field(&bytes, 88, 20));
    assert!(symbols32 > member_table);
    assert!(symbols64 > symbols32);

    // 32-bit symbols come first whatever the member order.
    assert_eq!(
        common::read_symbols(&bytes).unwrap(),
        vec![
            ("func32".to_string(), "narrow.o".to_string()),
            ("func64".to_string(), "wide.o".to_string()),
        ]
    );
}

#[test]
fn small_archive_has_one_symbol_table() {
    let (wide, narrow) = mixed_width_members();
    let bytes = common::write_archive(
        common::deterministic(ArchiveKind::XcoffSmall),
        [("wide.o", wide.as_slice()), ("narrow.o", narrow.as_slice())],
    );
    assert_eq!(&bytes[..8], b"<aiaff>\n");
    assert_eq!(field(&bytes, 8 + 3 * 12, 12), SMALL_FILE_HEADER_SIZE as u64);
    assert_eq!(
        common::read_symbols(&bytes).unwrap(),
        vec![
            ("func64".to_string(), "wide.o".to_string()),
            ("func32".to_string(), "narrow.o".to_string()),
        ]
    );
}

#[test]
fn members_are_doubly_linked() {
    for kind in [ArchiveKind::XcoffSmall, ArchiveKind::XcoffBig] {
        let bytes = common::write_archive(
            common::deterministic(kind),
            [
                ("one.txt", &b"1"[..]),
                ("two.txt", &b"22"[..]),
                ("three.txt", &b"333"[..]),
            ],
        );
        assert_eq!(common::read_symbols(&bytes), None);

        let mut archive = Archive::open(Cursor::new(bytes.as_slice())).unwrap();
        assert_eq!(archive.kind().unwrap(), kind);
        let ids = archive.members().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(archive.member(ids[0]).header().prev_offset(), 0);
        for pair in ids.windows(2) {
            let (prev, next) = (archive.member(pair[0]), archive.member(pair[1]));
            assert_eq!(prev.header().next_offset(), next.header_offset());
            assert_eq!(next.header().prev_offset(), prev.header_offset());
        }
        assert_eq!(archive.read_member_data(ids[2]).unwrap(), b"333");
    }
}

#[test]
fn empty_archive_is_just_the_file_header() {
    for (kind, size) in [
        (ArchiveKind::XcoffSmall, SMALL_FILE_HEADER_SIZE),
        (ArchiveKind::XcoffBig, BIG_FILE_HEADER_SIZE),
    ] {
        let bytes = common::write_archive(common::deterministic(kind), []);
        assert_eq!(bytes.len(), size);
        let mut archive = Archive::open(Cursor::new(bytes.as_slice())).unwrap();
        assert_eq!(archive.next_member(None).unwrap(), None);
        assert!(archive.symbol_map().unwrap().is_none());
    }
}

#[test]
fn member_linking_to_itself_is_malformed() {
    let mut bytes = common::write_archive(
        common::deterministic(ArchiveKind::XcoffBig),
        [("one.txt", &b"1"[..]), ("two.txt", &b"2"[..])],
    );
    let first = BIG_FILE_HEADER_SIZE;
    let next_field = first + 20..first + 40;
    assert_ne!(field(&bytes, next_field.start, 20), first as u64);
    bytes[next_field].copy_from_slice(format!("{:<20}", first).as_bytes());

    let mut archive = Archive::open(Cursor::new(bytes.as_slice())).unwrap();
    let id = archive.next_member(None).unwrap().unwrap();
    assert!(archive.next_member(Some(id)).unwrap_err().is_malformed());
}

#[test]
fn member_cycle_is_malformed() {
    let mut bytes = common::write_archive(
        common::deterministic(ArchiveKind::XcoffBig),
        [("one.txt", &b"1"[..]), ("two.txt", &b"2"[..])],
    );
    let first = BIG_FILE_HEADER_SIZE;
    let second = field(&bytes, first + 20, 20) as usize;
    assert!(second > first);

    // Two points back at one, and the last-member field names neither.
    bytes[second + 20..second + 40].copy_from_slice(format!("{:<20}", first).as_bytes());
    bytes[88..108].copy_from_slice(format!("{:<20}", 99999).as_bytes());

    let mut archive = Archive::open(Cursor::new(bytes.as_slice())).unwrap();
    let results = archive.members().take(10).collect::<Vec<_>>();
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert!(results[2].as_ref().unwrap_err().is_malformed());
}

#[test]
fn name_longer_than_its_length_field_is_rejected() {
    for kind in [ArchiveKind::XcoffSmall, ArchiveKind::XcoffBig] {
        let name = "n".repeat(10000);
        let member = NewArchiveMember::new(&b"x"[..], &DEFAULT_OBJECT_READER, name);
        let mut output = Cursor::new(Vec::new());
        let err = write_archive_to_stream(&mut output, vec![member], common::deterministic(kind))
            .unwrap_err();
        assert!(matches!(err, Error::MemberTooBig(_)), "{:?}: {}", kind, err);
    }
}
