use std::io::Cursor;

use ar_container::{Archive, ArchiveKind};
use object::read;
use pretty_assertions::assert_eq;

mod common;

const ALL_KINDS: [ArchiveKind; 5] = [
    ArchiveKind::Bsd,
    ArchiveKind::Bsd44,
    ArchiveKind::Coff,
    ArchiveKind::XcoffSmall,
    ArchiveKind::XcoffBig,
];

/// Names below, at and above the header field width of each dialect, one
/// with a space, and payloads of odd and even length.
fn sample_members() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("a.o", common::elf_object(b"a.c", &[b"func_a"])),
        ("fifteen_chars.o", b"odd payload".to_vec()),
        ("sixteen_chars.oo", common::elf_object(b"b.c", &[b"func_b1", b"func_b2"])),
        ("seventeen_chars.o", b"even payload".to_vec()),
        ("with space.o", b"x".to_vec()),
        (
            "a_much_longer_member_name_than_any_header_holds.o",
            common::elf_object(b"c.c", &[b"func_c"]),
        ),
    ]
}

fn inputs<'a>(members: &'a [(&'static str, Vec<u8>)]) -> Vec<(&'static str, &'a [u8])> {
    members
        .iter()
        .map(|(name, bytes)| (*name, bytes.as_slice()))
        .collect()
}

#[test]
fn members_survive_every_dialect() {
    let members = sample_members();
    for kind in ALL_KINDS {
        let archive_bytes = common::write_archive(common::deterministic(kind), inputs(&members));

        let read_back = common::read_members(&archive_bytes);
        let expected = members
            .iter()
            .map(|(name, bytes)| (name.to_string(), bytes.clone()))
            .collect::<Vec<_>>();
        assert_eq!(read_back, expected, "Member round trip for {:?}", kind);

        let mut archive = Archive::open(Cursor::new(archive_bytes.as_slice())).unwrap();
        assert_eq!(archive.kind().unwrap(), kind);
    }
}

#[test]
fn symbol_map_points_at_defining_members() {
    let members = sample_members();
    for kind in ALL_KINDS {
        let archive_bytes = common::write_archive(common::deterministic(kind), inputs(&members));
        let symbols = common::read_symbols(&archive_bytes).unwrap();
        let expected = [
            ("func_a", "a.o"),
            ("func_b1", "sixteen_chars.oo"),
            ("func_b2", "sixteen_chars.oo"),
            ("func_c", "a_much_longer_member_name_than_any_header_holds.o"),
        ]
        .iter()
        .map(|(sym, member)| (sym.to_string(), member.to_string()))
        .collect::<Vec<_>>();
        assert_eq!(symbols, expected, "Symbol map for {:?}", kind);
    }
}

/// Archives in the dialects the `object` crate understands must read the
/// same there.
#[test]
fn object_crate_reads_written_archives() {
    let members = sample_members();
    for kind in [ArchiveKind::Coff, ArchiveKind::Bsd44, ArchiveKind::XcoffBig] {
        let archive_bytes = common::write_archive(common::deterministic(kind), inputs(&members));
        let archive = read::archive::ArchiveFile::parse(archive_bytes.as_slice()).unwrap();
        let read_back = archive
            .members()
            .map(|member| {
                let member = member.unwrap();
                (
                    String::from_utf8_lossy(member.name()).into_owned(),
                    member.data(archive_bytes.as_slice()).unwrap().to_vec(),
                )
            })
            .collect::<Vec<_>>();
        let expected = members
            .iter()
            .map(|(name, bytes)| (name.to_string(), bytes.clone()))
            .collect::<Vec<_>>();
        assert_eq!(read_back, expected, "object crate reading {:?}", kind);
    }
}

#[test]
fn name_at_field_width_stays_in_header() {
    // SVR4 names need a trailing slash, leaving 15 bytes.
    let archive_bytes = common::write_archive(
        common::deterministic(ArchiveKind::Coff),
        [
            ("fifteen_chars.o", &b"1"[..]),
            ("sixteen_chars.oo", &b"22"[..]),
        ],
    );
    let mut archive = Archive::open(Cursor::new(archive_bytes.as_slice())).unwrap();
    let first = archive.next_member(None).unwrap().unwrap();
    let second = archive.next_member(Some(first)).unwrap().unwrap();
    assert_eq!(&archive.member(first).header().raw()[..16], b"fifteen_chars.o/");
    assert_eq!(&archive.member(second).header().raw()[..16], b"/0              ");
    assert_eq!(archive.member(second).name(), "sixteen_chars.oo");
    assert_eq!(archive.name_table().unwrap().unwrap().len(), 18);

    // BSD names may fill the whole field.
    let archive_bytes = common::write_archive(
        common::deterministic(ArchiveKind::Bsd),
        [
            ("sixteen_chars.oo", &b"1"[..]),
            ("seventeen_chars.o", &b"22"[..]),
        ],
    );
    let mut archive = Archive::open(Cursor::new(archive_bytes.as_slice())).unwrap();
    let first = archive.next_member(None).unwrap().unwrap();
    let second = archive.next_member(Some(first)).unwrap().unwrap();
    assert_eq!(&archive.member(first).header().raw()[..16], b"sixteen_chars.oo");
    assert_eq!(&archive.member(second).header().raw()[..16], b" 0              ");
    assert_eq!(archive.member(second).name(), "seventeen_chars.o");
    assert_eq!(archive.kind().unwrap(), ArchiveKind::Bsd);
}

#[test]
fn identical_long_names_share_a_table_entry() {
    let archive_bytes = common::write_archive(
        common::deterministic(ArchiveKind::Coff),
        [
            ("a_rather_long_member.o", &b"one"[..]),
            ("a_rather_long_member.o", &b"two"[..]),
        ],
    );
    let mut archive = Archive::open(Cursor::new(archive_bytes.as_slice())).unwrap();
    assert_eq!(
        archive.name_table().unwrap().unwrap().len(),
        "a_rather_long_member.o/\n".len()
    );
    assert_eq!(
        common::read_members(&archive_bytes),
        vec![
            ("a_rather_long_member.o".to_string(), b"one".to_vec()),
            ("a_rather_long_member.o".to_string(), b"two".to_vec()),
        ]
    );
}

#[test]
fn directories_are_stripped_from_member_names() {
    let archive_bytes = common::write_archive(
        common::deterministic(ArchiveKind::Coff),
        [("1/file.o", &b"first"[..]), ("2/file.o", &b"second"[..])],
    );
    assert_eq!(
        common::read_members(&archive_bytes),
        vec![
            ("file.o".to_string(), b"first".to_vec()),
            ("file.o".to_string(), b"second".to_vec()),
        ]
    );
}
