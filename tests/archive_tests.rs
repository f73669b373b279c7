use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use zipcast::{
    ArchiveSink, DosDateTime, EntryOptions, EntryState, ExtraField, ForwardOnly, ZipArchive,
    ZipError, ZipReader,
};

fn fixed_time() -> EntryOptions {
    EntryOptions::new().last_modified_dos(DosDateTime::MIN)
}

fn write_entry<S: ArchiveSink>(archive: &mut ZipArchive<S>, name: &str, data: &[u8]) {
    let id = archive.create_entry_with_options(name, fixed_time()).unwrap();
    let mut writer = archive.open_for_write(id).unwrap();
    writer.write_all(data).unwrap();
    writer.finish().unwrap();
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

#[test]
fn seekable_archive_round_trip() {
    let mut archive = ZipArchive::new(Cursor::new(Vec::new())).unwrap();
    write_entry(&mut archive, "hello.txt", b"Hello, World!");
    write_entry(&mut archive, "dir/data.bin", &[42u8; 10_000]);
    archive.set_comment("archive comment").unwrap();
    let bytes = archive.into_inner().unwrap().into_inner();

    // patched in place: no descriptor flag, sizes in the local header
    assert_eq!(&bytes[0..4], b"PK\x03\x04");
    assert_eq!(u16_at(&bytes, 6) & 0x0008, 0);
    assert_eq!(u32_at(&bytes, 14), crc32fast::hash(b"Hello, World!"));
    assert_eq!(u32_at(&bytes, 18), 13);
    assert_eq!(u32_at(&bytes, 22), 13);

    let mut reader = ZipReader::new(Cursor::new(bytes)).unwrap();
    assert_eq!(reader.comment(), b"archive comment");
    assert_eq!(reader.entries().len(), 2);
    assert_eq!(reader.read_entry_by_name("hello.txt").unwrap(), b"Hello, World!");
    assert_eq!(
        reader.read_entry_by_name("dir/data.bin").unwrap(),
        vec![42u8; 10_000]
    );
    let entry = reader.find_entry("hello.txt").unwrap();
    assert!(!entry.has_data_descriptor());
    assert_eq!(entry.version_needed(), 10);
    assert_eq!(entry.modified, DosDateTime::MIN);
}

#[test]
fn forward_only_archive_uses_descriptors() {
    let mut archive = ZipArchive::new(ForwardOnly(Vec::new())).unwrap();
    write_entry(&mut archive, "a.txt", b"abc");
    write_entry(&mut archive, "b.txt", b"defgh");
    let bytes = archive.into_inner().unwrap().into_inner();

    // local header: bit 3, zero CRC and sizes
    assert_eq!(u16_at(&bytes, 6) & 0x0008, 0x0008);
    assert_eq!(&bytes[14..26], &[0; 12]);
    // signed 32-bit descriptor right after the data
    let descriptor = 30 + 5 + 3;
    assert_eq!(&bytes[descriptor..descriptor + 4], b"PK\x07\x08");
    assert_eq!(u32_at(&bytes, descriptor + 4), crc32fast::hash(b"abc"));
    assert_eq!(u32_at(&bytes, descriptor + 8), 3);
    assert_eq!(u32_at(&bytes, descriptor + 12), 3);
    assert_eq!(&bytes[descriptor + 16..descriptor + 20], b"PK\x03\x04");

    let mut reader = ZipReader::new(Cursor::new(bytes)).unwrap();
    let entries = reader.entries().to_vec();
    assert!(entries.iter().all(|e| e.has_data_descriptor()));
    assert_eq!(entries[1].offset, descriptor as u64 + 16);
    assert_eq!(reader.read_entry(&entries[0]).unwrap(), b"abc");
    assert_eq!(reader.read_entry(&entries[1]).unwrap(), b"defgh");
}

#[test]
fn empty_entries_have_complete_headers() {
    for seekable in [true, false] {
        let bytes = if seekable {
            let mut archive = ZipArchive::new(Cursor::new(Vec::new())).unwrap();
            archive.create_entry_with_options("never-opened", fixed_time()).unwrap();
            let id = archive.create_entry_with_options("opened", fixed_time()).unwrap();
            archive.open_for_write(id).unwrap().finish().unwrap();
            archive.into_inner().unwrap().into_inner()
        } else {
            let mut archive = ZipArchive::new(ForwardOnly(Vec::new())).unwrap();
            archive.create_entry_with_options("never-opened", fixed_time()).unwrap();
            let id = archive.create_entry_with_options("opened", fixed_time()).unwrap();
            archive.open_for_write(id).unwrap().finish().unwrap();
            archive.into_inner().unwrap().into_inner()
        };

        // no data descriptor on either entry, not even forward-only
        assert_eq!(u16_at(&bytes, 6), 0);
        assert_eq!(&bytes[14..26], &[0; 12]);
        let second = 30 + "never-opened".len();
        assert_eq!(&bytes[second..second + 4], b"PK\x03\x04");
        assert_eq!(u16_at(&bytes, second + 6), 0);

        let reader = ZipReader::new(Cursor::new(bytes)).unwrap();
        for entry in reader.entries() {
            assert_eq!(entry.crc32, 0);
            assert_eq!(entry.uncompressed_size, 0);
            assert_eq!(entry.compressed_size, 0);
            assert!(!entry.has_data_descriptor());
        }
    }
}

#[test]
fn empty_writes_do_not_start_an_entry() {
    let mut archive = ZipArchive::new(ForwardOnly(Vec::new())).unwrap();
    let id = archive.create_entry_with_options("quiet", fixed_time()).unwrap();
    let mut writer = archive.open_for_write(id).unwrap();
    writer.write_all(&[]).unwrap();
    assert_eq!(writer.bytes_written(), 0);
    writer.finish().unwrap();
    let bytes = archive.into_inner().unwrap().into_inner();

    // a single complete local header, no descriptor
    assert_eq!(u16_at(&bytes, 6), 0);
    assert_eq!(&bytes[35..39], b"PK\x01\x02");
}

#[test]
fn creating_an_entry_finalizes_the_unopened_owner() {
    let mut archive = ZipArchive::new(Cursor::new(Vec::new())).unwrap();
    let first = archive.create_entry("first").unwrap();
    assert_eq!(archive.entry(first).unwrap().state(), EntryState::Unwritten);
    let second = archive.create_entry("second").unwrap();

    assert_eq!(archive.entry(first).unwrap().state(), EntryState::Finalized);
    assert!(matches!(
        archive.open_for_write(first),
        Err(ZipError::EntryFinalized(_))
    ));
    assert!(archive.open_for_write(second).is_ok());
}

#[test]
fn entries_open_once() {
    let mut archive = ZipArchive::new(Cursor::new(Vec::new())).unwrap();
    let id = archive.create_entry("once").unwrap();
    archive.open_for_write(id).unwrap().write_all(b"x").unwrap();
    // the writer was dropped, which closed it
    assert_eq!(archive.entry(id).unwrap().state(), EntryState::Finalized);
    assert!(matches!(
        archive.open_for_write(id),
        Err(ZipError::EntryAlreadyOpened(_))
    ));
}

#[test]
fn leaked_writer_blocks_the_next_entry() {
    let mut archive = ZipArchive::new(Cursor::new(Vec::new())).unwrap();
    let id = archive.create_entry("leaked").unwrap();
    let mut writer = archive.open_for_write(id).unwrap();
    writer.write_all(b"partial").unwrap();
    std::mem::forget(writer);

    assert!(matches!(
        archive.create_entry("next"),
        Err(ZipError::ConcurrentOpen(name)) if name == "leaked"
    ));
    assert!(matches!(
        archive.open_for_write(id),
        Err(ZipError::EntryAlreadyOpened(_))
    ));
    assert!(matches!(archive.finish(), Err(ZipError::ConcurrentOpen(_))));
    assert!(archive.is_closed());
}

#[test]
fn opening_a_new_owner_finalizes_the_old_one() {
    let mut archive = ZipArchive::new(Cursor::new(Vec::new())).unwrap();
    let a = archive.create_entry("a").unwrap();
    let b = archive.create_entry("b").unwrap();
    // `a` was finalized empty when `b` was created
    assert!(matches!(
        archive.open_for_write(a),
        Err(ZipError::EntryFinalized(_))
    ));
    let mut writer = archive.open_for_write(b).unwrap();
    writer.write_all(b"bee").unwrap();
    writer.finish().unwrap();

    let bytes = archive.into_inner().unwrap().into_inner();
    let mut reader = ZipReader::new(Cursor::new(bytes)).unwrap();
    assert_eq!(reader.read_entry_by_name("a").unwrap(), b"");
    assert_eq!(reader.read_entry_by_name("b").unwrap(), b"bee");
}

#[test]
fn dropping_the_archive_finalizes_it() {
    let mut out = Vec::new();
    {
        let mut archive = ZipArchive::new(Cursor::new(&mut out)).unwrap();
        write_entry(&mut archive, "kept.txt", b"kept");
    }
    let mut reader = ZipReader::new(Cursor::new(out)).unwrap();
    assert_eq!(reader.read_entry_by_name("kept.txt").unwrap(), b"kept");
}

#[test]
fn archive_can_start_mid_stream() {
    let mut cursor = Cursor::new(Vec::new());
    cursor.write_all(b"#!/bin/sh\nexit 0\n").unwrap();
    let prefix = cursor.position();

    let mut archive = ZipArchive::new(cursor).unwrap();
    write_entry(&mut archive, "payload", b"data");
    let bytes = archive.into_inner().unwrap().into_inner();

    let mut reader = ZipReader::new(Cursor::new(bytes)).unwrap();
    let entry = reader.entries()[0].clone();
    assert_eq!(entry.offset, prefix);
    assert_eq!(reader.read_entry(&entry).unwrap(), b"data");
}

#[test]
fn options_reach_the_central_directory() {
    let mut archive = ZipArchive::new(Cursor::new(Vec::new())).unwrap();
    let options = fixed_time()
        .unix_permissions(0o755)
        .comment("executable")
        .extra_field(ExtraField::new(0xCAFE, vec![1, 2, 3]).unwrap());
    archive.add_entry("run.sh", options, &b"#!/bin/sh"[..]).unwrap();
    archive.add_directory("empty", fixed_time()).unwrap();
    archive.set_comment("built by a test").unwrap();
    assert!(matches!(
        archive.set_comment(&"x".repeat(70_000)),
        Err(ZipError::CommentTooLong(70_000))
    ));
    let bytes = archive.into_inner().unwrap().into_inner();

    let reader = ZipReader::new(Cursor::new(bytes)).unwrap();
    assert_eq!(reader.comment(), b"built by a test");
    let script = reader.find_entry("run.sh").unwrap();
    assert_eq!(script.external_attributes >> 16, 0o100755);
    assert_eq!(script.comment, "executable");
    let extra = script.extra_fields();
    assert_eq!(extra.len(), 1);
    assert_eq!(extra[0].tag, 0xCAFE);
    assert_eq!(extra[0].data, vec![1, 2, 3]);

    let dir = reader.find_entry("empty/").unwrap();
    assert!(dir.is_dir());
    assert_eq!(dir.uncompressed_size, 0);
}

#[test]
fn large_file_reserves_zip64_sizes() {
    let mut archive = ZipArchive::new(Cursor::new(Vec::new())).unwrap();
    let id = archive
        .create_entry_with_options("big", fixed_time().large_file(true))
        .unwrap();
    let mut writer = archive.open_for_write(id).unwrap();
    writer.write_all(b"not that big").unwrap();
    writer.finish().unwrap();
    let bytes = archive.into_inner().unwrap().into_inner();

    // version 4.5, 32-bit sizes masked, ZIP64 block right after the name
    assert_eq!(u16_at(&bytes, 4), 45);
    assert_eq!(u32_at(&bytes, 18), u32::MAX);
    assert_eq!(u16_at(&bytes, 28), 20);
    assert_eq!(u16_at(&bytes, 33), 0x0001);
    assert_eq!(u64::from_le_bytes(bytes[37..45].try_into().unwrap()), 12);

    let mut reader = ZipReader::new(Cursor::new(bytes)).unwrap();
    assert_eq!(reader.read_entry_by_name("big").unwrap(), b"not that big");
}

/// Largest block that fits a 16-bit extra area on its own
fn oversized_field() -> ExtraField {
    ExtraField::new(0xCAFE, vec![0x5A; 65_520]).unwrap()
}

#[test]
fn reserved_zip64_block_wins_over_extra_fields() {
    let mut archive = ZipArchive::new(Cursor::new(Vec::new())).unwrap();
    let options = fixed_time().large_file(true).extra_field(oversized_field());
    archive.add_entry("big", options, &b"payload"[..]).unwrap();
    let bytes = archive.into_inner().unwrap().into_inner();

    // the local header keeps only the ZIP64 block
    assert_eq!(u16_at(&bytes, 28), 20);
    assert_eq!(u16_at(&bytes, 33), 0x0001);

    // the central record has no ZIP64 block, so the field fits there
    let mut reader = ZipReader::new(Cursor::new(bytes)).unwrap();
    let entry = reader.find_entry("big").unwrap().clone();
    assert!(!entry.has_zip64_extra());
    assert_eq!(entry.extra_fields().len(), 1);
    assert_eq!(entry.extra_fields()[0].data.len(), 65_520);
    assert_eq!(reader.read_entry(&entry).unwrap(), b"payload");
}

#[test]
fn extra_fields_dropped_from_both_headers_past_4_gib() {
    // sparse file: the archive starts at 4 GiB without writing it
    let start = 0x1_0000_0000u64;
    let mut file = tempfile::tempfile().unwrap();
    file.seek(SeekFrom::Start(start)).unwrap();

    let mut archive = ZipArchive::new(file).unwrap();
    let options = fixed_time().large_file(true).extra_field(oversized_field());
    archive.add_entry("far", options, &b"far away"[..]).unwrap();
    let mut file = archive.into_inner().unwrap();

    let mut local = [0u8; 30 + 3 + 20];
    file.seek(SeekFrom::Start(start)).unwrap();
    file.read_exact(&mut local).unwrap();
    assert_eq!(&local[0..4], b"PK\x03\x04");
    assert_eq!(u16_at(&local, 28), 20);
    assert_eq!(u16_at(&local, 33), 0x0001);

    let mut reader = ZipReader::new(file).unwrap();
    let entry = reader.find_entry("far").unwrap().clone();
    assert_eq!(entry.offset, start);
    assert!(entry.has_zip64_extra());
    assert!(entry.extra_fields().is_empty());
    assert_eq!(reader.read_entry(&entry).unwrap(), b"far away");
}

#[test]
fn caller_zip64_blocks_are_not_written() {
    let mut archive = ZipArchive::new(Cursor::new(Vec::new())).unwrap();
    let options = fixed_time()
        .large_file(true)
        .extra_field(ExtraField::new(0x0001, vec![0xEE; 16]).unwrap());
    archive.add_entry("x", options, &b"x"[..]).unwrap();
    let bytes = archive.into_inner().unwrap().into_inner();

    assert_eq!(u16_at(&bytes, 28), 20);
    assert_eq!(u64::from_le_bytes(bytes[35..43].try_into().unwrap()), 1);

    let mut reader = ZipReader::new(Cursor::new(bytes)).unwrap();
    let entry = reader.find_entry("x").unwrap().clone();
    assert!(entry.extra_fields().is_empty());
    assert_eq!(reader.read_entry(&entry).unwrap(), b"x");
}

#[test]
fn update_appends_entries() {
    let mut archive = ZipArchive::new(Cursor::new(Vec::new())).unwrap();
    write_entry(&mut archive, "old.txt", b"old data");
    archive.set_comment("v1").unwrap();
    let cursor = archive.into_inner().unwrap();
    let original_len = cursor.get_ref().len();

    let mut archive = ZipArchive::open_for_update(cursor).unwrap();
    assert_eq!(archive.len(), 1);
    assert_eq!(archive.comment(), b"v1");
    let old = archive.entries()[0].clone();
    assert_eq!(old.name(), "old.txt");
    write_entry(&mut archive, "new.txt", b"new");
    let bytes = archive.into_inner().unwrap().into_inner();
    assert!(bytes.len() > original_len);

    let mut reader = ZipReader::new(Cursor::new(bytes)).unwrap();
    assert_eq!(reader.entries().len(), 2);
    assert_eq!(reader.comment(), b"v1");
    assert_eq!(reader.read_entry_by_name("old.txt").unwrap(), b"old data");
    assert_eq!(reader.read_entry_by_name("new.txt").unwrap(), b"new");
}

#[test]
fn update_truncates_a_shorter_archive() {
    let mut archive = ZipArchive::new(Cursor::new(Vec::new())).unwrap();
    write_entry(&mut archive, "a", b"a");
    archive.set_comment(&"c".repeat(1000)).unwrap();
    let cursor = archive.into_inner().unwrap();
    let original_len = cursor.get_ref().len();

    let mut archive = ZipArchive::open_for_update(cursor).unwrap();
    archive.set_comment("").unwrap();
    let bytes = archive.into_inner().unwrap().into_inner();
    assert_eq!(bytes.len(), original_len - 1000);
    assert!(ZipReader::new(Cursor::new(bytes)).is_ok());
}

#[test]
fn update_rejects_garbage() {
    let garbage = Cursor::new(vec![0u8; 100]);
    assert!(matches!(
        ZipArchive::open_for_update(garbage),
        Err(ZipError::InvalidFormat(_))
    ));
}

/// Seekable destination that keeps only the position, to push sizes past 4 GiB
#[derive(Default)]
struct Void {
    pos: u64,
    len: u64,
}

impl Write for Void {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pos += buf.len() as u64;
        self.len = self.len.max(self.pos);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ArchiveSink for Void {
    fn can_seek(&self) -> bool {
        true
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.pos = pos;
        Ok(())
    }
}

fn write_zeroes<W: Write>(w: &mut W, mut len: u64) {
    let chunk = vec![0u8; 1 << 20];
    while len > 0 {
        let n = len.min(chunk.len() as u64) as usize;
        w.write_all(&chunk[..n]).unwrap();
        len -= n as u64;
    }
}

#[test]
#[cfg_attr(debug_assertions, ignore = "writes 4 GiB (runs in release)")]
fn oversized_entry_falls_back_to_a_descriptor() {
    let size = 0x1_0000_0000u64;
    let mut archive = ZipArchive::new(Void::default()).unwrap();
    let id = archive.create_entry_with_options("huge", fixed_time()).unwrap();
    let mut writer = archive.open_for_write(id).unwrap();
    write_zeroes(&mut writer, size);
    writer.finish().unwrap();
    write_entry(&mut archive, "after", b"x");
    archive.finish().unwrap();

    let huge = &archive.entries()[0];
    assert!(huge.uses_data_descriptor());
    assert_eq!(huge.uncompressed_size(), size);
    let after = &archive.entries()[1];
    // header, data, signed ZIP64 descriptor
    assert_eq!(after.local_header_offset(), 30 + 4 + size + 24);
    assert!(!after.uses_data_descriptor());
}

#[test]
#[cfg_attr(debug_assertions, ignore = "writes 4 GiB (runs in release)")]
fn large_file_patches_in_place() {
    let size = 0x1_0000_0000u64;
    let mut archive = ZipArchive::new(Void::default()).unwrap();
    let id = archive
        .create_entry_with_options("huge", fixed_time().large_file(true))
        .unwrap();
    let mut writer = archive.open_for_write(id).unwrap();
    write_zeroes(&mut writer, size);
    writer.finish().unwrap();
    write_entry(&mut archive, "after", b"x");
    archive.finish().unwrap();

    assert!(!archive.entries()[0].uses_data_descriptor());
    assert_eq!(archive.entries()[1].local_header_offset(), 30 + 4 + 20 + size);
}
