use hoard::codec::Encoding;
use hoard::{hash, packfile, PackfileCollection, PackfileReader, PackfileWriter};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

#[test]
fn round_trip_hello_world() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("hello.hdb");

    let mut writer = PackfileWriter::new();
    let written = writer.write(b"Hello, world!").unwrap();
    writer.dump(&path).unwrap();

    let reader = PackfileReader::open(&path).unwrap();
    let data = reader.read(&written).unwrap().unwrap();
    assert_eq!(data, b"Hello, world!");
    assert_eq!(hash::digest(&data), written);
}

#[test]
fn writing_abc_three_times_stores_one_block() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dedup.hdb");

    let mut writer = PackfileWriter::new();
    let first = writer.write(b"abc").unwrap();
    let second = writer.write(b"abc").unwrap();
    let third = writer.write(b"abc").unwrap();
    assert_eq!(first, second);
    assert_eq!(second, third);
    writer.dump(&path).unwrap();

    let reader = PackfileReader::open(&path).unwrap();
    assert_eq!(reader.blocktable_length(), 1);
    assert_eq!(reader.read(&first).unwrap().unwrap(), b"abc");
}

#[test]
fn block_table_is_sorted_regardless_of_write_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sorted.hdb");

    // enough blocks that insertion order almost surely differs from
    // digest order
    let mut writer = PackfileWriter::new();
    let mut expected: Vec<hoard::Hash> = Vec::new();
    for i in 0..50u32 {
        let payload = format!("payload number {i}");
        expected.push(writer.write(payload.as_bytes()).unwrap());
    }
    writer.dump(&path).unwrap();
    expected.sort();

    let reader = PackfileReader::open(&path).unwrap();
    let on_disk: Vec<hoard::Hash> = reader
        .enumerate()
        .map(|e| e.unwrap().hash)
        .collect();
    assert_eq!(on_disk, expected);
    // strictly ascending, no duplicates
    assert!(on_disk.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn every_entry_respects_the_length_invariants() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("invariants.hdb");

    let mut writer = PackfileWriter::new();
    writer.write(&b"compressible ".repeat(1000)).unwrap();
    writer.write(b"tiny").unwrap();
    writer.write(b"").unwrap();
    writer.dump(&path).unwrap();

    let file_size = std::fs::metadata(&path).unwrap().len();
    let reader = PackfileReader::open(&path).unwrap();
    let data_area_end = file_size - reader.blocktable_length() * 64;
    for entry in reader.enumerate() {
        let entry = entry.unwrap();
        assert!(entry.encoded_length <= entry.raw_length);
        assert!(64 + entry.payload_offset + entry.encoded_length as u64 <= data_area_end);
    }
}

#[test]
fn empty_packfile_has_a_valid_header_and_no_hits() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.hdb");
    PackfileWriter::new().dump(&path).unwrap();

    assert_eq!(std::fs::metadata(&path).unwrap().len(), 64);
    let reader = PackfileReader::open(&path).unwrap();
    assert_eq!(reader.blocktable_length(), 0);
    assert_eq!(reader.read(&hash::digest(b"anything")).unwrap(), None);
}

#[test]
fn random_data_falls_back_to_raw_encoding() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("raw.hdb");

    let mut rng = StdRng::seed_from_u64(0x6f61_7264);
    let mut data = vec![0u8; 16 * 1024];
    rng.fill(&mut data[..]);

    let mut writer = PackfileWriter::new();
    let written = writer.write(&data).unwrap();
    writer.dump(&path).unwrap();

    let reader = PackfileReader::open(&path).unwrap();
    let entry = reader.find_entry(&written).unwrap().unwrap();
    assert_eq!(entry.encoding(), Some(Encoding::Raw));
    assert_eq!(entry.encoded_length, entry.raw_length);
    assert_eq!(reader.read(&written).unwrap().unwrap(), data);
}

#[test]
fn raw_entry_payload_is_byte_identical() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("rawbytes.hdb");

    let mut rng = StdRng::seed_from_u64(7);
    let mut data = vec![0u8; 512];
    rng.fill(&mut data[..]);

    let mut writer = PackfileWriter::new();
    let written = writer.write(&data).unwrap();
    writer.dump(&path).unwrap();

    let reader = PackfileReader::open(&path).unwrap();
    let entry = reader.find_entry(&written).unwrap().unwrap();
    assert_eq!(entry.encoding(), Some(Encoding::Raw));
    // the stored payload equals the raw payload, decoded or not
    assert_eq!(reader.read_entry_payload(&entry, false).unwrap(), data);
    assert_eq!(reader.read_entry_payload(&entry, true).unwrap(), data);
}

#[test]
fn merge_combines_and_dedupes_sources() {
    let dir = tempdir().unwrap();
    let first_path = dir.path().join("pack0000.hdb");
    let second_path = dir.path().join("pack0001.hdb");
    let merged_path = dir.path().join("merged.hdb");

    let mut first = PackfileWriter::new();
    let a = first.write(b"block a").unwrap();
    let shared = first.write(b"in both packs").unwrap();
    first.dump(&first_path).unwrap();

    let mut second = PackfileWriter::new();
    let b = second.write(b"block b").unwrap();
    assert_eq!(second.write(b"in both packs").unwrap(), shared);
    second.dump(&second_path).unwrap();

    packfile::merge(&merged_path, &[&first_path, &second_path]).unwrap();

    let merged = PackfileReader::open(&merged_path).unwrap();
    assert_eq!(merged.blocktable_length(), 3);
    assert_eq!(merged.read(&a).unwrap().unwrap(), b"block a");
    assert_eq!(merged.read(&b).unwrap().unwrap(), b"block b");
    assert_eq!(merged.read(&shared).unwrap().unwrap(), b"in both packs");
}

#[test]
fn merge_cleans_up_after_a_bad_source() {
    let dir = tempdir().unwrap();
    let good = dir.path().join("good.hdb");
    let bad = dir.path().join("bad.hdb");
    let dest = dir.path().join("dest.hdb");

    let mut writer = PackfileWriter::new();
    writer.write(b"fine").unwrap();
    writer.dump(&good).unwrap();
    std::fs::write(&bad, b"this is not a packfile at all").unwrap();

    assert!(packfile::merge(&dest, &[&good, &bad]).is_err());
    assert!(!dest.exists());
}

#[test]
fn concurrent_reads_from_one_reader() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("shared.hdb");

    let mut writer = PackfileWriter::new();
    let mut hashes = Vec::new();
    for i in 0..200u32 {
        hashes.push(writer.write(format!("shared block {i}").as_bytes()).unwrap());
    }
    writer.dump(&path).unwrap();

    let reader = PackfileReader::open(&path).unwrap();
    std::thread::scope(|scope| {
        for _ in 0..4 {
            let reader = &reader;
            let hashes = &hashes;
            scope.spawn(move || {
                for _ in 0..3 {
                    for (i, h) in hashes.iter().enumerate() {
                        let data = reader.read(h).unwrap().unwrap();
                        assert_eq!(data, format!("shared block {i}").as_bytes());
                    }
                }
            });
        }
    });
}

#[test]
fn collection_reads_across_many_packs() {
    let dir = tempdir().unwrap();
    let mut hashes = Vec::new();
    for i in 0..3u32 {
        let mut writer = PackfileWriter::new();
        hashes.push(writer.write(format!("pack {i} payload").as_bytes()).unwrap());
        let path = PackfileCollection::unused_pack_path(dir.path()).unwrap();
        writer.dump(&path).unwrap();
    }

    let mut collection = PackfileCollection::new();
    collection.add_path(dir.path());
    assert_eq!(collection.len(), 3);
    for (i, hash) in hashes.iter().enumerate() {
        let data = collection.read(hash).unwrap().unwrap();
        assert_eq!(data, format!("pack {i} payload").as_bytes());
    }
    assert_eq!(collection.read(&hash::digest(b"absent")).unwrap(), None);
}
