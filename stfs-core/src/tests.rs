//! End-to-end scenarios on a RAM-backed medium

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use stfs_hal::{FlashMedium, Geometry, NorMedium, RamFlash};

use crate::chunk::Chunk;
use crate::config::DATA_PER_CHUNK;
use crate::{Error, OpenMode, Stfs, Whence};

type Fs = Stfs<RamFlash<4, 16>, StdRng>;

fn mounted(seed: u64) -> Fs {
    let mut fs = Stfs::new(RamFlash::new(), StdRng::seed_from_u64(seed));
    fs.format().unwrap();
    fs
}

fn write_file<M: FlashMedium, R: rand_core::RngCore>(fs: &mut Stfs<M, R>, path: &str, data: &[u8]) {
    let fd = fs.open(path, OpenMode::Create).unwrap();
    assert_eq!(fs.write(fd, data).unwrap(), data.len());
    fs.close(fd).unwrap();
}

fn read_file<M: FlashMedium, R: rand_core::RngCore>(fs: &mut Stfs<M, R>, path: &str) -> std::vec::Vec<u8> {
    let fd = fs.open(path, OpenMode::Existing).unwrap();
    let mut buf = std::vec![0u8; fs.size(fd).unwrap() as usize];
    assert_eq!(fs.read(fd, &mut buf).unwrap(), buf.len());
    fs.close(fd).unwrap();
    buf
}

fn live_chunks(fs: &mut Fs) -> std::vec::Vec<Chunk> {
    let reserved = fs.usage().unwrap().reserved_block as usize;
    let flash = fs.medium();
    let mut chunks = std::vec::Vec::new();
    for block in (0..4).filter(|&b| b != reserved) {
        for slot in 0..16 {
            let chunk = Chunk::decode(flash.chunk(block, slot));
            if chunk.is_live() {
                chunks.push(chunk);
            }
        }
    }
    chunks.sort_by_key(|c| c.encode());
    chunks
}

fn children(fs: &mut Fs, path: &str) -> std::vec::Vec<std::vec::Vec<u8>> {
    let mut names: std::vec::Vec<_> = fs
        .read_dir(path)
        .unwrap()
        .map(|inode| inode.unwrap().name().to_vec())
        .collect();
    names.sort();
    names
}

#[test]
fn test_docs_scenario() {
    let mut fs = mounted(7);
    fs.mkdir("/docs").unwrap();
    assert_eq!(fs.mkdir("/docs"), Err(Error::Exists));

    let fd = fs.open("/docs/a.txt", OpenMode::Create).unwrap();
    assert_eq!(fs.write(fd, b"hello").unwrap(), 5);
    fs.close(fd).unwrap();

    let fd2 = fs.open("/docs/a.txt", OpenMode::Existing).unwrap();
    let mut buf = [0u8; 5];
    assert_eq!(fs.read(fd2, &mut buf).unwrap(), 5);
    assert_eq!(&buf, b"hello");
}

#[test]
fn test_keeps_writing_across_vacuum() {
    let mut fs = mounted(11);
    fs.mkdir("/keep").unwrap();
    write_file(&mut fs, "/keep/a", &[0x11; 200]);
    write_file(&mut fs, "/keep/b", b"short");

    for round in 0..40 {
        let data = std::vec![round as u8; 3 * DATA_PER_CHUNK];
        write_file(&mut fs, "/scratch", &data);
        assert_eq!(read_file(&mut fs, "/scratch"), data);
        fs.unlink("/scratch").unwrap();
    }

    assert!(fs.medium().erase_counts().iter().sum::<u32>() > 4);
    assert_eq!(read_file(&mut fs, "/keep/a"), [0x11; 200]);
    assert_eq!(read_file(&mut fs, "/keep/b"), b"short");
}

#[test]
fn test_vacuum_preserves_live_chunks() {
    let mut fs = mounted(3);
    // Seven files of five chunks each leave something live in every block
    for i in 0..7 {
        write_file(&mut fs, &std::format!("/f{}", i), &[i as u8; 300]);
    }
    for i in [1, 3, 4] {
        fs.unlink(&std::format!("/f{}", i)).unwrap();
    }

    let before = live_chunks(&mut fs);
    fs.vacuum().unwrap();
    assert_eq!(live_chunks(&mut fs), before);

    let geometry = fs.medium().geometry();
    let empty_blocks = (0..geometry.blocks as usize)
        .filter(|&b| (0..16).all(|s| fs.medium().chunk(b, s) == &[0xFF; 128]))
        .count();
    assert_eq!(empty_blocks, 1);
}

#[test]
fn test_readdir_complete_across_vacuum() {
    let mut fs = mounted(5);
    fs.mkdir("/d").unwrap();
    let mut expected = std::vec::Vec::new();
    for i in 0..8 {
        let name = std::format!("n{}", i);
        write_file(&mut fs, &std::format!("/d/{}", name), &[0; 150]);
        write_file(&mut fs, &std::format!("/other{}", i), &[0; 10]);
        expected.push(name.into_bytes());
    }
    fs.unlink("/d/n2").unwrap();
    expected.retain(|n| n != b"n2");
    for i in 0..8 {
        fs.unlink(&std::format!("/other{}", i)).unwrap();
    }

    assert_eq!(children(&mut fs, "/d"), expected);
    for _ in 0..3 {
        fs.vacuum().unwrap();
        assert_eq!(children(&mut fs, "/d"), expected);
    }
}

#[test]
fn test_open_descriptors_never_share_oids() {
    let mut fs = mounted(9);
    write_file(&mut fs, "/a", b"a");
    write_file(&mut fs, "/b", b"b");
    let fds: std::vec::Vec<_> = (0..4)
        .map(|i| fs.open(&std::format!("/new{}", i), OpenMode::Create).unwrap())
        .collect();

    let mut oids: std::vec::Vec<u32> = ["/a", "/b", "/new0", "/new1", "/new2", "/new3"]
        .iter()
        .map(|path| fs.resolve(path).unwrap().oid())
        .collect();
    let count = oids.len();
    oids.sort_unstable();
    oids.dedup();
    assert_eq!(oids.len(), count);

    for fd in fds {
        fs.close(fd).unwrap();
    }
}

#[test]
fn test_no_holes() {
    let mut fs = mounted(1);
    write_file(&mut fs, "/a", b"abc");
    let fd = fs.open("/a", OpenMode::Existing).unwrap();
    assert_eq!(fs.lseek(fd, 4, Whence::Set), Err(Error::SeekBeyondEnd));
    assert_eq!(fs.lseek(fd, 3, Whence::Set), Ok(3));
    assert_eq!(fs.write(fd, b"d").unwrap(), 1);
}

#[test]
fn test_truncate_scenario() {
    let mut fs = mounted(2);
    write_file(&mut fs, "/t", b"the quick brown fox");
    assert_eq!(fs.truncate("/t", 100), Err(Error::NoExtend));
    fs.truncate("/t", 9).unwrap();
    assert_eq!(read_file(&mut fs, "/t"), b"the quick");
}

#[test]
fn test_device_full() {
    let mut fs = mounted(4);
    let fd = fs.open("/big", OpenMode::Create).unwrap();
    let data = std::vec![0x5A; 60 * DATA_PER_CHUNK];
    // 3 usable blocks of 16 chunks, one of which holds the inode
    let expected = 47 * DATA_PER_CHUNK;
    assert_eq!(fs.write(fd, &data), Err(Error::Full));
    assert_eq!(fs.size(fd).unwrap() as usize, expected);
    assert_eq!(fs.last_error(), Some(Error::Full));

    // Committing the inode vacuums the block holding the old one
    fs.close(fd).unwrap();
    assert_eq!(read_file(&mut fs, "/big").len(), expected);

    // Freeing space makes the filesystem usable again
    fs.unlink("/big").unwrap();
    write_file(&mut fs, "/small", b"ok");
    assert_eq!(read_file(&mut fs, "/small"), b"ok");
}

#[test]
fn test_remount() {
    let mut fs = mounted(6);
    fs.mkdir("/keys").unwrap();
    write_file(&mut fs, "/keys/k1", &[0x42; 64]);
    let (flash, _) = fs.into_parts();

    let mut fs: Fs = Stfs::new(flash, StdRng::seed_from_u64(6));
    fs.init().unwrap();
    assert_eq!(read_file(&mut fs, "/keys/k1"), [0x42; 64]);
    write_file(&mut fs, "/keys/k2", b"second");
    assert_eq!(children(&mut fs, "/keys"), [b"k1".to_vec(), b"k2".to_vec()]);
}

#[test]
fn test_on_nor_flash_driver() {
    let medium = NorMedium::new(RamFlash::<4, 16>::new(), 0, Geometry::new(4, 16)).unwrap();
    let mut fs = Stfs::new(medium, StdRng::seed_from_u64(8));
    fs.format().unwrap();
    fs.mkdir("/docs").unwrap();
    write_file(&mut fs, "/docs/a.txt", b"hello");
    assert_eq!(read_file(&mut fs, "/docs/a.txt"), b"hello");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_write_read_round_trip(
        data in proptest::collection::vec(any::<u8>(), 0..1500),
        patch in proptest::collection::vec(any::<u8>(), 1..300),
        at in any::<prop::sample::Index>(),
        seed in any::<u64>(),
    ) {
        let mut fs = mounted(seed);
        write_file(&mut fs, "/f", &data);
        prop_assert_eq!(read_file(&mut fs, "/f"), data.clone());

        let offset = at.index(data.len() + 1);
        let fd = fs.open("/f", OpenMode::Existing).unwrap();
        fs.lseek(fd, offset as i32, Whence::Set).unwrap();
        prop_assert_eq!(fs.write(fd, &patch).unwrap(), patch.len());
        fs.close(fd).unwrap();

        let mut expected = data;
        let end = offset + patch.len();
        if end > expected.len() {
            expected.resize(end, 0);
        }
        expected[offset..end].copy_from_slice(&patch);
        prop_assert_eq!(read_file(&mut fs, "/f"), expected);
    }
}
