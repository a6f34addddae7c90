use criterion::{black_box, criterion_group, criterion_main, Criterion};
use minitar::io_stream::{TarReader, TarWriter};
use minitar::{checksum, Header, HeaderFields};
use std::io::{self, Cursor};

fn header(name: &str, size: u64) -> Header {
    Header::encode(&HeaderFields {
        name:     name.as_bytes(),
        mode:     0o644,
        uid:      1000,
        gid:      1000,
        uname:    "bench",
        gname:    "bench",
        size,
        mtime:    1_700_000_000,
        devmajor: 0,
        devminor: 0,
    })
    .unwrap()
}

fn bench_header(c: &mut Criterion) {
    let h = header("bench.bin", 1024 * 1024);
    c.bench_function("header_encode", |b| b.iter(|| header(black_box("bench.bin"), black_box(4096))));
    c.bench_function("header_checksum", |b| b.iter(|| checksum(black_box(h.as_bytes()))));
}

fn bench_write_1mb(c: &mut Criterion) {
    let data = vec![42u8; 1024 * 1024 + 100];
    let h = header("bench.bin", data.len() as u64);

    c.bench_function("write_1mb_member", |b| {
        b.iter(|| {
            let mut writer = TarWriter::new(Cursor::new(Vec::with_capacity(data.len() + 4096)));
            writer.add_member(&h, &mut black_box(data.as_slice())).unwrap();
            writer.finish().unwrap();
        })
    });
}

fn bench_read_1mb(c: &mut Criterion) {
    let data = vec![7u8; 1024 * 1024 + 100];
    let mut writer = TarWriter::new(Cursor::new(Vec::new()));
    writer.add_member(&header("bench.bin", data.len() as u64), &mut data.as_slice()).unwrap();
    let mut archive = writer.finish().unwrap().into_inner();
    archive.truncate(archive.len() - 1024);

    c.bench_function("copy_1mb_member", |b| {
        b.iter(|| {
            let mut reader = TarReader::new(Cursor::new(black_box(&archive)), true).unwrap();
            let entry = reader.next_header().unwrap().unwrap();
            reader.copy_content(entry.size, &mut io::sink()).unwrap();
        })
    });
}

criterion_group!(benches, bench_header, bench_write_1mb, bench_read_1mb);
criterion_main!(benches);
