use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

use twix2mrd::classify::ScanCategory;
use twix2mrd::config::Settings;
use twix2mrd::convert::Converter;
use twix2mrd::discover::DiscoveredFile;
use twix2mrd::twix::builder::{synthetic_record, TwixBuilder};
use twix2mrd::twix::{FormatVersion, LoopCounters, TwixFile};

/// Proton scan with `lines` projections of `channels` x 256 samples
fn proton_scan(version: FormatVersion, lines: u16, channels: u16) -> TwixBuilder {
    TwixBuilder::new(version)
        .xprot("Config", "ProtocolName", "1H_BHUTE_Radial")
        .xprot("Dicom", "lFrequency", "123251815")
        .yaps("tReferenceImage0", "1.3.12.2.1107.5.2.43.20210601143012")
        .yaps("sRXSPEC.alDwellTime[0]", "10000")
        .records((0..lines).map(|line| {
            let counters = LoopCounters {
                line,
                ..LoopCounters::default()
            };
            synthetic_record(u32::from(line) + 1, counters, channels, 256)
        }))
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("twix_decode");

    for version in [FormatVersion::Vb, FormatVersion::Vd] {
        for &lines in &[256u16, 2048] {
            let bytes = proton_scan(version, lines, 8).build();
            group.throughput(Throughput::Bytes(bytes.len() as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("{version:?}"), lines),
                &bytes,
                |b, bytes| {
                    b.iter_batched(
                        || bytes.clone(),
                        |bytes| {
                            let twix = TwixFile::from_bytes(bytes).unwrap();
                            twix.into_container().unwrap().records.len()
                        },
                        criterion::BatchSize::LargeInput,
                    );
                },
            );
        }
    }

    group.finish();
}

fn bench_convert(c: &mut Criterion) {
    let mut group = c.benchmark_group("convert_file");

    for &lines in &[256u16, 2048] {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("proton.dat");
        proton_scan(FormatVersion::Vd, lines, 8).write_to(&input).unwrap();
        let file = DiscoveredFile::new(&input);
        let converter = Converter::new(Settings::new(temp_dir.path(), "bench"));

        group.throughput(Throughput::Elements(u64::from(lines)));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &file, |b, file| {
            b.iter(|| {
                let converted = converter.convert_file(file).unwrap();
                assert_eq!(converted.category, ScanCategory::Proton);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decode, bench_convert);
criterion_main!(benches);
