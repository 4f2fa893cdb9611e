use criterion::{black_box, criterion_group, criterion_main, Criterion};
use squash::docker::digest;
use squash::docker::squash::squash_layers;
use squash::docker::LayerInfo;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Write a single layer tar containing `file_count` distinct files plus one
/// whiteout for a file from an older layer, mimicking a typical `RUN`-layer
/// shape rather than a single giant file.
fn write_layer_tar(dir: &std::path::Path, name: &str, layer_index: usize, file_count: usize, file_size: usize) -> LayerInfo {
    let tar_path = dir.join(format!("{}.tar", name));
    let file = fs::File::create(&tar_path).unwrap();
    let mut builder = tar::Builder::new(file);

    let data = vec![0xABu8; file_size];
    for i in 0..file_count {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("dir{}/file{}.bin", layer_index, i), &data[..])
            .unwrap();
    }

    if layer_index > 0 {
        let mut header = tar::Header::new_gnu();
        header.set_size(0);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(
                &mut header,
                format!("dir{}/.wh.file0.bin", layer_index - 1),
                &[][..],
            )
            .unwrap();
    }

    builder.finish().unwrap();
    let size = fs::metadata(&tar_path).unwrap().len();

    LayerInfo {
        digest: format!("sha256:{}", name),
        size,
        tar_path: Some(tar_path),
    }
}

fn build_layers(dir: &std::path::Path, layer_count: usize, files_per_layer: usize, file_size: usize) -> Vec<LayerInfo> {
    (0..layer_count)
        .map(|i| write_layer_tar(dir, &format!("layer{}", i), i, files_per_layer, file_size))
        .collect()
}

fn benchmark_squash_small_layers(c: &mut Criterion) {
    c.bench_function("squash_5_layers_10_files", |b| {
        b.iter_batched(
            || {
                let temp_dir = TempDir::new().unwrap();
                let layers = build_layers(temp_dir.path(), 5, 10, 1024);
                (temp_dir, layers)
            },
            |(temp_dir, layers)| {
                let output_path = temp_dir.path().join("squashed.tar");
                let stats = squash_layers(black_box(&layers), &[], &output_path).unwrap();
                black_box(stats)
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn benchmark_squash_many_layers(c: &mut Criterion) {
    let mut group = c.benchmark_group("squash_layer_count");

    for layer_count in [2, 10, 30].iter() {
        group.bench_with_input(
            format!("{}_layers", layer_count),
            layer_count,
            |b, &layer_count| {
                b.iter_batched(
                    || {
                        let temp_dir = TempDir::new().unwrap();
                        let layers = build_layers(temp_dir.path(), layer_count, 5, 512);
                        (temp_dir, layers)
                    },
                    |(temp_dir, layers)| {
                        let output_path = temp_dir.path().join("squashed.tar");
                        let stats = squash_layers(black_box(&layers), &[], &output_path).unwrap();
                        black_box(stats)
                    },
                    criterion::BatchSize::SmallInput,
                )
            },
        );
    }

    group.finish();
}

fn benchmark_squash_large_files(c: &mut Criterion) {
    let mut group = c.benchmark_group("squash_file_size");

    for size_kb in [1, 64, 512].iter() {
        group.bench_with_input(format!("{}kb_files", size_kb), size_kb, |b, &size_kb| {
            b.iter_batched(
                || {
                    let temp_dir = TempDir::new().unwrap();
                    let layers = build_layers(temp_dir.path(), 3, 4, size_kb * 1024);
                    (temp_dir, layers)
                },
                |(temp_dir, layers)| {
                    let output_path = temp_dir.path().join("squashed.tar");
                    let stats = squash_layers(black_box(&layers), &[], &output_path).unwrap();
                    black_box(stats)
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn benchmark_diff_id_and_chain_id(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let layers = build_layers(temp_dir.path(), 10, 20, 4096);
    let tar_paths: Vec<PathBuf> = layers.iter().map(|l| l.tar_path.clone().unwrap()).collect();
    let path_refs: Vec<&std::path::Path> = tar_paths.iter().map(|p| p.as_path()).collect();

    c.bench_function("diff_ids_sequential_10_layers", |b| {
        b.iter(|| black_box(digest::diff_ids(black_box(&path_refs)).unwrap()))
    });

    c.bench_function("diff_ids_parallel_10_layers", |b| {
        b.iter(|| black_box(digest::diff_ids_parallel(black_box(&path_refs)).unwrap()))
    });

    let diff_ids = digest::diff_ids(&path_refs).unwrap();
    c.bench_function("chain_ids_10_layers", |b| {
        b.iter(|| black_box(digest::chain_ids(black_box(&diff_ids))))
    });
}

criterion_group!(
    benches,
    benchmark_squash_small_layers,
    benchmark_squash_many_layers,
    benchmark_squash_large_files,
    benchmark_diff_id_and_chain_id,
);
criterion_main!(benches);
