use std::collections::{BTreeMap, HashMap};

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use kiln_core::keys::{AssetKey, AssetType};
use kiln_core::math::{Aabb, Mat4, Vec3, look_at_rh, mat4_from_translation, normal_matrix};

// ---------------------------------------------------------------------------
// Asset keys
// ---------------------------------------------------------------------------

fn bench_asset_key_from_name(c: &mut Criterion) {
    c.bench_function("asset_key_from_name", |b| {
        b.iter(|| AssetKey::from_name(black_box("meshes/props/crate_large_01"), AssetType::Geometry));
    });
}

fn bench_asset_key_maps(c: &mut Criterion) {
    let keys: Vec<AssetKey> = (0..1024)
        .map(|i| AssetKey::from_name(&format!("asset_{i}"), AssetType::Texture))
        .collect();

    c.bench_function("asset_key_hashmap_insert_1024", |b| {
        b.iter(|| {
            let mut map = HashMap::with_capacity(keys.len());
            for (i, k) in keys.iter().enumerate() {
                map.insert(*k, i);
            }
            black_box(map.len())
        });
    });

    c.bench_function("asset_key_btreemap_insert_1024", |b| {
        b.iter(|| {
            let mut map = BTreeMap::new();
            for (i, k) in keys.iter().enumerate() {
                map.insert(*k, i);
            }
            black_box(map.len())
        });
    });
}

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

fn bench_aabb_transform(c: &mut Criterion) {
    let aabb = Aabb::new(Vec3::repeat(-1.0), Vec3::repeat(1.0));
    let m = look_at_rh(&Vec3::new(3.0, 4.0, 5.0), &Vec3::zeros(), &Vec3::y())
        * mat4_from_translation(Vec3::new(1.0, 2.0, 3.0));

    c.bench_function("aabb_transformed", |b| {
        b.iter(|| black_box(aabb).transformed(black_box(&m)));
    });
}

fn bench_normal_matrix(c: &mut Criterion) {
    let m = Mat4::new_nonuniform_scaling(&Vec3::new(2.0, 3.0, 4.0));
    c.bench_function("normal_matrix", |b| {
        b.iter(|| normal_matrix(black_box(&m)));
    });
}

criterion_group!(keys, bench_asset_key_from_name, bench_asset_key_maps);
criterion_group!(bounds, bench_aabb_transform, bench_normal_matrix);
criterion_main!(keys, bounds);
