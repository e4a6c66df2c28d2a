use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use glossbook_rs::{
    CategoryId, DictionaryEntryRef, FavoriteRow, OptimisticList, build_key, key_for,
};

const WORDS: &[(&str, &str)] = &[
    ("Haus", "Nomen"),
    ("  laufen ", "Verb"),
    ("Straßenbahnhaltestelle", "NOMEN"),
    ("schnell", "Adjektiv"),
];

fn populated_list(size: usize) -> OptimisticList {
    let rows = (0..size)
        .map(|index| {
            let entry = DictionaryEntryRef::new(&format!("wort{index}"), "Nomen");
            FavoriteRow::optimistic(&entry, Some(CategoryId(1)))
        })
        .collect();
    OptimisticList::new(rows)
}

fn bench_key_building(c: &mut Criterion) {
    for &(headword, pos) in WORDS {
        let entry = DictionaryEntryRef::new(headword, pos);
        c.bench_with_input(
            BenchmarkId::new("build_key", headword.trim()),
            &entry,
            |b, entry| {
                b.iter(|| black_box(build_key(entry)));
            },
        );
    }
}

fn bench_membership(c: &mut Criterion) {
    const SIZES: &[usize] = &[10, 100, 1_000];
    for &size in SIZES {
        let list = populated_list(size);
        let miss = key_for("fehlt", "Nomen");
        let hit = key_for(&format!("wort{}", size - 1), "Nomen");
        c.bench_with_input(BenchmarkId::new("contains_hit", size), &list, |b, list| {
            b.iter(|| black_box(list.contains(&hit)));
        });
        c.bench_with_input(BenchmarkId::new("contains_miss", size), &list, |b, list| {
            b.iter(|| black_box(list.contains(&miss)));
        });
    }
}

fn bench_optimistic_round(c: &mut Criterion) {
    let list = populated_list(500);
    let entry = DictionaryEntryRef::new("Schloss", "Nomen").with_senses(["castle", "lock"]);
    let key = build_key(&entry);
    c.bench_function("optimistic::insert_then_restore", |b| {
        b.iter(|| {
            let mut working = list.clone();
            let snapshot = working.snapshot();
            working.insert_front(FavoriteRow::optimistic(&entry, Some(CategoryId(1))));
            working.restore_identity(&snapshot, &key);
            black_box(working.len());
        });
    });
}

criterion_group!(
    benches,
    bench_key_building,
    bench_membership,
    bench_optimistic_round
);
criterion_main!(benches);
