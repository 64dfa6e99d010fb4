use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};
use std::fs;
use tempfile::TempDir;
use vibra::recognition::response::classify;
use vibra::recognition::unify;
use vibra::scan::AudioScanner;

fn sample_response(i: usize) -> Value {
    json!({
        "matches": [{"id": i.to_string(), "offset": 12.5, "timeskew": 0.0001, "frequencyskew": 0.0}],
        "timestamp": 1_700_000_000_000u64,
        "timezone": "Europe/Paris",
        "location": {"latitude": 48.85, "longitude": 2.35, "altitude": 300.0},
        "track": {
            "key": format!("{}", 1000 + i),
            "title": format!("Song {i}"),
            "subtitle": "Artist Feat. Guest",
            "isrc": "USQX91300108",
            "genres": {"primary": "Dance"},
            "images": {"coverart": "https://img/400.jpg", "coverarthq": "https://img/hq.jpg"},
            "artists": [{"id": "42", "adamid": "5468295"}],
            "sections": [{"type": "SONG", "metadata": [
                {"title": "Album", "text": "Album"},
                {"title": "Label", "text": "Label"},
                {"title": "Released", "text": "2013"}
            ]}],
            "hub": {
                "actions": [
                    {"type": "applemusicplay", "id": "617154366"},
                    {"type": "uri", "uri": "https://audio/preview.m4a"}
                ],
                "providers": [
                    {"actions": [{"uri": "spotify:search:Song"}]},
                    {"actions": [{"uri": "deezer-query://www.deezer.com/search?q=Song"}]}
                ]
            }
        }
    })
}

fn create_test_library(size: usize) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    for i in 0..size {
        let dir = temp_dir.path().join(format!("Artist {}/Album {}", i % 10, i % 3));
        fs::create_dir_all(&dir).unwrap();
        let ext = ["mp3", "flac", "m4a", "jpg"][i % 4];
        fs::write(dir.join(format!("{i:04} Track.{ext}")), "").unwrap();
    }
    temp_dir
}

fn bench_classify(c: &mut Criterion) {
    let bodies: Vec<String> = (0..100).map(|i| sample_response(i).to_string()).collect();

    c.bench_function("classify_100_responses", |b| {
        b.iter(|| {
            for body in &bodies {
                black_box(classify(200, body));
            }
        });
    });
}

fn bench_unify(c: &mut Criterion) {
    let responses: Vec<Value> = (0..100).map(sample_response).collect();

    c.bench_function("unify_100_responses", |b| {
        b.iter(|| {
            for response in &responses {
                black_box(unify(response));
            }
        });
    });
}

fn bench_scan(c: &mut Criterion) {
    let library = create_test_library(500);

    c.bench_function("scan_500_files", |b| {
        b.iter(|| {
            let scanner = AudioScanner::new(library.path(), &["**/*Album 2*".to_string()]).unwrap();
            black_box(scanner.scan());
        });
    });
}

criterion_group!(benches, bench_classify, bench_unify, bench_scan);
criterion_main!(benches);
