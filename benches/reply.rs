use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use hypercube_pir::{EncryptionParameters, PirClient, PirParams, PirServer};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn reply_benchmark(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let params = EncryptionParameters::with_moduli_sizes(2048, &[54, 55], 20).unwrap();

    let mut group = c.benchmark_group("reply");
    group.sample_size(10);

    let num_entries = 1 << 12;
    let entry_size = 256;
    let mut database = vec![0u8; num_entries * entry_size];
    rng.fill(&mut database[..]);

    for d in [1, 2] {
        let pir = PirParams::generate(&params, num_entries, entry_size, d).unwrap();
        let mut server = PirServer::new(&params, pir.clone()).unwrap();
        let client = PirClient::new(&params, pir, &mut rng).unwrap();

        server
            .set_database_from_bytes(&database, num_entries, entry_size)
            .unwrap();
        server
            .set_galois_key(0, client.generate_galois_keys(&mut rng).unwrap())
            .unwrap();
        let query = client.generate_query(42, &mut rng).unwrap();

        group.bench_with_input(
            BenchmarkId::new("unprocessed", format!("{}_dims", d)),
            &d,
            |b, _| {
                b.iter(|| server.generate_reply(&query, 0).unwrap());
            },
        );

        server.preprocess_database().unwrap();
        group.bench_with_input(
            BenchmarkId::new("preprocessed", format!("{}_dims", d)),
            &d,
            |b, _| {
                b.iter(|| server.generate_reply(&query, 0).unwrap());
            },
        );
    }

    group.finish();
}

criterion_group!(benches, reply_benchmark);
criterion_main!(benches);
