use criterion::{criterion_group, criterion_main, Criterion};
use flatdb_core::tokenizer::{Normalizer, TextNormalizer};

const SYNOPSIS: &str = "Um professor de química do ensino médio, diagnosticado com câncer de pulmão, \
    se junta a um ex-aluno para fabricar e vender metanfetamina e garantir o futuro da família. \
    Ao longo das temporadas, a série acompanha a transformação do personagem em um chefão do tráfico.";

fn bench_normalize(c: &mut Criterion) {
    let normalizer = TextNormalizer::default();
    let text = SYNOPSIS.repeat(20);
    c.bench_function("normalize_synopsis", |b| b.iter(|| normalizer.normalize(&text)));
}

criterion_group!(benches, bench_normalize);
criterion_main!(benches);
