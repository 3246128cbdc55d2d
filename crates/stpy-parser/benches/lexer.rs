use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stpy_parser::Lexer;

fn bench_keywords(c: &mut Criterion) {
    let source = "def class if elif else for while return import from as with try except";

    c.bench_function("lex_keywords", |b| {
        b.iter(|| {
            let lexer = Lexer::new(black_box(source));
            lexer.tokenize().unwrap()
        });
    });
}

fn bench_numbers(c: &mut Criterion) {
    let mut group = c.benchmark_group("numbers");

    let integers = "42 123 0 999 1_000_000";
    group.bench_with_input(BenchmarkId::new("integers", "simple"), &integers, |b, source| {
        b.iter(|| {
            let lexer = Lexer::new(black_box(source));
            lexer.tokenize().unwrap()
        });
    });

    let floats = "3.14 2.718 1.414 0.5 123.456e10 1.23e-5";
    group.bench_with_input(BenchmarkId::new("floats", "various"), &floats, |b, source| {
        b.iter(|| {
            let lexer = Lexer::new(black_box(source));
            lexer.tokenize().unwrap()
        });
    });

    group.finish();
}

fn bench_indentation(c: &mut Criterion) {
    let mut source = String::new();
    for i in 0..200 {
        source.push_str(&format!(
            "def f{i}(x: int) -> int:\n    if x > {i}:\n        return x\n    return {i}\n\n"
        ));
    }

    c.bench_function("lex_nested_blocks", |b| {
        b.iter(|| {
            let lexer = Lexer::new(black_box(&source));
            lexer.tokenize().unwrap()
        });
    });
}

criterion_group!(benches, bench_keywords, bench_numbers, bench_indentation);
criterion_main!(benches);
