use criterion::{Criterion, criterion_group, criterion_main};
use defpatch::compiler::CompileOptions;
use defpatch::parser::tokenizer::Tokenizer;
use defpatch::{Bindings, FormulaCompiler, Object, Scope, parse};
use std::hint::black_box;
use std::sync::Arc;

const FORMULA: &str = "item.Cost * 1.5 + max(value(), 10) > 40 and item.Name starts \"Heavy\"";

fn scope() -> Scope {
    let record = Object::new("Hull").with("Cost", 30i64).with("Name", "Heavy Frigate");
    let bindings = Bindings::new().with_record("item", record).with("value", 12.0);
    Scope::new().with_provider(Arc::new(bindings))
}

fn benchmark_tokenizer(c: &mut Criterion) {
    c.bench_function("tokenizer", |b| {
        b.iter(|| {
            let mut tokenizer = Tokenizer::new(black_box(FORMULA));
            let mut token_count = 0;
            while let Ok(Some(_)) = tokenizer.next_token() {
                token_count += 1;
            }
            black_box(token_count)
        })
    });
}

fn benchmark_parse(c: &mut Criterion) {
    c.bench_function("parse", |b| b.iter(|| black_box(parse(black_box(FORMULA)))));
}

fn benchmark_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    let cached = FormulaCompiler::new(scope());
    let uncached = FormulaCompiler::with_options(
        scope(),
        CompileOptions {
            use_parse_cache: false,
            ..CompileOptions::default()
        },
    );

    group.bench_function("cached_ast", |b| {
        b.iter(|| black_box(cached.compile(black_box(FORMULA))))
    });
    group.bench_function("fresh_ast", |b| {
        b.iter(|| black_box(uncached.compile(black_box(FORMULA))))
    });
    group.finish();
}

fn benchmark_evaluate(c: &mut Criterion) {
    let compiler = FormulaCompiler::new(scope());
    let Ok(formula) = compiler.compile(FORMULA) else {
        return;
    };
    c.bench_function("evaluate", |b| b.iter(|| black_box(formula.evaluate())));
}

criterion_group!(
    benches,
    benchmark_tokenizer,
    benchmark_parse,
    benchmark_compile,
    benchmark_evaluate
);
criterion_main!(benches);
