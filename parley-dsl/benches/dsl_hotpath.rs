use parley_core::{Parameters, Value};
use parley_dsl::compiler::{compile, Scope};
use parley_dsl::parser::parse;
use parley_dsl::{read_metadata, render, ReadMetadataOptions};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const TEMPLATE: &str = r#"
---
model: gpt-4o
temperature: 0.2
---
You are a helpful assistant for {{ company }}.

{{ total = 0 }}
<user>
  {{#each items as item, i}}
    {{ i + 1 }}. {{ item.name }} costs {{ item.price }}
    {{ total += item.price }}
  {{:else}}
    The cart is empty.
  {{/each}}
  {{#if total > 100}}Apply the discount.{{:else}}No discount.{{/if}}
</user>
"#;

fn parameters() -> Parameters {
    let items: Vec<Value> = (0..20)
        .map(|i| {
            let mut item = parley_core::Object::new();
            item.insert("name".to_string(), Value::from(format!("item-{}", i)));
            item.insert("price".to_string(), Value::from(i * 3));
            Value::Object(item)
        })
        .collect();

    let mut parameters = Parameters::new();
    parameters.insert("company".to_string(), Value::from("Acme"));
    parameters.insert("items".to_string(), Value::Array(items));
    parameters
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("template/parse", |b| {
        b.iter(|| {
            let fragment = parse(black_box(TEMPLATE)).expect("parse template");
            black_box(fragment.children.len());
        });
    });
}

fn bench_parse_compile(c: &mut Criterion) {
    let parameters = parameters();
    let fragment = parse(TEMPLATE).expect("parse template");

    c.bench_function("template/compile", |b| {
        b.iter(|| {
            let output = compile(&fragment, TEMPLATE, Scope::with_parameters(&parameters))
                .expect("compile template");
            black_box(output.messages.len());
        });
    });

    c.bench_function("template/render", |b| {
        b.iter(|| {
            let conversation = render(black_box(TEMPLATE), parameters.clone()).expect("render");
            black_box(conversation.messages.len());
        });
    });
}

fn bench_metadata(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("build runtime");

    c.bench_function("template/read_metadata", |b| {
        b.iter(|| {
            let metadata = runtime.block_on(read_metadata(ReadMetadataOptions::new(black_box(TEMPLATE))));
            black_box(metadata.parameters.len());
        });
    });
}

criterion_group!(benches, bench_parse, bench_parse_compile, bench_metadata);
criterion_main!(benches);
