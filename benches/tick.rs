use criterion::*;
use std::hint::black_box;

use cubos_ecs::prelude::*;

mod common;
use common::*;

static PRODUCTION: Tag = Tag::new("production");

fn produce(mut query: Query<(&Productivity, &mut Wealth)>) {
    query.for_each(|(p, w)| w.value += p.rate);
}

fn decay(mut query: Query<&mut Wealth>) {
    query.for_each(|w| w.value *= 0.9999);
}

fn drift(mut query: Query<&mut Position>) {
    query.for_each(|p| p.x += 0.1);
}

fn app(parallel: bool) -> Cubos {
    let mut cubos = Cubos::with_settings(Settings::default().with_parallel(parallel));
    cubos
        .component::<Position>()
        .component::<Wealth>()
        .component::<Productivity>()
        .relation::<Trades>(RelationKind::Normal);
    populate(cubos.world_mut(), AGENTS_MED);

    cubos.system("production").tagged(&PRODUCTION).call(produce);
    cubos.system("decay").after(&PRODUCTION).call(decay);
    cubos.system("drift").call(drift);
    cubos.start().expect("startup failed in benchmark");
    cubos
}

fn tick_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");

    for parallel in [false, true] {
        let name = if parallel { "tick_3_systems_100k_parallel" } else { "tick_3_systems_100k_sequential" };
        group.bench_function(name, |b| {
            let mut cubos = app(parallel);
            b.iter(|| {
                black_box(cubos.update().expect("tick failed in benchmark"));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, tick_benchmark);
criterion_main!(benches);
