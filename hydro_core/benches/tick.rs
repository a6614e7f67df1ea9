use std::error::Error;

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use hydro_core::{Controller, PumpId};
use hydro_traits::{Actuator, ManualClock, Measurement};

struct NullPwm;

impl Actuator for NullPwm {
    fn set_duty(&mut self, _channel: u8, _duty: u8) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

fn booted(clock: &ManualClock) -> Controller<NullPwm> {
    let mut c = Controller::builder()
        .with_actuator(NullPwm)
        .with_clock(clock.clone())
        .with_auto(true)
        .with_verbose(false)
        .build()
        .unwrap_or_else(|e| panic!("build: {e}"));
    c.boot().unwrap_or_else(|e| panic!("boot: {e}"));
    c
}

pub fn bench_tick(c: &mut Criterion) {
    let mut g = c.benchmark_group("tick");
    //   BENCH_SAMPLE_SIZE=10 cargo bench -p hydro_core --bench tick
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE")
        && let Ok(n) = ss.parse::<usize>()
    {
        g.sample_size(n.max(10));
    }

    g.bench_function("idle", |b| {
        let clock = ManualClock::new();
        let mut ctrl = booted(&clock);
        b.iter(|| {
            clock.advance_ms(100);
            black_box(ctrl.tick(None));
        });
    });

    g.bench_function("measurement_to_dose", |b| {
        b.iter_batched(
            || {
                let clock = ManualClock::new();
                (booted(&clock), clock)
            },
            |(mut ctrl, _clock)| {
                let m = Measurement::new(black_box(7.0), 20.0, 0);
                black_box(ctrl.tick(Some(&m)));
                black_box(ctrl.is_running(PumpId::PhDown));
            },
            BatchSize::SmallInput,
        );
    });
    g.finish();
}

criterion_group!(tick, bench_tick);
criterion_main!(tick);
