#![allow(unused)]
extern crate ovlcache;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use ovlcache::prelude::*;
use std::hint::black_box;

const UNIT: u32 = 512;

struct Flash {
    image: Vec<u8>,
}

impl OverlayHooks for Flash {
    fn load_group(&self, request: &LoadRequest, destination: &mut [u8]) -> HookResult {
        let start = request.group_offset as usize;
        let source = self
            .image
            .get(start..start + destination.len())
            .ok_or_else(|| HookError::new("read past end of flash"))?;
        destination.copy_from_slice(source);
        Ok(())
    }
}

/// Tables in unit 0, then `groups` one-unit groups numbered from 1.
fn flash(groups: u16) -> Flash {
    let unit = UNIT as usize;
    let mut image = vec![0u8; (usize::from(groups) + 1) * unit];
    for id in 0..=groups + 1 {
        let offset = if id == 0 { 0 } else { id };
        let pos = usize::from(id) * 2;
        image[pos..pos + 2].copy_from_slice(&offset.to_le_bytes());
    }
    for (i, byte) in image[unit..].iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    Flash { image }
}

fn engine(group_entries: u32, groups: u16) -> Engine<Flash> {
    let config = OverlayConfig::new().with_cache_size((group_entries + 1) * UNIT);
    let mut engine: Engine<Flash> = Engine::new(config, flash(groups));
    engine.init(InitArgs::eager()).unwrap();
    engine
}

fn token(group: u16) -> OverlayToken {
    OverlayToken::from_parts(group, 0, 0, false)
}

/// Calls into a resident group: LRU touch plus frame push and pop.
fn bench_resident_call(c: &mut Criterion) {
    let mut engine = engine(15, 8);
    for group in 1..=8 {
        engine.invoke(TaskId::MAIN, token(group), 0x100).unwrap();
        engine.return_from_callee(TaskId::MAIN).unwrap();
    }

    let mut group = c.benchmark_group("resolve_hit");
    group.throughput(Throughput::Elements(1));
    group.bench_function("invoke_return", |b| {
        let mut next = 0u16;
        b.iter(|| {
            next = next % 8 + 1;
            let address = engine
                .invoke(TaskId::MAIN, black_box(token(next)), 0x100)
                .unwrap();
            engine.return_from_callee(TaskId::MAIN).unwrap();
            black_box(address)
        });
    });
    group.finish();
}

/// Cycles through more groups than fit: every call evicts and loads.
fn bench_thrashing_call(c: &mut Criterion) {
    let mut engine = engine(7, 16);

    let mut group = c.benchmark_group("resolve_miss");
    group.throughput(Throughput::Bytes(u64::from(UNIT)));
    group.bench_function("invoke_return", |b| {
        let mut next = 0u16;
        b.iter(|| {
            next = next % 16 + 1;
            let address = engine
                .invoke(TaskId::MAIN, black_box(token(next)), 0x100)
                .unwrap();
            engine.return_from_callee(TaskId::MAIN).unwrap();
            black_box(address)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_resident_call, bench_thrashing_call);
criterion_main!(benches);
