//! # taskforge 性能基准测试
//!
//! 使用 Criterion.rs 进行性能基准测试。
//!
//! ## 基准测试分组
//! - `multi_loop`: 多重循环遍历与索引打包
//! - `scheduler`: 引擎调度开销
//! - `factory`: 管线工厂端到端生成
//!
//! ## 使用方法
//! ```bash
//! cargo bench             # 运行所有
//! cargo bench multi_loop  # 只运行多重循环
//! ```

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use taskforge::pipeline::{CharacteristicRange, DefineRange, IndexLayout, MultiLoop, PipelineContext};
use taskforge::runtime::scheduler::{Engine, StateMachine, StateType, Task, TaskContext};
use taskforge::runtime::Runtime;

// ============================================================================
// Multi loop
// ============================================================================

fn bench_multi_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("multi_loop");
    for &(axes, size) in &[(2usize, 32i32), (4, 8), (8, 3)] {
        group.bench_with_input(BenchmarkId::new("iterate", format!("{}x{}", axes, size)), &(axes, size), |b, &(axes, size)| {
            b.iter(|| {
                let count = MultiLoop::new((0..axes).map(|_| (0, size))).into_iter().count();
                black_box(count)
            })
        });
    }

    let ranges: Vec<CharacteristicRange> = (0..4).map(|_| CharacteristicRange::new(0, 8).unwrap()).collect();
    let layout = IndexLayout::from_ranges(&ranges);
    group.bench_function("pack_indices", |b| {
        b.iter(|| {
            MultiLoop::from_ranges(&ranges)
                .into_iter()
                .map(|tuple| {
                    tuple
                        .iter()
                        .zip(&ranges)
                        .enumerate()
                        .fold(0u64, |acc, (k, (&v, range))| acc | layout.place(k, range.contribution(v)))
                })
                .fold(0u64, |acc, index| acc ^ black_box(index))
        })
    });
    group.finish();
}

// ============================================================================
// Scheduler
// ============================================================================

/// Yields `left` times, then finishes.
struct Spinner {
    left: u32,
}

impl StateMachine for Spinner {
    fn task_name(&self) -> &'static str {
        "Spinner"
    }

    fn state_name(
        &self,
        _state: StateType,
    ) -> &'static str {
        "Spinner_spin"
    }

    fn initial_state(&self) -> StateType {
        0
    }

    fn multiplex(
        &mut self,
        _state: StateType,
        ctx: &mut TaskContext<'_>,
    ) -> anyhow::Result<()> {
        if self.left == 0 {
            ctx.finish();
        } else {
            self.left -= 1;
            ctx.yield_now();
        }
        Ok(())
    }
}

fn bench_engine_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler");
    for &tasks in &[10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("spin_10", tasks), &tasks, |b, &tasks| {
            b.iter(|| {
                let engine = Engine::new("bench");
                for _ in 0..tasks {
                    Task::create(Spinner { left: 10 }).run(&engine).unwrap();
                }
                let mut steps = 0;
                while engine.has_runnable() {
                    steps += engine.step_all(None);
                }
                black_box(steps)
            })
        });
    }
    group.finish();
}

// ============================================================================
// Pipeline factory
// ============================================================================

fn bench_factory(c: &mut Criterion) {
    let mut group = c.benchmark_group("factory");
    for &size in &[2i32, 4, 8] {
        group.bench_with_input(BenchmarkId::new("generate_3_axes", size), &size, |b, &size| {
            b.iter(|| {
                let runtime = Arc::new(Runtime::manual());
                let context = PipelineContext::headless(runtime.clone(), None);
                let factory = context.create_pipeline_factory("bench").unwrap();
                for k in 0..3 {
                    factory.add(DefineRange::new(format!("AXIS{}", k), 0, size).unwrap());
                }
                factory.generate();
                runtime.run_until_idle();
                black_box(context.store().len())
            })
        });
    }
    group.finish();
}

// ============================================================================
// Criterion Groups
// ============================================================================

criterion_group!(
    name = multi_loop;
    config = Criterion::default().sample_size(50);
    targets = bench_multi_loop
);

criterion_group!(
    name = scheduler;
    config = Criterion::default().sample_size(30);
    targets = bench_engine_steps
);

criterion_group!(
    name = factory;
    config = Criterion::default().sample_size(20);
    targets = bench_factory
);

criterion_main!(multi_loop, scheduler, factory);
