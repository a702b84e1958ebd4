//! 多线程运行时上的管线生成

use std::sync::Arc;
use std::time::Duration;

use taskforge::pipeline::{DefineRange, PipelineContext, ResourceDescriptor, ResourceKind, ShaderProgram, ShaderStage, SharedResource};
use taskforge::runtime::Runtime;
use taskforge::util::config::{Config, SchedulerConfig};

const SOURCE: &str = "#version 450\nvoid main() {}\n";

#[test]
fn test_generate_with_workers() {
    let mut config = Config::default();
    config.cache.enabled = false;
    config.scheduler.normal_priority_workers = 4;
    let pipelines = taskforge::generate(&config, &[3, 3]).unwrap();
    assert_eq!(pipelines.len(), 9);
}

#[test]
fn test_many_factories_share_one_resource() {
    let config = SchedulerConfig {
        low_priority_workers: 1,
        normal_priority_workers: 4,
        high_priority_workers: 2,
        ..SchedulerConfig::default()
    };
    let runtime = Arc::new(Runtime::new(&config).unwrap());
    let context = PipelineContext::headless(runtime.clone(), None);
    let globals = SharedResource::new(ResourceDescriptor::new(ResourceKind::UniformBuffer, "globals"));

    let factories: Vec<_> = (0..8)
        .map(|i| {
            let factory = context.create_pipeline_factory(&format!("factory{}", i)).unwrap();
            factory.add(DefineRange::new("LIGHTS", 0, 3).unwrap());
            factory.add(
                ShaderProgram::new("lit")
                    .with_shader(ShaderStage::Vertex, SOURCE)
                    .with_shader(ShaderStage::Fragment, SOURCE)
                    .with_resource(globals.clone()),
            );
            factory
        })
        .collect();
    for factory in &factories {
        factory.generate();
    }

    let (_, idle) = runtime.run_until_idle_for(Some(Duration::from_secs(30)));
    assert!(idle);
    for factory in &factories {
        assert!(factory.is_finished(), "{} did not finish", factory.name());
        assert!(context.store().is_done(factory.index()));
        assert_eq!(context.store().pipelines(factory.index()).len(), 3);
    }
    let handle = globals.handle().unwrap();
    assert!(context
        .store()
        .pipelines(factories[0].index())
        .iter()
        .all(|p| p.resources == vec![handle]));
    assert_eq!(globals.users().len(), 8);
    runtime.shutdown();
}
