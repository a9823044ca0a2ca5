use std::sync::Arc;

use async_trait::async_trait;
use imwire::pipeline::{
    AttributeMap, FailurePolicy, PipelineConfig, ProcessingContext, Processor, ProcessorPipeline,
    TypeKey,
};
use imwire::{AppError, AppResult};
use rstest::{fixture, rstest};

const KEY_TRACE: TypeKey<&'static str> = TypeKey::new("trace");

#[derive(Debug, Clone, PartialEq)]
struct Tagged(&'static str);

struct Claims {
    name: &'static str,
    tag: &'static str,
    produces: &'static str,
}

#[async_trait]
impl Processor<Tagged, String> for Claims {
    fn name(&self) -> &str {
        self.name
    }

    async fn process(
        &self,
        context: &mut ProcessingContext<'_, Tagged, String>,
        data: &Tagged,
    ) -> AppResult<()> {
        if data.0 == self.tag {
            context.collect(self.produces.to_string());
            context.mark_consumed(self.name);
        }
        Ok(())
    }
}

/// Suspends before answering, like a processor waiting on a lookup.
struct SlowEcho;

#[async_trait]
impl Processor<Tagged, String> for SlowEcho {
    fn name(&self) -> &str {
        "slow_echo"
    }

    async fn process(
        &self,
        context: &mut ProcessingContext<'_, Tagged, String>,
        data: &Tagged,
    ) -> AppResult<()> {
        if data.0 == "slow" {
            tokio::task::yield_now().await;
            let trace = context.attribute(&KEY_TRACE).copied().unwrap_or("none");
            context.collect(format!("slow:{}", trace));
        }
        Ok(())
    }
}

#[fixture]
fn pipeline() -> ProcessorPipeline<Tagged, String> {
    let pipeline = ProcessorPipeline::new("scenario", PipelineConfig::default());
    pipeline.register(Arc::new(Claims {
        name: "A",
        tag: "X",
        produces: "a",
    }));
    pipeline.register(Arc::new(Claims {
        name: "B",
        tag: "Y",
        produces: "b",
    }));
    pipeline
}

#[rstest]
#[case::x("X", vec!["a"], true)]
#[case::y("Y", vec!["b"], true)]
#[case::z("Z", vec![], false)]
#[tokio::test]
async fn claims_by_tag(
    pipeline: ProcessorPipeline<Tagged, String>,
    #[case] tag: &'static str,
    #[case] expected: Vec<&str>,
    #[case] consumed: bool,
) {
    let result = pipeline
        .process(Tagged(tag), AttributeMap::new())
        .await
        .unwrap();
    assert_eq!(result.collected, expected);
    assert_eq!(result.is_consumed, consumed);
}

#[rstest]
#[tokio::test]
async fn suspending_processor_sees_attributes(pipeline: ProcessorPipeline<Tagged, String>) {
    pipeline.register(Arc::new(SlowEcho));
    let result = pipeline
        .process(Tagged("slow"), AttributeMap::new().with(KEY_TRACE, "t-1"))
        .await
        .unwrap();
    assert_eq!(result.collected, vec!["slow:t-1"]);
    assert!(!result.is_consumed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registration_churn_never_disturbs_processing() {
    let pipeline = Arc::new(ProcessorPipeline::new(
        "churn",
        PipelineConfig::default(),
    ));
    pipeline.register(Arc::new(Claims {
        name: "stable",
        tag: "X",
        produces: "stable",
    }));

    let churn = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            for _ in 0..500 {
                let registration = pipeline.register(Arc::new(Claims {
                    name: "transient",
                    tag: "X",
                    produces: "transient",
                }));
                tokio::task::yield_now().await;
                assert!(registration.dispose());
            }
        })
    };

    for _ in 0..500 {
        let result = pipeline
            .process(Tagged("X"), AttributeMap::new())
            .await
            .unwrap();
        // the stable processor always runs first, the transient one at most once after it
        assert_eq!(result.collected[0], "stable");
        assert!(result.collected.len() <= 2);
    }
    churn.await.unwrap();
    assert_eq!(pipeline.processor_names(), vec!["stable"]);
}

struct Broken;

#[async_trait]
impl Processor<Tagged, String> for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    async fn process(
        &self,
        _context: &mut ProcessingContext<'_, Tagged, String>,
        _data: &Tagged,
    ) -> AppResult<()> {
        Err(AppError::MalformedFrame("cannot read".to_string()))
    }
}

#[rstest]
#[case::propagate(FailurePolicy::Propagate)]
#[case::log_and_continue(FailurePolicy::LogAndContinue)]
#[tokio::test]
async fn failure_policy(#[case] policy: FailurePolicy) {
    let pipeline = ProcessorPipeline::new(
        "policy",
        PipelineConfig {
            failure_policy: policy,
            ..Default::default()
        },
    );
    pipeline.register(Arc::new(Broken));
    pipeline.register(Arc::new(Claims {
        name: "A",
        tag: "X",
        produces: "a",
    }));

    let result = pipeline.process(Tagged("X"), AttributeMap::new()).await;
    match policy {
        FailurePolicy::Propagate => assert!(matches!(
            result,
            Err(AppError::ProcessorFailed { ref processor, .. }) if processor == "broken"
        )),
        FailurePolicy::LogAndContinue => {
            assert_eq!(result.unwrap().collected, vec!["a"])
        }
    }
}
