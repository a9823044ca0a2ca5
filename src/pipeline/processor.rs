// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{trace, warn};

use super::attributes::AttributeMap;
use super::context::ProcessingContext;
use super::{FailurePolicy, PipelineConfig};
use crate::{AppError, AppResult};

/// A unit of decoding logic. Implementations hold no per-input state; everything an
/// invocation learns goes into the context.
#[async_trait]
pub trait Processor<D, R>: Send + Sync {
    /// Used for diagnostics, `replace_processor` and as the default consumption marker.
    fn name(&self) -> &str;

    async fn process(&self, context: &mut ProcessingContext<'_, D, R>, data: &D) -> AppResult<()>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessResult<R> {
    pub collected: Vec<R>,
    pub is_consumed: bool,
}

struct ProcessorEntry<D, R> {
    id: u64,
    processor: Arc<dyn Processor<D, R>>,
}

impl<D, R> Clone for ProcessorEntry<D, R> {
    fn clone(&self) -> Self {
        ProcessorEntry {
            id: self.id,
            processor: self.processor.clone(),
        }
    }
}

type ProcessorList<D, R> = RwLock<Vec<ProcessorEntry<D, R>>>;

/// An ordered chain of processors.
///
/// Every `process` call works on a snapshot of the list taken when it starts, so registering or
/// disposing processors concurrently never disturbs an iteration in progress; the change is
/// visible to the next call.
pub struct ProcessorPipeline<D, R> {
    name: String,
    config: PipelineConfig,
    processors: Arc<ProcessorList<D, R>>,
    next_id: AtomicU64,
}

impl<D, R> ProcessorPipeline<D, R>
where
    D: Debug + Send + Sync + 'static,
    R: Clone + Debug + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, config: PipelineConfig) -> Self {
        ProcessorPipeline {
            name: name.into(),
            config,
            processors: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Appends `processor`; it runs after everything registered before it.
    pub fn register(&self, processor: Arc<dyn Processor<D, R>>) -> ProcessorRegistration<D, R> {
        let entry = self.entry(processor);
        let registration = self.registration(entry.id);
        self.processors.write().push(entry);
        registration
    }

    /// Inserts `processor` in front of every registered one.
    pub fn register_first(
        &self,
        processor: Arc<dyn Processor<D, R>>,
    ) -> ProcessorRegistration<D, R> {
        let entry = self.entry(processor);
        let registration = self.registration(entry.id);
        self.processors.write().insert(0, entry);
        registration
    }

    /// Swaps the first processor called `name` for `processor`, keeping its position. The
    /// registration handle of the old processor now removes the new one.
    pub fn replace_processor(&self, name: &str, processor: Arc<dyn Processor<D, R>>) -> bool {
        let mut processors = self.processors.write();
        match processors.iter_mut().find(|e| e.processor.name() == name) {
            Some(entry) => {
                entry.processor = processor;
                true
            }
            None => false,
        }
    }

    pub fn processor_names(&self) -> Vec<String> {
        self.processors
            .read()
            .iter()
            .map(|e| e.processor.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.processors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.read().is_empty()
    }

    /// Runs every registered processor on `data` in registration order.
    pub async fn process(&self, data: D, attributes: AttributeMap) -> AppResult<ProcessResult<R>> {
        let mut context = ProcessingContext::new(self, attributes);
        self.run(&mut context, &data).await?;
        let result = context.into_result();
        trace!(
            pipeline = %self.name,
            collected = result.collected.len(),
            consumed = result.is_consumed,
            "process finished"
        );
        Ok(result)
    }

    async fn run(&self, context: &mut ProcessingContext<'_, D, R>, data: &D) -> AppResult<()> {
        let snapshot: Vec<ProcessorEntry<D, R>> = self.processors.read().clone();
        trace!(pipeline = %self.name, processors = snapshot.len(), ?data, "process");

        for entry in snapshot {
            let processor = entry.processor.as_ref();
            let before = context.collected_len();
            let result = processor.process(context, data).await;
            trace!(
                pipeline = %self.name,
                processor = processor.name(),
                success = result.is_ok(),
                consumed = context.is_consumed(),
                added = context.collected_len() - before,
                "processor finished"
            );

            if let Err(error) = result {
                match self.config.failure_policy {
                    FailurePolicy::Propagate => {
                        return Err(attribute_failure(processor.name(), data, error));
                    }
                    FailurePolicy::LogAndContinue => {
                        warn!(
                            pipeline = %self.name,
                            processor = processor.name(),
                            ?data,
                            "processor failed, continuing: {}",
                            error
                        );
                    }
                }
            }

            if self.config.stop_when_consumed && context.is_consumed() {
                trace!(pipeline = %self.name, processor = processor.name(), "consumed, stop");
                break;
            }
        }
        Ok(())
    }

    fn entry(&self, processor: Arc<dyn Processor<D, R>>) -> ProcessorEntry<D, R> {
        ProcessorEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            processor,
        }
    }

    fn registration(&self, id: u64) -> ProcessorRegistration<D, R> {
        ProcessorRegistration {
            id,
            processors: Arc::downgrade(&self.processors),
        }
    }
}

// keep the innermost attribution when a nested process_also already failed
fn attribute_failure<D: Debug>(processor: &str, data: &D, error: AppError) -> AppError {
    match error {
        AppError::ProcessorFailed { .. } => error,
        other => AppError::ProcessorFailed {
            processor: processor.to_string(),
            input: format!("{:?}", data),
            message: other.to_string(),
        },
    }
}

/// Returned by `register`; `dispose` removes the processor from its pipeline.
///
/// Dropping the handle without disposing keeps the processor registered.
pub struct ProcessorRegistration<D, R> {
    id: u64,
    processors: Weak<ProcessorList<D, R>>,
}

impl<D, R> ProcessorRegistration<D, R> {
    /// Returns false when the processor was already gone or the pipeline was dropped.
    pub fn dispose(self) -> bool {
        let Some(processors) = self.processors.upgrade() else {
            return false;
        };
        let mut processors = processors.write();
        let before = processors.len();
        processors.retain(|e| e.id != self.id);
        before != processors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TypeKey;
    use rstest::{fixture, rstest};

    #[derive(Debug, Clone, PartialEq)]
    enum Input {
        Tagged(&'static str),
        Nested(&'static str),
    }

    const KEY_DEPTH: TypeKey<u32> = TypeKey::new("depth");

    /// Claims inputs tagged `tag` and produces `output`.
    struct Claim {
        name: String,
        tag: &'static str,
        output: &'static str,
    }

    fn claim(tag: &'static str, output: &'static str) -> Arc<dyn Processor<Input, String>> {
        Arc::new(Claim {
            name: format!("claim-{}", tag),
            tag,
            output,
        })
    }

    #[async_trait]
    impl Processor<Input, String> for Claim {
        fn name(&self) -> &str {
            &self.name
        }

        async fn process(
            &self,
            context: &mut ProcessingContext<'_, Input, String>,
            data: &Input,
        ) -> AppResult<()> {
            if *data == Input::Tagged(self.tag) {
                context.collect(self.output.to_string());
                context.mark_consumed(self.name.clone());
            }
            Ok(())
        }
    }

    /// Records its name into the results for every input.
    struct Recorder(&'static str);

    #[async_trait]
    impl Processor<Input, String> for Recorder {
        fn name(&self) -> &str {
            self.0
        }

        async fn process(
            &self,
            context: &mut ProcessingContext<'_, Input, String>,
            _data: &Input,
        ) -> AppResult<()> {
            context.collect(self.0.to_string());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Processor<Input, String> for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn process(
            &self,
            _context: &mut ProcessingContext<'_, Input, String>,
            _data: &Input,
        ) -> AppResult<()> {
            Err(AppError::InvalidValue("broken decoder".to_string()))
        }
    }

    /// Unwraps `Nested(tag)` into `Tagged(tag)` and re-enters the pipeline.
    struct Unwrap;

    #[async_trait]
    impl Processor<Input, String> for Unwrap {
        fn name(&self) -> &str {
            "unwrap"
        }

        async fn process(
            &self,
            context: &mut ProcessingContext<'_, Input, String>,
            data: &Input,
        ) -> AppResult<()> {
            if let Input::Nested(tag) = data {
                let depth = context.attribute(&KEY_DEPTH).copied().unwrap_or(0);
                let nested = context
                    .process_also(
                        Input::Tagged(tag),
                        AttributeMap::new().with(KEY_DEPTH, depth + 1),
                    )
                    .await?;
                assert_eq!(nested.collected.len(), 1);
                context.collect(format!("unwrapped:{}", nested.collected.join(",")));
            }
            Ok(())
        }
    }

    /// Marks consumed then takes it back, leaving the stack as it found it.
    struct Hesitant;

    #[async_trait]
    impl Processor<Input, String> for Hesitant {
        fn name(&self) -> &str {
            "hesitant"
        }

        async fn process(
            &self,
            context: &mut ProcessingContext<'_, Input, String>,
            _data: &Input,
        ) -> AppResult<()> {
            context.mark_consumed("hesitant");
            context.mark_not_consumed("hesitant");
            Ok(())
        }
    }

    /// Tries to un-mark someone else's marker.
    struct Meddler;

    #[async_trait]
    impl Processor<Input, String> for Meddler {
        fn name(&self) -> &str {
            "meddler"
        }

        async fn process(
            &self,
            context: &mut ProcessingContext<'_, Input, String>,
            _data: &Input,
        ) -> AppResult<()> {
            context.mark_not_consumed("meddler");
            Ok(())
        }
    }

    #[fixture]
    fn pipeline() -> ProcessorPipeline<Input, String> {
        ProcessorPipeline::new("test", PipelineConfig::default())
    }

    #[rstest]
    #[tokio::test]
    async fn claims_only_matching_input(pipeline: ProcessorPipeline<Input, String>) {
        pipeline.register(claim("X", "a"));
        pipeline.register(claim("Y", "b"));

        let x = pipeline
            .process(Input::Tagged("X"), AttributeMap::new())
            .await
            .unwrap();
        assert_eq!(x.collected, vec!["a".to_string()]);
        assert!(x.is_consumed);

        let z = pipeline
            .process(Input::Tagged("Z"), AttributeMap::new())
            .await
            .unwrap();
        assert!(z.collected.is_empty());
        assert!(!z.is_consumed);
    }

    #[rstest]
    #[tokio::test]
    async fn runs_in_registration_order(pipeline: ProcessorPipeline<Input, String>) {
        pipeline.register(Arc::new(Recorder("first")));
        let second = pipeline.register(Arc::new(Recorder("second")));
        pipeline.register(Arc::new(Recorder("third")));
        pipeline.register_first(Arc::new(Recorder("zeroth")));

        let result = pipeline
            .process(Input::Tagged("any"), AttributeMap::new())
            .await
            .unwrap();
        assert_eq!(result.collected, vec!["zeroth", "first", "second", "third"]);

        assert!(second.dispose());
        let result = pipeline
            .process(Input::Tagged("any"), AttributeMap::new())
            .await
            .unwrap();
        assert_eq!(result.collected, vec!["zeroth", "first", "third"]);
    }

    #[rstest]
    #[tokio::test]
    async fn dispose_twice_is_harmless(pipeline: ProcessorPipeline<Input, String>) {
        let a = pipeline.register(Arc::new(Recorder("a")));
        let b = pipeline.register(Arc::new(Recorder("b")));
        assert!(a.dispose());
        assert_eq!(pipeline.processor_names(), vec!["b"]);
        assert!(b.dispose());
        assert!(pipeline.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn replace_keeps_position(pipeline: ProcessorPipeline<Input, String>) {
        pipeline.register(Arc::new(Recorder("a")));
        let b = pipeline.register(Arc::new(Recorder("b")));
        pipeline.register(Arc::new(Recorder("c")));

        assert!(pipeline.replace_processor("b", Arc::new(Recorder("b2"))));
        assert!(!pipeline.replace_processor("missing", Arc::new(Recorder("x"))));
        assert_eq!(pipeline.processor_names(), vec!["a", "b2", "c"]);

        // the old handle now owns the replacement
        assert!(b.dispose());
        assert_eq!(pipeline.processor_names(), vec!["a", "c"]);
    }

    #[rstest]
    #[tokio::test]
    async fn failure_propagates_by_default(pipeline: ProcessorPipeline<Input, String>) {
        pipeline.register(Arc::new(Recorder("before")));
        pipeline.register(Arc::new(Failing));
        pipeline.register(Arc::new(Recorder("after")));

        let error = pipeline
            .process(Input::Tagged("X"), AttributeMap::new())
            .await
            .unwrap_err();
        match error {
            AppError::ProcessorFailed {
                processor,
                input,
                message,
            } => {
                assert_eq!(processor, "failing");
                assert_eq!(input, "Tagged(\"X\")");
                assert!(message.contains("broken decoder"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_can_be_logged_and_skipped() {
        let pipeline = ProcessorPipeline::new(
            "lenient",
            PipelineConfig {
                failure_policy: FailurePolicy::LogAndContinue,
                ..Default::default()
            },
        );
        pipeline.register(Arc::new(Failing));
        pipeline.register(Arc::new(Recorder("after")));

        let result = pipeline
            .process(Input::Tagged("X"), AttributeMap::new())
            .await
            .unwrap();
        assert_eq!(result.collected, vec!["after"]);
    }

    #[tokio::test]
    async fn stop_when_consumed() {
        let pipeline = ProcessorPipeline::new(
            "stopping",
            PipelineConfig {
                stop_when_consumed: true,
                ..Default::default()
            },
        );
        pipeline.register(claim("X", "a"));
        pipeline.register(Arc::new(Recorder("late")));

        let consumed = pipeline
            .process(Input::Tagged("X"), AttributeMap::new())
            .await
            .unwrap();
        assert_eq!(consumed.collected, vec!["a"]);

        let unconsumed = pipeline
            .process(Input::Tagged("Y"), AttributeMap::new())
            .await
            .unwrap();
        assert_eq!(unconsumed.collected, vec!["late"]);
    }

    #[rstest]
    #[tokio::test]
    async fn process_also_folds_results(pipeline: ProcessorPipeline<Input, String>) {
        pipeline.register(Arc::new(Unwrap));
        pipeline.register(claim("X", "a"));

        let result = pipeline
            .process(Input::Nested("X"), AttributeMap::new())
            .await
            .unwrap();
        // nested result folded in first, then the unwrapper's own result
        assert_eq!(result.collected, vec!["a", "unwrapped:a"]);
        // the nested claim consumed only the nested context
        assert!(!result.is_consumed);
    }

    #[rstest]
    #[tokio::test]
    async fn marker_stack_semantics(pipeline: ProcessorPipeline<Input, String>) {
        pipeline.register(Arc::new(Hesitant));
        pipeline.register(claim("X", "a"));
        pipeline.register(Arc::new(Meddler));
        pipeline.register(Arc::new(Hesitant));

        let result = pipeline
            .process(Input::Tagged("X"), AttributeMap::new())
            .await
            .unwrap();
        assert!(result.is_consumed);
        assert_eq!(result.collected, vec!["a"]);
    }

    struct SelfExtending {
        pipeline: Weak<ProcessorPipeline<Input, String>>,
    }

    #[async_trait]
    impl Processor<Input, String> for SelfExtending {
        fn name(&self) -> &str {
            "self-extending"
        }

        async fn process(
            &self,
            context: &mut ProcessingContext<'_, Input, String>,
            _data: &Input,
        ) -> AppResult<()> {
            if let Some(pipeline) = self.pipeline.upgrade() {
                pipeline.register(Arc::new(Recorder("added-late")));
            }
            context.collect("extended".to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn registration_during_process_applies_to_next_call() {
        let pipeline = Arc::new(ProcessorPipeline::new("growing", PipelineConfig::default()));
        let registration = pipeline.register(Arc::new(SelfExtending {
            pipeline: Arc::downgrade(&pipeline),
        }));

        let first = pipeline
            .process(Input::Tagged("X"), AttributeMap::new())
            .await
            .unwrap();
        assert_eq!(first.collected, vec!["extended"]);

        assert!(registration.dispose());
        let second = pipeline
            .process(Input::Tagged("X"), AttributeMap::new())
            .await
            .unwrap();
        assert_eq!(second.collected, vec!["added-late"]);
    }
}
