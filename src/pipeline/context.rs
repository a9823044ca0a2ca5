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

use tracing::trace;

use super::attributes::{AttributeMap, TypeKey};
use super::processor::{ProcessResult, ProcessorPipeline};
use crate::AppResult;

/// Per `process` call state: the attributes, the results collected so far and the consumption
/// marker stack.
///
/// A context is owned by exactly one `process` call. `process_also` runs the nested call with a
/// fresh context and only folds its results back, so nested processors can mark and un-mark
/// without touching the outer stack.
pub struct ProcessingContext<'p, D, R> {
    pipeline: &'p ProcessorPipeline<D, R>,
    attributes: AttributeMap,
    collected: Vec<R>,
    consumers: Vec<String>,
}

impl<'p, D, R> ProcessingContext<'p, D, R>
where
    D: Debug + Send + Sync + 'static,
    R: Clone + Debug + Send + Sync + 'static,
{
    pub(crate) fn new(pipeline: &'p ProcessorPipeline<D, R>, attributes: AttributeMap) -> Self {
        ProcessingContext {
            pipeline,
            attributes,
            collected: Vec::new(),
            consumers: Vec::new(),
        }
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub fn attribute<T: std::any::Any + Send + Sync>(&self, key: &TypeKey<T>) -> Option<&T> {
        self.attributes.get(key)
    }

    pub fn collect(&mut self, result: R) {
        trace!(pipeline = self.pipeline.name(), ?result, "collect");
        self.collected.push(result);
    }

    pub fn collect_all(&mut self, results: impl IntoIterator<Item = R>) {
        for result in results {
            self.collect(result);
        }
    }

    pub fn collected(&self) -> &[R] {
        &self.collected
    }

    pub fn is_consumed(&self) -> bool {
        !self.consumers.is_empty()
    }

    pub fn mark_consumed(&mut self, marker: impl Into<String>) {
        let marker = marker.into();
        trace!(pipeline = self.pipeline.name(), %marker, "mark consumed");
        self.consumers.push(marker);
    }

    /// Pops the top marker only when it is `marker`. Markers pushed by someone else stay.
    pub fn mark_not_consumed(&mut self, marker: &str) {
        if self.consumers.last().map(String::as_str) == Some(marker) {
            self.consumers.pop();
            trace!(pipeline = self.pipeline.name(), marker, "mark not consumed: popped");
        } else {
            trace!(pipeline = self.pipeline.name(), marker, "mark not consumed: not on top");
        }
    }

    /// Runs the whole pipeline again on `data` derived from the current input.
    ///
    /// The nested call sees the current attributes overlaid with `extra`. Its results are
    /// appended to this context and returned to the caller as well.
    pub async fn process_also(
        &mut self,
        data: D,
        extra: AttributeMap,
    ) -> AppResult<ProcessResult<R>> {
        let attributes = self.attributes.merged(&extra);
        trace!(pipeline = self.pipeline.name(), ?data, "process also");
        let result = self.pipeline.process(data, attributes).await?;
        self.collected.extend(result.collected.iter().cloned());
        Ok(result)
    }

    pub(crate) fn collected_len(&self) -> usize {
        self.collected.len()
    }

    pub(crate) fn into_result(self) -> ProcessResult<R> {
        ProcessResult {
            is_consumed: !self.consumers.is_empty(),
            collected: self.collected,
        }
    }
}
