use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::{cancel::CancelSignal, errors::ErrorTaxonomy};

#[async_trait]
pub trait Stage<T, E>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, input: T, signal: &CancelSignal) -> Result<T, E>;
}

/// Ordered chain of stages. The first failure stops the chain and is
/// returned as-is.
pub struct Pipeline<T, E> {
    stages: Vec<Arc<dyn Stage<T, E>>>,
}

impl<T, E> Clone for Pipeline<T, E> {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.clone(),
        }
    }
}

impl<T, E> Default for Pipeline<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Pipeline<T, E> {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn with_stage(mut self, stage: impl Stage<T, E> + 'static) -> Self {
        self.stages.push(Arc::new(stage));

        self
    }

    pub fn push(&mut self, stage: Arc<dyn Stage<T, E>>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }
}

impl<T, E> Pipeline<T, E>
where
    T: Send,
    E: ErrorTaxonomy,
{
    pub async fn run(&self, input: T, signal: &CancelSignal) -> Result<T, E> {
        let mut value = input;

        for (position, stage) in self.stages.iter().enumerate() {
            if signal.is_cancelled() {
                debug!("Cancelled before stage {}", stage.name());
                return Err(E::cancelled());
            }

            trace!("Running stage {}", stage.name());

            value = match stage.run(value, signal).await {
                Ok(value) => value,
                Err(err) => {
                    debug!(
                        "Stage {} failed, skipping {} downstream stage(s)",
                        stage.name(),
                        self.stages.len() - position - 1
                    );

                    return Err(err);
                }
            };
        }

        Ok(value)
    }
}
