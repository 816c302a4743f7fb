use crate::{
    activity::{Activity, ErasedActivity},
    context::WorkflowContext,
    error::WorkflowError,
};
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::{collections::HashMap, sync::Arc};

/// How a workflow execution ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowExit<I> {
    Completed,
    /// Start a fresh execution of the same run with this input and an empty
    /// history.
    ContinueAsNew(I),
}

/// Deterministic orchestration code driven by the host.
///
/// `run` may be invoked many times for one execution: after a crash or a
/// restart the host replays recorded results into a fresh call. Everything
/// with a side effect or a clock must go through the [`WorkflowContext`].
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    type Input: Serialize + DeserializeOwned + Send + Sync + 'static;

    const NAME: &'static str;

    async fn run(
        &self,
        ctx: &mut WorkflowContext,
        input: Self::Input,
    ) -> Result<WorkflowExit<Self::Input>, WorkflowError>;
}

#[async_trait]
pub(crate) trait ErasedWorkflow: Send + Sync {
    async fn run_erased(
        &self,
        ctx: &mut WorkflowContext,
        input: &[u8],
    ) -> Result<WorkflowExit<Vec<u8>>, WorkflowError>;
}

#[async_trait]
impl<W: Workflow> ErasedWorkflow for W {
    async fn run_erased(
        &self,
        ctx: &mut WorkflowContext,
        input: &[u8],
    ) -> Result<WorkflowExit<Vec<u8>>, WorkflowError> {
        let input: W::Input = serde_json::from_slice(input)?;
        match self.run(ctx, input).await? {
            WorkflowExit::Completed => Ok(WorkflowExit::Completed),
            WorkflowExit::ContinueAsNew(next) => {
                Ok(WorkflowExit::ContinueAsNew(serde_json::to_vec(&next)?))
            }
        }
    }
}

/// Workflows and activities a worker can execute, by name.
#[derive(Default, Clone)]
pub(crate) struct Registry {
    pub(crate) workflows: HashMap<String, Arc<dyn ErasedWorkflow>>,
    pub(crate) activities: HashMap<String, Arc<dyn ErasedActivity>>,
}

impl Registry {
    pub(crate) fn add_workflow<W: Workflow>(&mut self, workflow: W) {
        self.workflows
            .insert(W::NAME.to_string(), Arc::new(workflow));
    }

    pub(crate) fn add_activity<A: Activity>(&mut self, activity: A) {
        self.activities
            .insert(A::NAME.to_string(), Arc::new(activity));
    }

    pub(crate) fn workflow(&self, name: &str) -> Option<Arc<dyn ErasedWorkflow>> {
        self.workflows.get(name).cloned()
    }
}
