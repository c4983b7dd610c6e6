//! Deployment-specific step logic.

use futures::future::BoxFuture;
use std::sync::Arc;

use crate::context::RunContext;
use crate::error::StepError;
use crate::step::StepControl;

type CustomFn = dyn Fn(RunContext, StepControl) -> BoxFuture<'static, Result<(), StepError>>
    + Send
    + Sync;

/// Escape hatch for logic that has no dedicated step body, injected as an
/// async closure. The closure receives its own context and control clones
/// and is expected to honor stop and pause like any built-in body.
pub struct CustomAction {
    func: Arc<CustomFn>,
}

impl CustomAction {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(RunContext, StepControl) -> BoxFuture<'static, Result<(), StepError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }

    pub(crate) async fn run(
        &self,
        ctx: &RunContext,
        control: &StepControl,
    ) -> Result<(), StepError> {
        (self.func)(ctx.clone(), control.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_context;

    #[tokio::test]
    async fn test_closure_result_is_passed_through() {
        let ctx = test_context();
        let (_tx, control) = StepControl::channel();

        let ok = CustomAction::new(|_, _| Box::pin(async { Ok(()) }));
        assert!(ok.run(&ctx, &control).await.is_ok());

        let err = CustomAction::new(|_, _| {
            Box::pin(async { Err(StepError::Collaborator(anyhow::anyhow!("his push failed"))) })
        });
        assert!(err.run(&ctx, &control).await.is_err());
    }
}
