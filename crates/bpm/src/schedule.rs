//! Ordered pause/action schedules.
//!
//! A schedule is a `/`-delimited string like `"term/15/quit/5"`: integer
//! tokens pause for that many seconds, everything else names an action the
//! caller supplies at run time. The lifecycle uses this to drive graceful
//! shutdown escalation, but the engine itself knows nothing about
//! containers.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// One parsed schedule step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Pause(Duration),
    Action(String),
}

/// A boxed asynchronous action invoked by name.
pub type Action = Box<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Named actions a schedule can invoke.
pub type ActionMap = HashMap<String, Action>;

/// Options for a schedule run.
#[derive(Default)]
pub struct RunOptions {
    /// Always invoked before `run` returns; its failure overrides any
    /// earlier error.
    pub on_exit: Option<Action>,
}

/// A parsed, stateless schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    steps: Vec<Step>,
}

impl Schedule {
    /// Parse a `/`-delimited schedule. Integer tokens become pauses in
    /// seconds, other tokens become actions, empty tokens are ignored.
    /// Parsing never fails; unknown actions surface at run time.
    pub fn parse(schedule: &str) -> Self {
        let steps = schedule
            .split('/')
            .filter(|token| !token.is_empty())
            .map(|token| match token.parse::<u64>() {
                Ok(secs) => Step::Pause(Duration::from_secs(secs)),
                Err(_) => Step::Action(token.to_string()),
            })
            .collect();
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Execute the steps strictly in order on the calling task.
    ///
    /// A pause races its duration against `token`; cancellation ends the
    /// run early without error. An action missing from `actions` fails
    /// with `UnknownAction`. The first failing step aborts the remainder.
    /// The `on_exit` finalizer, when present, always runs.
    pub async fn run(
        &self,
        token: &CancellationToken,
        actions: &ActionMap,
        options: RunOptions,
    ) -> Result<()> {
        let mut result = Ok(());

        for step in &self.steps {
            match step {
                Step::Pause(duration) => {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(*duration) => {}
                    }
                }
                Step::Action(key) => {
                    let Some(action) = actions.get(key) else {
                        result = Err(Error::UnknownAction(key.clone()));
                        break;
                    };
                    if let Err(err) = action().await {
                        result = Err(err);
                        break;
                    }
                }
            }
        }

        if let Some(finalizer) = options.on_exit
            && let Err(err) = finalizer().await
        {
            result = Err(err);
        }

        result
    }
}

/// Box a closure returning a future into a schedule action.
pub fn action<F, Fut>(f: F) -> Action
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}
