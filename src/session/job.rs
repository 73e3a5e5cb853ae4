//! MaterializeJob: the remote half of one Apply
//!
//! A job owns snapshots of its input cohorts and everything it needs to talk to the
//! service, so it can run while the controller keeps handling intents. Every bin is
//! materialized concurrently; the first failure fails the whole job.

use super::cancel::Token;
use super::config::ControllerConfig;
use super::controller::{SessionError, SessionResult};
use crate::fetch::CohortFetcher;
use crate::filter::{AttributeConstraint, MaterializationEngine};
use crate::graph::{Cohort, ElementId};
use tokio::task::JoinSet;

/// One input cohort and the bins requested for it
#[derive(Debug, Clone)]
pub struct JobInput {
    pub cohort: Cohort,
    pub bins: Vec<Vec<AttributeConstraint>>,
}

/// Outputs produced for one input, ordered for display
#[derive(Debug, Clone)]
pub struct InputOutputs {
    pub input: ElementId,
    pub outputs: Vec<Cohort>,
}

/// What a finished job hands back to the controller
#[derive(Debug)]
pub struct MaterializeOutcome {
    pub token: Token,
    pub result: SessionResult<Vec<InputOutputs>>,
}

/// Work of one Apply, detached from the controller
#[derive(Debug)]
pub struct MaterializeJob {
    token: Token,
    engine: MaterializationEngine,
    fetcher: CohortFetcher,
    config: ControllerConfig,
    inputs: Vec<JobInput>,
}

impl MaterializeJob {
    pub(crate) fn new(
        token: Token,
        engine: MaterializationEngine,
        fetcher: CohortFetcher,
        config: ControllerConfig,
        inputs: Vec<JobInput>,
    ) -> Self {
        Self {
            token,
            engine,
            fetcher,
            config,
            inputs,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn inputs(&self) -> &[JobInput] {
        &self.inputs
    }

    pub async fn run(self) -> MaterializeOutcome {
        let token = self.token;
        let result = self.materialize_all().await;
        MaterializeOutcome { token, result }
    }

    async fn materialize_all(self) -> SessionResult<Vec<InputOutputs>> {
        let mut set = JoinSet::new();
        for (input_idx, input) in self.inputs.iter().enumerate() {
            for (bin_idx, constraints) in input.bins.iter().enumerate() {
                let engine = self.engine.clone();
                let fetcher = self.fetcher.clone();
                let cohort = input.cohort.clone();
                let constraints = constraints.clone();
                let config = self.config.clone();
                set.spawn(async move {
                    let mut output = engine.materialize(&cohort, &constraints).await?;
                    let size = if config.fetch_output_sizes {
                        Some(fetcher.size(&mut output).await?)
                    } else {
                        None
                    };
                    output.selected = match size {
                        Some(size) if config.auto_select_nonempty => size > 0,
                        _ => true,
                    };
                    Ok::<_, SessionError>((input_idx, bin_idx, output))
                });
            }
        }

        let mut slots: Vec<Vec<Option<Cohort>>> = self
            .inputs
            .iter()
            .map(|i| vec![None; i.bins.len()])
            .collect();
        while let Some(joined) = set.join_next().await {
            let (input_idx, bin_idx, output) =
                joined.map_err(|e| SessionError::Join(e.to_string()))??;
            if let Some(slot) = slots
                .get_mut(input_idx)
                .and_then(|bins| bins.get_mut(bin_idx))
            {
                *slot = Some(output);
            }
        }

        let mut results = Vec::with_capacity(self.inputs.len());
        for (input, outputs) in self.inputs.iter().zip(slots) {
            let mut outputs: Vec<Cohort> = outputs.into_iter().flatten().collect();
            if self.config.sort_outputs {
                outputs.sort_by_key(|c| c.label());
            }
            tracing::debug!(token = %self.token, input = %input.cohort.id, outputs = outputs.len(), "input materialized");
            results.push(InputOutputs {
                input: input.cohort.id.clone(),
                outputs,
            });
        }
        Ok(results)
    }
}
