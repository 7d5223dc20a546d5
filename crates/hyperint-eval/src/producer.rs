//! Interval logits of a test batch under one candidate task's weights.

use hyperint_core::{
    stack_interval_logits, GeneratedWeights, HyperintError, IntervalSlot, NetworkKind, Result,
};
use hyperint_nets::{run, Hypernetwork, TargetNetwork};
use ndarray::{Array2, Array3, ArrayD};
use tracing::trace;

/// Produces `[lower, middle, upper]` logits for every candidate task.
///
/// Holds the trained hypernetwork, its weights and the target network for
/// one model, plus the interval settings used to generate target weights.
pub struct IntervalLogitProducer<'a> {
    hypernetwork: &'a dyn Hypernetwork,
    hypernetwork_weights: &'a [ArrayD<f32>],
    target_network: &'a dyn TargetNetwork,
    alpha: f32,
    full_interval: bool,
}

impl<'a> IntervalLogitProducer<'a> {
    /// Bind a producer to one trained model.
    ///
    /// `target_network_type` is the declared network name. It must parse to
    /// a known kind (`UnsupportedNetworkType` otherwise) and agree with the
    /// network that was actually built.
    pub fn new(
        hypernetwork: &'a dyn Hypernetwork,
        hypernetwork_weights: &'a [ArrayD<f32>],
        target_network: &'a dyn TargetNetwork,
        target_network_type: &str,
        alpha: f32,
        full_interval: bool,
    ) -> Result<Self> {
        let declared: NetworkKind = target_network_type.parse()?;
        if declared != target_network.kind() {
            return Err(HyperintError::InvalidSpec(format!(
                "Declared target network {} but the loaded network is {}",
                declared,
                target_network.kind()
            )));
        }
        Ok(Self {
            hypernetwork,
            hypernetwork_weights,
            target_network,
            alpha,
            full_interval,
        })
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn full_interval(&self) -> bool {
        self.full_interval
    }

    /// Interval logits of `input` under the weights generated for `task`.
    ///
    /// Returns shape `(num_samples, 3, num_outputs)`. With a point estimate
    /// (`full_interval` unset) the target network runs once and the three
    /// slots are identical.
    pub fn produce(&self, task: usize, input: &Array2<f32>) -> Result<Array3<f32>> {
        let weights = self.hypernetwork.generate(
            self.hypernetwork_weights,
            task,
            self.alpha,
            self.full_interval,
        )?;
        trace!(
            task,
            interval = weights.is_interval(),
            samples = input.nrows(),
            "Producing candidate logits"
        );

        match &weights {
            GeneratedWeights::Point(point) => {
                let logits = run(self.target_network, point, input)?;
                stack_interval_logits(&logits, &logits, &logits)
            }
            GeneratedWeights::Interval { .. } => {
                let [lower, middle, upper] = IntervalSlot::ALL
                    .map(|slot| run(self.target_network, weights.slot(slot), input));
                stack_interval_logits(&lower?, &middle?, &upper?)
            }
        }
    }
}
