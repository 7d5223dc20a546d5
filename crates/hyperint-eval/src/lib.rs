//! Task-agnostic evaluation of interval hypernetwork classifiers.
//!
//! A model trained with known task identities is evaluated without them:
//! every candidate task's generated weights classify the test batch, the
//! candidate whose interval logits are least uncertain claims the sample,
//! and its prediction is translated into a global class label.
//!
//! Pipeline per evaluated task:
//!
//! 1. [`IntervalLogitProducer`]: `(samples, 3, outputs)` logits per candidate
//! 2. [`scorer::uncertainty`]: entropy (vanilla or interval-weighted)
//! 3. [`select::select_task`]: argmin over candidates
//! 4. [`ClassTranslator`]: relative class to global label
//! 5. [`Evaluator`]: task and class accuracy rows

pub mod bundle;
pub mod data;
pub mod driver;
pub mod producer;
pub mod results;
pub mod scorer;
pub mod select;
pub mod translate;

pub use bundle::{load_bundle, BundleFile};
pub use data::{InMemoryTestSets, TestSet, TestSetProvider};
pub use driver::{EvaluationConfig, Evaluator, ExperimentBundle, Hyperparameters};
pub use producer::IntervalLogitProducer;
pub use results::{AlphaSummary, ModelSummary, ResultTable, TaskAccuracy};
pub use select::{ParallelConfig, SamplePrediction};
pub use translate::{ClassTranslator, PermutedLayout};
