//! Target networks and hypernetworks for hyperint.
//!
//! Target networks hold an architecture but no weights; every forward pass
//! takes a weight collection produced by a [`Hypernetwork`] for some task.
//! [`run`] is the single entry point used by the evaluator: it checks the
//! weights against the declared parameter shapes before running.

pub mod conv;
pub mod hnet;
pub mod mlp;
pub mod network;
pub mod ops;
pub mod pretrained;

pub use conv::{ConvBlock, ConvClassifier, PoolSpec};
pub use hnet::{HmlpConfig, Hypernetwork, IntervalHmlp};
pub use mlp::Mlp;
pub use network::{build_target_network, run, TargetArchitecture, TargetNetwork};
pub use pretrained::{FeatureExtractor, IdentityExtractor, PretrainedHead};
