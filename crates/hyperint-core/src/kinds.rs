//! Closed sets of dataset and target network identifiers.
//!
//! Experiment hyperparameters name both as strings. Parsing happens once, at
//! the boundary, and anything outside the known set is rejected with
//! [`HyperintError::UnsupportedDataset`] or
//! [`HyperintError::UnsupportedNetworkType`].

use crate::{HyperintError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Continual-learning benchmarks whose class layout is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetKind {
    /// Every task is MNIST under a fixed pixel permutation, 10 classes each.
    #[serde(rename = "PermutedMNIST")]
    PermutedMnist,
    /// MNIST split into five two-class tasks.
    #[serde(rename = "SplitMNIST")]
    SplitMnist,
    /// CIFAR-100 in the FeCAM class-incremental setup (large first task).
    #[serde(rename = "CIFAR100_FeCAM_setup")]
    Cifar100FeCam,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 3] = [
        DatasetKind::PermutedMnist,
        DatasetKind::SplitMnist,
        DatasetKind::Cifar100FeCam,
    ];

    /// Identifier used in experiment hyperparameters.
    pub fn name(&self) -> &'static str {
        match self {
            DatasetKind::PermutedMnist => "PermutedMNIST",
            DatasetKind::SplitMnist => "SplitMNIST",
            DatasetKind::Cifar100FeCam => "CIFAR100_FeCAM_setup",
        }
    }
}

impl FromStr for DatasetKind {
    type Err = HyperintError;

    fn from_str(s: &str) -> Result<Self> {
        DatasetKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| HyperintError::UnsupportedDataset(s.to_string()))
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Target network architectures whose weights a hypernetwork can generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkKind {
    /// Fully connected classifier with ReLU hidden layers.
    #[serde(rename = "MLP")]
    Mlp,
    /// Plain convolutional classifier (AlexNet-style).
    AlexNet,
    /// Frozen pretrained feature extractor with a generated linear head.
    PretrainedResNet18,
}

impl NetworkKind {
    pub const ALL: [NetworkKind; 3] = [
        NetworkKind::Mlp,
        NetworkKind::AlexNet,
        NetworkKind::PretrainedResNet18,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            NetworkKind::Mlp => "MLP",
            NetworkKind::AlexNet => "AlexNet",
            NetworkKind::PretrainedResNet18 => "PretrainedResNet18",
        }
    }
}

impl FromStr for NetworkKind {
    type Err = HyperintError;

    fn from_str(s: &str) -> Result<Self> {
        NetworkKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| HyperintError::UnsupportedNetworkType(s.to_string()))
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
