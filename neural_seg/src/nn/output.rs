//! Model output variants and the selector that picks the logits to segment with.
//!
//! Networks differ in what they return: plain logits, a pair of heads, or a
//! keyed map. Instead of inspecting the output type at run time, the caller
//! configures an [`OutputSelector`] and a mismatch is a hard error.

use std::collections::HashMap;
use std::fmt;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{NeuralSegError, Result};

/// What a segmentation network returns for a `[B, 1, W, H, D]` input.
#[derive(Debug, Clone)]
pub enum ModelOutput<B: Backend> {
    /// Single `[B, C, W, H, D]` logits tensor.
    Logits(Tensor<B, 5>),
    /// Two heads: an auxiliary head and the main logits.
    WithAuxiliary {
        /// Auxiliary head, e.g. a tanh-activated branch.
        auxiliary: Tensor<B, 5>,
        /// Main segmentation logits.
        logits: Tensor<B, 5>,
    },
    /// Named outputs.
    Keyed(HashMap<String, Tensor<B, 5>>),
}

impl<B: Backend> ModelOutput<B> {
    /// Short name of the variant, used in error messages.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Logits(_) => "logits",
            Self::WithAuxiliary { .. } => "two-head",
            Self::Keyed(_) => "keyed",
        }
    }
}

/// Which tensor of a [`ModelOutput`] feeds the softmax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutputSelector {
    /// The model returns plain logits.
    #[default]
    Logits,
    /// Main logits of a two-head output.
    Primary,
    /// Auxiliary head of a two-head output.
    Auxiliary,
    /// Named entry of a keyed output.
    Key(String),
}

impl OutputSelector {
    /// Extract the selected tensor.
    pub fn select<B: Backend>(&self, output: ModelOutput<B>) -> Result<Tensor<B, 5>> {
        let produced = output.variant_name();
        let picked = match (self, output) {
            (Self::Logits, ModelOutput::Logits(logits)) => Some(logits),
            (Self::Primary, ModelOutput::WithAuxiliary { logits, .. }) => Some(logits),
            (Self::Auxiliary, ModelOutput::WithAuxiliary { auxiliary, .. }) => Some(auxiliary),
            (Self::Key(key), ModelOutput::Keyed(mut map)) => map.remove(key),
            _ => None,
        };
        picked.ok_or_else(|| NeuralSegError::OutputMismatch {
            selector: self.to_string(),
            produced,
        })
    }
}

impl fmt::Display for OutputSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Logits => f.write_str("logits"),
            Self::Primary => f.write_str("primary"),
            Self::Auxiliary => f.write_str("auxiliary"),
            Self::Key(key) => write!(f, "key '{key}'"),
        }
    }
}

impl std::str::FromStr for OutputSelector {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "logits" => Ok(Self::Logits),
            "primary" => Ok(Self::Primary),
            "auxiliary" => Ok(Self::Auxiliary),
            other => match other.strip_prefix("key:") {
                Some(key) if !key.is_empty() => Ok(Self::Key(key.to_string())),
                _ => Err(format!("unknown output selector '{other}'")),
            },
        }
    }
}

/// A network mapping a `[B, 1, W, H, D]` patch batch to per-class outputs.
pub trait SegmentationModel<B: Backend> {
    /// Run the network.
    fn forward(&self, input: Tensor<B, 5>) -> ModelOutput<B>;
}
