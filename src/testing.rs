//! Shared fixtures for reconciler tests

use crate::crd::{Size, WandbSpec, WeightsAndBiases};

pub const PARENT_UID: &str = "7f1c9a52-3c2e-4d0b-9d7e-5a3f0c1b2e44";

/// A parent resource named `wandb` in namespace `wandb`.
pub fn test_parent() -> WeightsAndBiases {
    parent_with(WandbSpec::default())
}

pub fn parent_with(spec: WandbSpec) -> WeightsAndBiases {
    let mut parent = WeightsAndBiases::new("wandb", spec);
    parent.metadata.namespace = Some("wandb".to_string());
    parent.metadata.uid = Some(PARENT_UID.to_string());
    parent.metadata.generation = Some(1);
    parent
}

pub fn small_parent() -> WeightsAndBiases {
    parent_with(WandbSpec {
        size: Size::Small,
        ..Default::default()
    })
}
