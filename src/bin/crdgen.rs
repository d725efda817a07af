//! Print the WeightsAndBiases CRD as YAML
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/weightsandbiases.yaml
//! ```

use kube::CustomResourceExt;
use wandb_infra_operator::WeightsAndBiases;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&WeightsAndBiases::crd())?);
    Ok(())
}
