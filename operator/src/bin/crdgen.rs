//! Writes every CRD's OpenAPI schema to `../crds/` as YAML, one file per
//! kind. Run with `cargo run --bin crdgen` from the `operator` crate.

use kube::CustomResourceExt;
use krkn_types::{ConfigRequest, Provider, ScenarioRun, Target, TargetRequest};
use std::fs;

fn main() {
    let _ = fs::create_dir("../crds");
    let crds: &[(&str, serde_yaml::Value)] = &[
        ("provider", serde_yaml::to_value(Provider::crd()).unwrap()),
        ("target", serde_yaml::to_value(Target::crd()).unwrap()),
        (
            "target_request",
            serde_yaml::to_value(TargetRequest::crd()).unwrap(),
        ),
        (
            "config_request",
            serde_yaml::to_value(ConfigRequest::crd()).unwrap(),
        ),
        (
            "scenario_run",
            serde_yaml::to_value(ScenarioRun::crd()).unwrap(),
        ),
    ];
    for (name, crd) in crds {
        let path = format!("../crds/krkn.krkn-chaos.dev_{name}.yaml");
        fs::write(&path, serde_yaml::to_string(crd).unwrap()).unwrap();
        println!("wrote {path}");
    }
}
