use kube::CustomResourceExt;
use serin::crd::release::Release;

// cargo run --bin gen-crd > deploy/crd.json
fn main() -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&Release::crd())?);
    Ok(())
}
