//! Print the JSON Schema of `DiagramSpec`.
//!
//! Upstream generators can hand this schema to a model as a structured output
//! format so the specs they produce deserialize cleanly.

use figura::schemars::schema_for;
use figura::DiagramSpec;

fn main() -> anyhow::Result<()> {
    let schema = schema_for!(DiagramSpec);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
