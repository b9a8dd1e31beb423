//! Plan load helpers with schema + invariant validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;

use crate::plan::Plan;

/// JSON schema for plan documents.
pub const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");

/// Load and validate a plan from disk (schema + invariants).
pub fn load_plan(plan_path: &Path) -> Result<Plan> {
    let contents = fs::read_to_string(plan_path)
        .with_context(|| format!("read plan {}", plan_path.display()))?;
    parse_plan(&contents).with_context(|| format!("load plan {}", plan_path.display()))
}

/// Parse and validate a plan document.
pub fn parse_plan(contents: &str) -> Result<Plan> {
    let value: Value = serde_json::from_str(contents).context("parse plan json")?;
    validate_schema(&value)?;
    let mut plan: Plan = serde_json::from_value(value).context("deserialize plan")?;
    trim_steps(&mut plan);
    plan.validate()?;
    Ok(plan)
}

fn validate_schema(plan: &Value) -> Result<()> {
    let schema_value: Value = serde_json::from_str(PLAN_SCHEMA).context("parse plan schema")?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(plan) {
        let messages = compiled
            .iter_errors(plan)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "plan schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

fn trim_steps(plan: &mut Plan) {
    plan.header.generated_by = plan.header.generated_by.trim().to_string();
    let rounds = plan.rounds.iter_mut().flat_map(|round| {
        round
            .blast_step
            .iter_mut()
            .chain(round.align_step.iter_mut())
            .chain(round.hal2fasta_steps.iter_mut())
    });
    let steps = plan
        .preprocess
        .iter_mut()
        .chain(rounds)
        .chain(plan.hal_merges.iter_mut());
    for step in steps {
        step.raw = step.raw.trim().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::test_support::{cactus_round, plan_with_rounds, ramax_round, write_plan};

    /// Verifies write → load round-trip preserves the plan.
    #[test]
    fn load_and_write_plan_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("plan.json");
        let mut plan = plan_with_rounds(vec![cactus_round("Anc1"), ramax_round("Anc0")]);
        plan.rounds[1].subtree_mode = true;

        write_plan(&path, &plan).expect("write plan");
        let loaded = load_plan(&path).expect("load plan");
        assert_eq!(loaded, plan);
    }

    #[test]
    fn schema_rejects_unknown_step_kind() {
        let doc = r#"{
            "header": {"generated_by": "cactus-prepare", "date": "2024-01-01T00:00:00Z"},
            "out_seq_file": "seq.txt",
            "preprocess": [{"raw": "cactus-preprocess a b", "kind": "bogus"}]
        }"#;
        let err = parse_plan(doc).expect_err("schema error");
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn invariants_run_after_schema() {
        let doc = r#"{
            "header": {"generated_by": " cactus-prepare ", "date": "2024-01-01T00:00:00Z"},
            "out_seq_file": "seq.txt",
            "rounds": [{"name": "r", "root": "Anc0", "target_hal": "Anc0.hal"}]
        }"#;
        let err = parse_plan(doc).expect_err("invariant error");
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::MissingCactusSteps {
                round: "r".to_string()
            })
        );
    }

    #[test]
    fn raw_commands_are_trimmed_on_load() {
        let doc = r#"{
            "header": {"generated_by": "cactus-prepare", "date": "2024-01-01T00:00:00Z"},
            "out_seq_file": "seq.txt",
            "preprocess": [{"raw": "  cactus-preprocess js in.txt seq.txt \n", "kind": "preprocess"}]
        }"#;
        let plan = parse_plan(doc).expect("plan");
        assert_eq!(plan.preprocess[0].raw, "cactus-preprocess js in.txt seq.txt");
        assert_eq!(plan.fallback_policy, crate::plan::FallbackPolicy::UseCactus);
    }
}
