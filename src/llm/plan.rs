//! Plan-pass artifact and its strict validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

/// Number of takeaways a plan must contain.
pub const TAKEAWAY_COUNT: usize = 2;

/// One evidence-backed statement the generate pass should cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Takeaway {
    /// Statement text.
    pub statement: String,
    /// Supporting chunk ids, all drawn from the context group.
    pub evidence_chunks: Vec<String>,
}

/// Validated output of the plan pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanResult {
    /// Exactly two takeaways.
    pub takeaways: Vec<Takeaway>,
    /// Whether the context contains equations.
    pub has_equations: bool,
    /// Equations quoted from the context.
    pub equations: Vec<String>,
    /// Reviewer-style notes.
    pub self_check: Vec<String>,
}

/// Schema violations in a plan response.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// Top-level value was not an object.
    #[error("plan is not a JSON object")]
    NotAnObject,
    /// Field missing or of the wrong type.
    #[error("plan field {0} is missing or has the wrong type")]
    InvalidField(&'static str),
    /// Wrong number of takeaways.
    #[error("plan must contain exactly 2 takeaways, found {0}")]
    TakeawayCount(usize),
    /// A takeaway failed validation.
    #[error("takeaway {index} is invalid: {reason}")]
    InvalidTakeaway {
        /// Zero-based takeaway position.
        index: usize,
        /// Violated constraint.
        reason: &'static str,
    },
}

/// Validate a plan response against the group's chunk ids.
///
/// Evidence ids outside the group are dropped; a takeaway left without evidence fails.
pub fn validate_plan(value: &Value, context_ids: &HashSet<&str>) -> Result<PlanResult, PlanError> {
    let object = value.as_object().ok_or(PlanError::NotAnObject)?;

    let raw_takeaways = object
        .get("takeaways")
        .and_then(Value::as_array)
        .ok_or(PlanError::InvalidField("takeaways"))?;
    if raw_takeaways.len() != TAKEAWAY_COUNT {
        return Err(PlanError::TakeawayCount(raw_takeaways.len()));
    }

    let mut takeaways = Vec::with_capacity(TAKEAWAY_COUNT);
    for (index, raw) in raw_takeaways.iter().enumerate() {
        let statement = raw
            .get("statement")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|statement| !statement.is_empty())
            .ok_or(PlanError::InvalidTakeaway {
                index,
                reason: "statement must be a non-empty string",
            })?;
        let evidence = raw
            .get("evidence_chunks")
            .and_then(Value::as_array)
            .ok_or(PlanError::InvalidTakeaway {
                index,
                reason: "evidence_chunks must be an array",
            })?;
        let mut evidence_chunks: Vec<String> = Vec::new();
        for id in evidence {
            let id = id.as_str().ok_or(PlanError::InvalidTakeaway {
                index,
                reason: "evidence_chunks must contain strings",
            })?;
            if context_ids.contains(id) && !evidence_chunks.iter().any(|seen| seen == id) {
                evidence_chunks.push(id.to_string());
            }
        }
        if evidence_chunks.is_empty() {
            return Err(PlanError::InvalidTakeaway {
                index,
                reason: "no evidence chunk from the context group",
            });
        }
        takeaways.push(Takeaway {
            statement: statement.to_string(),
            evidence_chunks,
        });
    }

    let has_equations = object
        .get("has_equations")
        .and_then(Value::as_bool)
        .ok_or(PlanError::InvalidField("has_equations"))?;

    Ok(PlanResult {
        takeaways,
        has_equations,
        equations: string_list(object.get("equations"), "equations")?,
        self_check: string_list(object.get("self_check"), "self_check")?,
    })
}

fn string_list(value: Option<&Value>, field: &'static str) -> Result<Vec<String>, PlanError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or(PlanError::InvalidField(field))
            })
            .collect(),
        Some(_) => Err(PlanError::InvalidField(field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids() -> HashSet<&'static str> {
        ["c1", "c2"].into_iter().collect()
    }

    #[test]
    fn accepts_well_formed_plan_and_drops_foreign_ids() {
        let plan = validate_plan(
            &json!({
                "takeaways": [
                    { "statement": "Heat flows downhill.", "evidence_chunks": ["c1", "zz"] },
                    { "statement": "Entropy rises.", "evidence_chunks": ["c2", "c2"] }
                ],
                "has_equations": true,
                "equations": ["dS >= dQ/T"],
                "self_check": []
            }),
            &ids(),
        )
        .expect("plan");
        assert_eq!(plan.takeaways[0].evidence_chunks, vec!["c1"]);
        assert_eq!(plan.takeaways[1].evidence_chunks, vec!["c2"]);
        assert!(plan.has_equations);
        assert_eq!(plan.equations, vec!["dS >= dQ/T"]);
    }

    #[test]
    fn rejects_wrong_arity() {
        let error = validate_plan(
            &json!({
                "takeaways": [{ "statement": "only one", "evidence_chunks": ["c1"] }],
                "has_equations": false
            }),
            &ids(),
        )
        .expect_err("arity");
        assert_eq!(error, PlanError::TakeawayCount(1));
    }

    #[test]
    fn rejects_takeaway_without_context_evidence() {
        let error = validate_plan(
            &json!({
                "takeaways": [
                    { "statement": "a", "evidence_chunks": ["c1"] },
                    { "statement": "b", "evidence_chunks": ["elsewhere"] }
                ],
                "has_equations": false
            }),
            &ids(),
        )
        .expect_err("evidence");
        assert!(matches!(error, PlanError::InvalidTakeaway { index: 1, .. }));
    }

    #[test]
    fn rejects_wrong_types() {
        let base = json!({
            "takeaways": [
                { "statement": "a", "evidence_chunks": ["c1"] },
                { "statement": "b", "evidence_chunks": ["c2"] }
            ],
            "has_equations": "yes"
        });
        assert_eq!(
            validate_plan(&base, &ids()),
            Err(PlanError::InvalidField("has_equations"))
        );
        let mut bad_list = base.clone();
        bad_list["has_equations"] = json!(false);
        bad_list["equations"] = json!("E = mc^2");
        assert_eq!(
            validate_plan(&bad_list, &ids()),
            Err(PlanError::InvalidField("equations"))
        );
        assert_eq!(validate_plan(&json!([]), &ids()), Err(PlanError::NotAnObject));
    }
}
