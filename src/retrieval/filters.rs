//! Metadata filters sent to the knowledge index.

use serde_json::{Value, json};

use super::{RetrievalError, Selector};

/// Build the filter for `selectors`.
///
/// One selector yields `{"andAll": [folder_path = F, job_id = J]}`; several yield an `orAll` of
/// those clauses in input order.
pub fn build_filter(selectors: &[Selector]) -> Result<Value, RetrievalError> {
    match selectors {
        [] => Err(RetrievalError::NoSelectors),
        [single] => Ok(selector_clause(single)),
        many => Ok(json!({
            "orAll": many.iter().map(selector_clause).collect::<Vec<_>>()
        })),
    }
}

fn selector_clause(selector: &Selector) -> Value {
    json!({
        "andAll": [
            { "equals": { "key": "folder_path", "value": selector.folder_path } },
            { "equals": { "key": "job_id", "value": selector.job_id } }
        ]
    })
}
