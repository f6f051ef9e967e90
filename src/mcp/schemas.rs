//! JSON schema builders for MCP tools.

use serde_json::{Map, Value, json};

/// Build the schema shared by the `ask` and `start-query` tools.
pub(crate) fn query_input_schema() -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert("query".into(), string_schema("Question to answer"));
    properties.insert(
        "chat_session_id".into(),
        string_schema("Conversation to continue; a new session is opened when omitted"),
    );
    properties.insert(
        "folder_paths".into(),
        string_array_schema("Folders whose knowledge is searched"),
    );

    let mut job_ids_schema = Map::new();
    job_ids_schema.insert("type".into(), Value::String("object".into()));
    job_ids_schema.insert(
        "description".into(),
        Value::String("Job to search for each folder, keyed by folder path".into()),
    );
    job_ids_schema.insert("additionalProperties".into(), json!({ "type": "string" }));
    properties.insert(
        "folder_default_job_ids".into(),
        Value::Object(job_ids_schema),
    );

    let mut agent_schema = Map::new();
    agent_schema.insert("type".into(), Value::String("boolean".into()));
    agent_schema.insert(
        "description".into(),
        Value::String("Answer through the conversational agent (default true)".into()),
    );
    agent_schema.insert("default".into(), Value::Bool(true));
    properties.insert("use_agent".into(), Value::Object(agent_schema));

    let mut agent_type_schema = Map::new();
    agent_type_schema.insert("type".into(), Value::String("string".into()));
    agent_type_schema.insert(
        "enum".into(),
        Value::Array(
            ["default", "verification", "specification"]
                .into_iter()
                .map(|variant| Value::String(variant.into()))
                .collect(),
        ),
    );
    agent_type_schema.insert("default".into(), Value::String("default".into()));
    properties.insert("agent_type".into(), Value::Object(agent_type_schema));

    let mut schema = finalize_object_schema(properties, &["query", "folder_paths"]);
    schema.insert(
        "examples".into(),
        json!([{
            "query": "What torque does the M6 bolt need?",
            "folder_paths": ["設計/手順書"],
            "folder_default_job_ids": { "設計/手順書": "20250101093000" },
            "use_agent": false
        }]),
    );
    schema
}

/// Build the schema describing the `poll-query` tool input.
pub(crate) fn poll_query_input_schema() -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(
        "query_id".into(),
        string_schema("Identifier returned by start-query"),
    );
    finalize_object_schema(properties, &["query_id"])
}

/// Build the schema describing the `create-job` tool input.
pub(crate) fn create_job_input_schema() -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(
        "folder_path".into(),
        string_schema("Leaf folder whose PDF documents are processed"),
    );

    let mut mode_schema = Map::new();
    mode_schema.insert("type".into(), Value::String("string".into()));
    mode_schema.insert(
        "enum".into(),
        Value::Array(vec![
            Value::String("full".into()),
            Value::String("direct_pdf".into()),
        ]),
    );
    mode_schema.insert("default".into(), Value::String("full".into()));
    properties.insert("processing_mode".into(), Value::Object(mode_schema));

    properties.insert(
        "transcript_prompt".into(),
        string_schema("Transcription prompt; required unless processing_mode is direct_pdf"),
    );
    properties.insert(
        "knowledge_prompt".into(),
        string_schema("Knowledge extraction prompt; required unless processing_mode is direct_pdf"),
    );
    properties.insert(
        "files".into(),
        string_array_schema("Optional subset of file names to process"),
    );

    finalize_object_schema(properties, &["folder_path"])
}

/// Build the schema describing the `job-status` tool input.
pub(crate) fn job_status_input_schema() -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert("job_id".into(), string_schema("Job to report on"));
    properties.insert(
        "folder_path".into(),
        string_schema("Optional folder restricting the listing"),
    );
    finalize_object_schema(properties, &["job_id"])
}

/// Schema representing an empty object (used for parameterless tools).
pub(crate) fn empty_object_schema() -> Map<String, Value> {
    finalize_object_schema(Map::new(), &[])
}

fn string_schema(description: &str) -> Value {
    let mut schema = Map::new();
    schema.insert("type".into(), Value::String("string".into()));
    schema.insert("description".into(), Value::String(description.into()));
    Value::Object(schema)
}

fn string_array_schema(description: &str) -> Value {
    json!({
        "type": "array",
        "description": description,
        "items": { "type": "string" },
    })
}

fn finalize_object_schema(properties: Map<String, Value>, required: &[&str]) -> Map<String, Value> {
    let mut schema = Map::new();
    schema.insert("type".into(), Value::String("object".into()));
    schema.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert(
            "required".into(),
            Value::Array(
                required
                    .iter()
                    .map(|&key| Value::String(key.into()))
                    .collect(),
            ),
        );
    }
    schema.insert("additionalProperties".into(), Value::Bool(false));
    schema
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_job_schema_requires_only_the_folder() {
        let schema = create_job_input_schema();
        assert_eq!(schema["required"], json!(["folder_path"]));
        assert_eq!(
            schema["properties"]["processing_mode"]["enum"],
            json!(["full", "direct_pdf"])
        );
    }

    #[test]
    fn empty_schema_has_no_required_list() {
        let schema = empty_object_schema();
        assert!(!schema.contains_key("required"));
        assert_eq!(schema["additionalProperties"], Value::Bool(false));
    }
}
