//! Environment passed to locally run containers.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::cli_config::CliConfig;
use crate::document::merge;
use crate::project::ProjectDoc;

/// Upper-cased key with `prefix_` prepended unless already present
/// (case-insensitively); spaces and dashes become underscores.
pub fn format_env_key(key: &str, prefix: Option<&str>) -> String {
    let key = match prefix {
        Some(p) if !key.to_lowercase().starts_with(&p.to_lowercase()) => format!("{p}_{key}"),
        _ => key.to_string(),
    };
    key.replace([' ', '-'], "_").to_uppercase()
}

/// Strings pass through; everything else is its JSON text.
pub fn env_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Environment for `mldock local train|deploy`.
///
/// Layers, lowest first: stage and hyperparameters, project environment
/// (prefixed), CLI `local.environment` (verbatim), then `overrides`.
pub fn container_env(
    project: &ProjectDoc,
    cli: &CliConfig,
    stage: Option<&str>,
    hyperparameter_overrides: &Map<String, Value>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut hyperparameters = Value::Object(project.hyperparameters().clone());
    merge(&mut hyperparameters, Value::Object(hyperparameter_overrides.clone()));

    let mut env = BTreeMap::new();
    env.insert(
        format_env_key("stage", Some("mldock")),
        stage.unwrap_or("dev").to_string(),
    );
    env.insert(
        format_env_key("hyperparameters", Some("mldock")),
        hyperparameters.to_string(),
    );
    for (k, v) in project.environment() {
        env.insert(format_env_key(k, Some("mldock")), env_value(v));
    }
    for (k, v) in &cli.local.environment {
        env.insert(k.clone(), env_value(v));
    }
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_prefixed_once_and_normalized() {
        assert_eq!(format_env_key("learning rate", Some("mldock")), "MLDOCK_LEARNING_RATE");
        assert_eq!(format_env_key("mldock-stage", Some("mldock")), "MLDOCK_STAGE");
        assert_eq!(format_env_key("MLDOCK_X", Some("mldock")), "MLDOCK_X");
        assert_eq!(format_env_key("plain-key", None), "PLAIN_KEY");
    }

    #[test]
    fn env_values_render_json_for_non_strings() {
        assert_eq!(env_value(&json!("s3://b")), "s3://b");
        assert_eq!(env_value(&json!(3)), "3");
        assert_eq!(env_value(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn container_env_layers_sources() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut project = ProjectDoc::init(tmp.path()).expect("init");
        let mut hp = Map::new();
        hp.insert("epochs".into(), json!(3));
        project.update_hyperparameters(hp);
        let mut penv = Map::new();
        penv.insert("input channel iris".into(), json!("s3://b/iris"));
        penv.insert("shared".into(), json!("project"));
        project.update_environment(penv);

        let mut cli = CliConfig::default();
        cli.local
            .environment
            .insert("MLDOCK_SHARED".into(), json!("cli"));

        let mut hp_over = Map::new();
        hp_over.insert("epochs".into(), json!(5));
        let env = container_env(&project, &cli, Some("prod"), &hp_over, &BTreeMap::new());

        assert_eq!(env["MLDOCK_STAGE"], "prod");
        assert_eq!(env["MLDOCK_INPUT_CHANNEL_IRIS"], "s3://b/iris");
        assert_eq!(env["MLDOCK_SHARED"], "cli");
        let hp: Value = serde_json::from_str(&env["MLDOCK_HYPERPARAMETERS"]).expect("json");
        assert_eq!(hp["epochs"], 5);
    }
}
