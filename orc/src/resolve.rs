//! Config resolution - produce the immutable per-job bundle
//!
//! Layer order: defaults ⊕ expert config ⊕ job override ⊕ datasource tool
//! override. Objects merge recursively, arrays replace entirely; the tool
//! override always carries a full replacement categories array so an
//! unattached datasource category disappears no matter what the expert
//! config said.

use eyre::{Context, Result};
use jobstore::{Datasource, DatasourceBinding, DatasourceKind, Job, ResolvedConfig, deep_merge};
use serde_json::Value;
use tracing::debug;

use crate::expert::ExpertBundle;

/// Categories that exist only through an attached datasource
fn datasource_categories() -> Vec<&'static str> {
    DatasourceKind::ALL.iter().map(|k| k.tool_category()).collect()
}

/// Deployment-level tuning from the environment, merged right above the
/// defaults file. Unset variables contribute nothing.
pub fn env_tuning_layer() -> Value {
    let mut layer = serde_json::json!({});

    let numeric = [
        ("SPRINT_LIMIT", "/phase/sprint-limit"),
        ("MIN_TODOS", "/phase/min-todos"),
        ("MAX_TODOS", "/phase/max-todos"),
        ("COMPACTION_THRESHOLD_TOKENS", "/context/compaction-threshold-tokens"),
        ("SUMMARIZATION_THRESHOLD_TOKENS", "/context/summarization-threshold-tokens"),
    ];
    for (var, pointer) in numeric {
        if let Ok(raw) = std::env::var(var)
            && let Ok(value) = raw.parse::<u64>()
        {
            let parts: Vec<&str> = pointer.trim_start_matches('/').split('/').collect();
            layer[parts[0]][parts[1]] = serde_json::json!(value);
        }
    }

    layer
}

/// Build the tool-override layer from the attached datasources.
///
/// The result replaces the categories array wholesale: every attached
/// kind's category is present, every unattached kind's category is gone,
/// all other categories pass through.
fn tool_override_layer(merged: &Value, attached: &[Datasource]) -> Value {
    let existing: Vec<String> = merged["tools"]["categories"]
        .as_array()
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_else(|| vec!["workspace".to_string(), "core".to_string()]);

    let ds_categories = datasource_categories();
    let attached_categories: Vec<&str> = attached.iter().map(|d| d.kind.tool_category()).collect();

    let mut categories: Vec<String> = existing
        .into_iter()
        .filter(|c| !ds_categories.contains(&c.as_str()) || attached_categories.contains(&c.as_str()))
        .collect();
    for category in &attached_categories {
        if !categories.iter().any(|c| c == category) {
            categories.push(category.to_string());
        }
    }

    serde_json::json!({"tools": {"categories": categories}})
}

/// Resolve the effective config and datasource bindings for one job
pub fn resolve_job_config(
    defaults: &Value,
    expert: &ExpertBundle,
    job: &Job,
    datasources: &[Datasource],
) -> Result<(ResolvedConfig, Vec<DatasourceBinding>)> {
    let mut layers: Vec<Value> = Vec::new();

    let env_layer = env_tuning_layer();
    for layer in [defaults, &env_layer, &expert.config, &job.config_override] {
        if layer.is_object() {
            layers.push((*layer).clone());
        }
    }
    if !expert.instructions.is_empty() {
        layers.push(serde_json::json!({"instructions": expert.instructions}));
    }
    // The submission's autonomy is authoritative over any config layer
    layers.push(serde_json::json!({"autonomy": job.autonomy.as_str()}));

    // Tool override is computed against the merge of everything above it
    let mut merged = Value::Object(serde_json::Map::new());
    for layer in &layers {
        deep_merge(&mut merged, layer);
    }
    layers.push(tool_override_layer(&merged, datasources));

    let resolved = ResolvedConfig::from_layers(&layers).context("resolved config did not deserialize")?;
    debug!(job_id = %job.id, categories = ?resolved.tools.categories, "resolved config");

    let bindings = datasources
        .iter()
        .map(|ds| DatasourceBinding {
            kind: ds.kind,
            name: ds.name.clone(),
            description: ds.description.clone(),
            connection_url: ds.connection_url.clone(),
            credentials: ds.credentials.clone(),
            read_only: ds.read_only,
        })
        .collect();

    Ok((resolved, bindings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobstore::Autonomy;
    use serde_json::json;

    fn job_with_override(config_override: Value, autonomy: Autonomy) -> Job {
        let mut job = Job::new("task", "tester", autonomy);
        job.config_override = config_override;
        job
    }

    #[test]
    #[serial_test::serial]
    fn test_layers_merge_in_order() {
        let defaults = json!({"llm": {"model": "base-model", "temperature": 0.2}});
        let expert = ExpertBundle {
            config: json!({"llm": {"model": "expert-model"}, "phase": {"sprint-limit": 100}}),
            instructions: "Expert instructions.".to_string(),
        };
        let job = job_with_override(json!({"phase": {"sprint-limit": 10}}), Autonomy::Review);

        let (resolved, bindings) = resolve_job_config(&defaults, &expert, &job, &[]).unwrap();

        assert_eq!(resolved.llm.model, "expert-model");
        assert_eq!(resolved.llm.temperature, 0.2);
        assert_eq!(resolved.phase.sprint_limit, 10);
        assert_eq!(resolved.instructions, "Expert instructions.");
        assert_eq!(resolved.autonomy, Autonomy::Review);
        assert!(bindings.is_empty());
    }

    #[test]
    fn test_unattached_datasource_categories_are_stripped() {
        let defaults = json!({});
        let expert = ExpertBundle {
            config: json!({"tools": {"categories": ["workspace", "core", "graph", "research"]}}),
            instructions: String::new(),
        };
        let job = job_with_override(json!({}), Autonomy::Full);

        // Expert wants graph tools but no Neo4j datasource is attached
        let (resolved, _) = resolve_job_config(&defaults, &expert, &job, &[]).unwrap();

        assert!(!resolved.tools.categories.contains(&"graph".to_string()));
        assert!(resolved.tools.categories.contains(&"research".to_string()));
        assert!(resolved.tools.categories.contains(&"workspace".to_string()));
    }

    #[test]
    fn test_attached_datasource_injects_category() {
        let defaults = json!({});
        let expert = ExpertBundle::default();
        let job = job_with_override(json!({}), Autonomy::Full);

        let mut ds = Datasource::global(DatasourceKind::Postgresql, "warehouse", "postgres://db");
        ds.read_only = true;
        ds.credentials = Some("secret".to_string());

        let (resolved, bindings) = resolve_job_config(&defaults, &expert, &job, &[ds]).unwrap();

        assert!(resolved.tools.categories.contains(&"sql".to_string()));
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].kind, DatasourceKind::Postgresql);
        assert!(bindings[0].read_only);
        assert_eq!(bindings[0].credentials.as_deref(), Some("secret"));
    }

    #[test]
    #[serial_test::serial]
    fn test_null_expert_config_is_ignored() {
        let defaults = json!({"phase": {"min-todos": 3}});
        let expert = ExpertBundle::default(); // config is Null
        let job = job_with_override(json!({}), Autonomy::Full);

        let (resolved, _) = resolve_job_config(&defaults, &expert, &job, &[]).unwrap();
        assert_eq!(resolved.phase.min_todos, 3);
    }

    #[test]
    #[serial_test::serial]
    fn test_env_tuning_layer_overrides_defaults() {
        // SAFETY: serialized test, no concurrent env access
        unsafe {
            std::env::set_var("SPRINT_LIMIT", "42");
            std::env::set_var("MAX_TODOS", "8");
        }
        let defaults = json!({"phase": {"sprint-limit": 200, "min-todos": 5}});
        let job = job_with_override(json!({}), Autonomy::Full);
        let (resolved, _) = resolve_job_config(&defaults, &ExpertBundle::default(), &job, &[]).unwrap();
        unsafe {
            std::env::remove_var("SPRINT_LIMIT");
            std::env::remove_var("MAX_TODOS");
        }

        assert_eq!(resolved.phase.sprint_limit, 42);
        assert_eq!(resolved.phase.max_todos, 8);
        assert_eq!(resolved.phase.min_todos, 5);
    }

    #[test]
    #[serial_test::serial]
    fn test_env_tuning_layer_ignores_garbage() {
        // SAFETY: serialized test, no concurrent env access
        unsafe {
            std::env::set_var("SPRINT_LIMIT", "not-a-number");
        }
        let layer = env_tuning_layer();
        unsafe {
            std::env::remove_var("SPRINT_LIMIT");
        }
        assert!(layer.get("phase").is_none());
    }

    #[test]
    fn test_override_arrays_replace() {
        let defaults = json!({"tools": {"categories": ["workspace", "core", "research", "git"]}});
        let expert = ExpertBundle::default();
        let job = job_with_override(json!({"tools": {"categories": ["workspace", "core"]}}), Autonomy::Full);

        let (resolved, _) = resolve_job_config(&defaults, &expert, &job, &[]).unwrap();
        assert_eq!(resolved.tools.categories, vec!["workspace", "core"]);
    }
}
