//! Datasource tool families: sql, graph, and mongodb categories
//!
//! Drivers are external collaborators. The worker binds whatever
//! [`DatasourceClient`] implementation it was built with to the named tool
//! surface below; the tools themselves only own the dispatcher contract
//! (names, schemas, read/write split, error-to-observation mapping).

use std::sync::Arc;

use async_trait::async_trait;
use jobstore::DatasourceKind;
use serde_json::Value;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Driver-side contract for one attached datasource.
///
/// `operation` is the tool name; input has already passed the tool schema.
#[async_trait]
pub trait DatasourceClient: Send + Sync {
    fn kind(&self) -> DatasourceKind;

    async fn run(&self, operation: &str, input: &Value) -> Result<String, String>;
}

/// Placeholder client used when no driver is linked in.
///
/// Keeps the tool surface honest: the category is attached, the tools are
/// visible, and calls come back as error observations the agent can route
/// around.
pub struct UnboundClient {
    kind: DatasourceKind,
}

impl UnboundClient {
    pub fn new(kind: DatasourceKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl DatasourceClient for UnboundClient {
    fn kind(&self) -> DatasourceKind {
        self.kind
    }

    async fn run(&self, operation: &str, _input: &Value) -> Result<String, String> {
        Err(format!(
            "No {} driver is bound in this worker build; {} is unavailable",
            self.kind, operation
        ))
    }
}

/// Static description of one datasource tool
pub struct DatasourceToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub write: bool,
    pub schema: fn() -> Value,
}

fn query_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": { "type": "string", "description": "Query text" }
        },
        "required": ["query"]
    })
}

fn statement_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "statement": { "type": "string", "description": "Statement to execute" }
        },
        "required": ["statement"]
    })
}

fn empty_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

fn table_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "table": { "type": "string", "description": "Optional table to describe" }
        }
    })
}

fn collection_filter_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "collection": { "type": "string", "description": "Collection name" },
            "filter": { "type": "object", "description": "Query filter document" }
        },
        "required": ["collection"]
    })
}

fn collection_pipeline_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "collection": { "type": "string", "description": "Collection name" },
            "pipeline": { "type": "array", "description": "Aggregation pipeline stages" }
        },
        "required": ["collection", "pipeline"]
    })
}

fn collection_optional_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "collection": { "type": "string", "description": "Optional collection to describe" }
        }
    })
}

fn collection_documents_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "collection": { "type": "string", "description": "Collection name" },
            "documents": { "type": "array", "description": "Documents to insert" }
        },
        "required": ["collection", "documents"]
    })
}

fn collection_update_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "collection": { "type": "string", "description": "Collection name" },
            "filter": { "type": "object", "description": "Match filter" },
            "update": { "type": "object", "description": "Update document" }
        },
        "required": ["collection", "filter", "update"]
    })
}

const GRAPH_TOOLS: &[DatasourceToolSpec] = &[
    DatasourceToolSpec {
        name: "execute_cypher_query",
        description: "Run a read-only Cypher query against the attached Neo4j datasource.",
        write: false,
        schema: query_schema,
    },
    DatasourceToolSpec {
        name: "get_database_schema",
        description: "Describe the attached Neo4j datasource: labels, relationship types, properties.",
        write: false,
        schema: empty_schema,
    },
    DatasourceToolSpec {
        name: "cypher_write",
        description: "Run a mutating Cypher statement against the attached Neo4j datasource.",
        write: true,
        schema: query_schema,
    },
];

const SQL_TOOLS: &[DatasourceToolSpec] = &[
    DatasourceToolSpec {
        name: "sql_query",
        description: "Run a read-only SQL query against the attached PostgreSQL datasource.",
        write: false,
        schema: query_schema,
    },
    DatasourceToolSpec {
        name: "sql_schema",
        description: "Describe the attached PostgreSQL datasource's tables and columns.",
        write: false,
        schema: table_schema,
    },
    DatasourceToolSpec {
        name: "sql_execute",
        description: "Execute a mutating SQL statement against the attached PostgreSQL datasource.",
        write: true,
        schema: statement_schema,
    },
];

const MONGODB_TOOLS: &[DatasourceToolSpec] = &[
    DatasourceToolSpec {
        name: "mongo_query",
        description: "Find documents in the attached MongoDB datasource.",
        write: false,
        schema: collection_filter_schema,
    },
    DatasourceToolSpec {
        name: "mongo_aggregate",
        description: "Run an aggregation pipeline against the attached MongoDB datasource.",
        write: false,
        schema: collection_pipeline_schema,
    },
    DatasourceToolSpec {
        name: "mongo_schema",
        description: "Describe the attached MongoDB datasource's collections and field shapes.",
        write: false,
        schema: collection_optional_schema,
    },
    DatasourceToolSpec {
        name: "mongo_insert",
        description: "Insert documents into the attached MongoDB datasource.",
        write: true,
        schema: collection_documents_schema,
    },
    DatasourceToolSpec {
        name: "mongo_update",
        description: "Update documents in the attached MongoDB datasource.",
        write: true,
        schema: collection_update_schema,
    },
];

/// The tool specs for one datasource kind
pub fn specs_for(kind: DatasourceKind) -> &'static [DatasourceToolSpec] {
    match kind {
        DatasourceKind::Neo4j => GRAPH_TOOLS,
        DatasourceKind::Postgresql => SQL_TOOLS,
        DatasourceKind::Mongodb => MONGODB_TOOLS,
    }
}

/// One bound datasource tool
pub struct DatasourceTool {
    spec: &'static DatasourceToolSpec,
    category: &'static str,
    client: Arc<dyn DatasourceClient>,
}

#[async_trait]
impl Tool for DatasourceTool {
    fn name(&self) -> &'static str {
        self.spec.name
    }

    fn description(&self) -> &'static str {
        self.spec.description
    }

    fn input_schema(&self) -> Value {
        (self.spec.schema)()
    }

    fn category(&self) -> &'static str {
        self.category
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolResult {
        match self.client.run(self.spec.name, &input).await {
            Ok(output) => ToolResult::success(output),
            Err(e) => ToolResult::error(e),
        }
    }
}

/// Build the bound tool family for an attached datasource.
///
/// `read_only` drops the write tools entirely, so they are not even
/// visible to the model.
pub fn datasource_tools(client: Arc<dyn DatasourceClient>, read_only: bool) -> Vec<Box<dyn Tool>> {
    let kind = client.kind();
    specs_for(kind)
        .iter()
        .filter(|spec| !(read_only && spec.write))
        .map(|spec| {
            Box::new(DatasourceTool {
                spec,
                category: kind.tool_category(),
                client: Arc::clone(&client),
            }) as Box<dyn Tool>
        })
        .collect()
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Records calls and answers with a fixed payload
    pub struct MockDatasourceClient {
        kind: DatasourceKind,
        pub calls: Mutex<Vec<(String, Value)>>,
        response: String,
    }

    impl MockDatasourceClient {
        pub fn new(kind: DatasourceKind, response: impl Into<String>) -> Self {
            Self {
                kind,
                calls: Mutex::new(Vec::new()),
                response: response.into(),
            }
        }
    }

    #[async_trait]
    impl DatasourceClient for MockDatasourceClient {
        fn kind(&self) -> DatasourceKind {
            self.kind
        }

        async fn run(&self, operation: &str, input: &Value) -> Result<String, String> {
            self.calls.lock().unwrap().push((operation.to_string(), input.clone()));
            Ok(self.response.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockDatasourceClient;
    use super::*;
    use crate::workspace::Workspace;
    use tempfile::tempdir;

    fn ctx() -> (tempfile::TempDir, ToolContext) {
        let temp = tempdir().unwrap();
        let ws = Workspace::init(temp.path().join("job"), &[]).unwrap();
        let ctx = ToolContext::new(ws, "test");
        (temp, ctx)
    }

    #[test]
    fn test_read_only_drops_write_tools() {
        let client = Arc::new(MockDatasourceClient::new(DatasourceKind::Neo4j, "rows"));

        let all = datasource_tools(client.clone(), false);
        assert_eq!(all.len(), 3);
        assert!(all.iter().any(|t| t.name() == "cypher_write"));

        let read_only = datasource_tools(client, true);
        assert_eq!(read_only.len(), 2);
        assert!(!read_only.iter().any(|t| t.name() == "cypher_write"));
    }

    #[test]
    fn test_categories_match_kind() {
        let client = Arc::new(MockDatasourceClient::new(DatasourceKind::Postgresql, ""));
        let tools = datasource_tools(client, false);
        assert!(tools.iter().all(|t| t.category() == "sql"));

        let client = Arc::new(MockDatasourceClient::new(DatasourceKind::Mongodb, ""));
        let tools = datasource_tools(client, false);
        assert_eq!(tools.len(), 5);
        assert!(tools.iter().all(|t| t.category() == "mongodb"));
    }

    #[tokio::test]
    async fn test_tool_dispatches_to_client() {
        let (_temp, ctx) = ctx();
        let client = Arc::new(MockDatasourceClient::new(DatasourceKind::Neo4j, "42 rows"));
        let tools = datasource_tools(client.clone(), false);
        let cypher = tools.iter().find(|t| t.name() == "execute_cypher_query").unwrap();

        let result = cypher
            .execute(serde_json::json!({"query": "MATCH (n) RETURN count(n)"}), &ctx)
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content, "42 rows");

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "execute_cypher_query");
    }

    #[tokio::test]
    async fn test_unbound_client_errors_as_observation() {
        let (_temp, ctx) = ctx();
        let client: Arc<dyn DatasourceClient> = Arc::new(UnboundClient::new(DatasourceKind::Mongodb));
        let tools = datasource_tools(client, false);
        let query = tools.iter().find(|t| t.name() == "mongo_query").unwrap();

        let result = query.execute(serde_json::json!({"collection": "docs"}), &ctx).await;
        assert!(result.is_error);
        assert!(result.content.contains("No mongodb driver"));
    }
}
