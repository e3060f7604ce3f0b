//! Result summaries built from a stream's terminal metadata.

use std::collections::HashMap;
use std::time::Duration;

use crate::graph::statement::Statement;
use crate::graph::value::Value;
use crate::protocol::Metadata;

/// Metadata describing a completed statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSummary {
    pub statement: Statement,
    pub statement_type: Option<StatementType>,
    pub counters: SummaryCounters,
    pub plan: Option<Plan>,
    pub profile: Option<ProfiledPlan>,
    pub notifications: Vec<Notification>,
    /// Time until the first record was available.
    pub result_available_after: Option<Duration>,
    /// Time until the last record was consumed.
    pub result_consumed_after: Option<Duration>,
}

/// What kind of work a statement did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    ReadOnly,
    ReadWrite,
    WriteOnly,
    SchemaWrite,
}

impl StatementType {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "r" => Some(StatementType::ReadOnly),
            "rw" => Some(StatementType::ReadWrite),
            "w" => Some(StatementType::WriteOnly),
            "s" => Some(StatementType::SchemaWrite),
            _ => None,
        }
    }
}

/// Update counters reported by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryCounters {
    pub nodes_created: i64,
    pub nodes_deleted: i64,
    pub relationships_created: i64,
    pub relationships_deleted: i64,
    pub properties_set: i64,
    pub labels_added: i64,
    pub labels_removed: i64,
    pub indexes_added: i64,
    pub indexes_removed: i64,
    pub constraints_added: i64,
    pub constraints_removed: i64,
}

impl SummaryCounters {
    pub fn contains_updates(&self) -> bool {
        *self != SummaryCounters::default()
    }

    fn from_stats(stats: &HashMap<String, Value>) -> Self {
        let count = |key: &str| stats.get(key).and_then(Value::as_i64).unwrap_or(0);
        Self {
            nodes_created: count("nodes-created"),
            nodes_deleted: count("nodes-deleted"),
            relationships_created: count("relationships-created"),
            relationships_deleted: count("relationships-deleted"),
            properties_set: count("properties-set"),
            labels_added: count("labels-added"),
            labels_removed: count("labels-removed"),
            indexes_added: count("indexes-added"),
            indexes_removed: count("indexes-removed"),
            constraints_added: count("constraints-added"),
            constraints_removed: count("constraints-removed"),
        }
    }
}

/// One operator of an execution plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub operator_type: String,
    pub identifiers: Vec<String>,
    pub arguments: HashMap<String, Value>,
    pub children: Vec<Plan>,
}

impl Plan {
    fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_map()?;
        Some(Self {
            operator_type: map.get("operatorType")?.as_str()?.to_string(),
            identifiers: map
                .get("identifiers")
                .and_then(Value::as_list)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            arguments: map
                .get("args")
                .and_then(Value::as_map)
                .cloned()
                .unwrap_or_default(),
            children: children(map, Plan::from_value),
        })
    }
}

/// A plan operator annotated with what it cost at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfiledPlan {
    pub operator_type: String,
    pub identifiers: Vec<String>,
    pub arguments: HashMap<String, Value>,
    pub db_hits: i64,
    pub records: i64,
    pub children: Vec<ProfiledPlan>,
}

impl ProfiledPlan {
    fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_map()?;
        let plan = Plan::from_value(value)?;
        Some(Self {
            operator_type: plan.operator_type,
            identifiers: plan.identifiers,
            arguments: plan.arguments,
            db_hits: map.get("dbHits").and_then(Value::as_i64).unwrap_or(0),
            records: map.get("rows").and_then(Value::as_i64).unwrap_or(0),
            children: children(map, ProfiledPlan::from_value),
        })
    }
}

fn children<T>(map: &HashMap<String, Value>, parse: fn(&Value) -> Option<T>) -> Vec<T> {
    map.get("children")
        .and_then(Value::as_list)
        .map(|items| items.iter().filter_map(parse).collect())
        .unwrap_or_default()
}

/// A warning or hint the server attached to a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub code: String,
    pub title: String,
    pub description: String,
    pub severity: Option<String>,
    pub position: Option<InputPosition>,
}

/// Location in the statement text a notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputPosition {
    pub offset: i64,
    pub line: i64,
    pub column: i64,
}

impl Notification {
    fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_map()?;
        let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
        let position = map.get("position").and_then(Value::as_map).map(|p| {
            let at = |key: &str| p.get(key).and_then(Value::as_i64).unwrap_or(0);
            InputPosition {
                offset: at("offset"),
                line: at("line"),
                column: at("column"),
            }
        });
        Some(Self {
            code: text("code")?,
            title: text("title").unwrap_or_default(),
            description: text("description").unwrap_or_default(),
            severity: text("severity"),
            position,
        })
    }
}

impl ResultSummary {
    /// Builds a summary from the metadata gathered over the whole stream.
    ///
    /// Unknown keys are ignored and malformed entries are skipped.
    pub fn from_metadata(statement: Statement, metadata: &Metadata) -> Self {
        let millis = |key: &str| {
            metadata
                .get(key)
                .and_then(Value::as_i64)
                .and_then(|ms| u64::try_from(ms).ok())
                .map(Duration::from_millis)
        };

        Self {
            statement,
            statement_type: metadata
                .get("type")
                .and_then(Value::as_str)
                .and_then(StatementType::from_code),
            counters: metadata
                .get("stats")
                .and_then(Value::as_map)
                .map(SummaryCounters::from_stats)
                .unwrap_or_default(),
            plan: metadata.get("plan").and_then(Plan::from_value),
            profile: metadata.get("profile").and_then(ProfiledPlan::from_value),
            notifications: metadata
                .get("notifications")
                .and_then(Value::as_list)
                .map(|items| items.iter().filter_map(Notification::from_value).collect())
                .unwrap_or_default(),
            result_available_after: millis("result_available_after"),
            result_consumed_after: millis("result_consumed_after"),
        }
    }

    pub fn has_plan(&self) -> bool {
        self.plan.is_some() || self.profile.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(json: serde_json::Value) -> Metadata {
        match Value::from(json) {
            Value::Map(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_counters_and_type() {
        let meta = metadata(json!({
            "type": "rw",
            "stats": {"nodes-created": 2, "properties-set": 3},
            "result_available_after": 5,
            "result_consumed_after": 7
        }));
        let summary = ResultSummary::from_metadata(Statement::new("CREATE ..."), &meta);

        assert_eq!(summary.statement_type, Some(StatementType::ReadWrite));
        assert_eq!(summary.counters.nodes_created, 2);
        assert_eq!(summary.counters.properties_set, 3);
        assert!(summary.counters.contains_updates());
        assert_eq!(summary.result_available_after, Some(Duration::from_millis(5)));
        assert_eq!(summary.result_consumed_after, Some(Duration::from_millis(7)));
    }

    #[test]
    fn test_empty_metadata() {
        let summary = ResultSummary::from_metadata(Statement::new("RETURN 1"), &Metadata::new());
        assert_eq!(summary.statement_type, None);
        assert!(!summary.counters.contains_updates());
        assert!(!summary.has_plan());
        assert!(summary.notifications.is_empty());
    }

    #[test]
    fn test_profile_tree() {
        let meta = metadata(json!({
            "profile": {
                "operatorType": "ProduceResults",
                "identifiers": ["n"],
                "args": {"runtime": "SLOTTED"},
                "dbHits": 0,
                "rows": 3,
                "children": [{
                    "operatorType": "AllNodesScan",
                    "identifiers": ["n"],
                    "dbHits": 4,
                    "rows": 3
                }]
            }
        }));
        let summary = ResultSummary::from_metadata(Statement::new("PROFILE MATCH (n) RETURN n"), &meta);
        let profile = summary.profile.unwrap();

        assert_eq!(profile.operator_type, "ProduceResults");
        assert_eq!(profile.records, 3);
        assert_eq!(profile.arguments["runtime"], Value::from("SLOTTED"));
        assert_eq!(profile.children.len(), 1);
        assert_eq!(profile.children[0].db_hits, 4);
    }

    #[test]
    fn test_notifications() {
        let meta = metadata(json!({
            "notifications": [
                {
                    "code": "Neo.ClientNotification.Statement.CartesianProduct",
                    "title": "Cartesian product",
                    "description": "...",
                    "severity": "WARNING",
                    "position": {"offset": 4, "line": 1, "column": 5}
                },
                {"title": "missing code is skipped"}
            ]
        }));
        let summary = ResultSummary::from_metadata(Statement::new("MATCH (a), (b) RETURN a, b"), &meta);

        assert_eq!(summary.notifications.len(), 1);
        let note = &summary.notifications[0];
        assert_eq!(note.severity.as_deref(), Some("WARNING"));
        assert_eq!(
            note.position,
            Some(InputPosition {
                offset: 4,
                line: 1,
                column: 5
            })
        );
    }
}
