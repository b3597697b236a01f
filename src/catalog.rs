//! Entity catalog types: schema documents, column-value records, and the
//! relationship graph used for join-path discovery.
//!
//! Entity documents are produced offline by the data-dictionary tooling and
//! are immutable at runtime. The JSON field names follow the dictionary
//! output format (PascalCase, `FQN` spelled out).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

// ============ Entity Documents ============

/// One column of an entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct EntityColumn {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_values: Vec<serde_json::Value>,
}

/// A (local column, foreign column) pairing within a relationship.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ForeignKeyPair {
    pub column: String,
    pub foreign_column: String,
}

/// A direct relationship from one entity to another.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityRelationship {
    #[serde(rename = "ForeignFQN")]
    pub foreign_fqn: String,
    #[serde(rename = "ForeignKeys", default)]
    pub foreign_keys: Vec<ForeignKeyPair>,
}

/// A schema document describing one queryable entity (table or view),
/// uniquely identified by its fully-qualified name `database.schema.entity`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct EntityDocument {
    #[serde(rename = "FQN")]
    pub fqn: String,
    pub database: String,
    pub schema: String,
    pub entity: String,
    pub entity_name: String,
    #[serde(default)]
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse: Option<String>,
    #[serde(default)]
    pub columns: Vec<EntityColumn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_relationships: Vec<EntityRelationship>,
    /// Multi-hop join paths, one `"A -> B -> C"` string per path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub complete_entity_relationships_graph: Vec<String>,
}

impl EntityDocument {
    /// Flattened text used for keyword/embedding indexing.
    pub fn search_text(&self) -> String {
        let mut parts = vec![self.entity_name.clone(), self.definition.clone()];
        for col in &self.columns {
            parts.push(col.name.clone());
            if let Some(def) = &col.definition {
                parts.push(def.clone());
            }
        }
        parts.retain(|p| !p.trim().is_empty());
        parts.join(". ")
    }

    /// Compact schema rendering injected into agent prompts.
    pub fn render_for_prompt(&self) -> String {
        let mut out = format!("Entity: {} ({})\n", self.fqn, self.entity_name);
        if !self.definition.trim().is_empty() {
            out.push_str(&format!("Definition: {}\n", self.definition));
        }
        out.push_str("Columns:\n");
        for col in &self.columns {
            let mut line = format!("  - {} ({})", col.name, col.data_type);
            if let Some(def) = &col.definition {
                line.push_str(&format!(": {}", def));
            }
            if !col.allowed_values.is_empty() {
                line.push_str(&format!(" [allowed: {}]", col.allowed_values.join(", ")));
            } else if !col.sample_values.is_empty() {
                let samples: Vec<String> = col
                    .sample_values
                    .iter()
                    .take(5)
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                line.push_str(&format!(" [samples: {}]", samples.join(", ")));
            }
            out.push_str(&line);
            out.push('\n');
        }
        if !self.entity_relationships.is_empty() {
            out.push_str("Relationships:\n");
            for rel in &self.entity_relationships {
                let keys: Vec<String> = rel
                    .foreign_keys
                    .iter()
                    .map(|k| format!("{} = {}", k.column, k.foreign_column))
                    .collect();
                out.push_str(&format!("  - joins {} on {}\n", rel.foreign_fqn, keys.join(" AND ")));
            }
        }
        out
    }

    pub fn column(&self, name: &str) -> Option<&EntityColumn> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

// ============ Column Values ============

/// One distinct string dimension value, read from the JSONL value store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ColumnValueRecord {
    #[serde(rename = "FQN")]
    pub fqn: String,
    pub entity: String,
    pub schema: String,
    pub database: String,
    pub column: String,
    pub value: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl ColumnValueRecord {
    pub fn search_text(&self) -> String {
        if self.synonyms.is_empty() {
            self.value.clone()
        } else {
            format!("{}. {}", self.value, self.synonyms.join(". "))
        }
    }
}

// ============ Relationship Graph ============

/// Directed multigraph over entity FQNs, built from direct relationships
/// and the precomputed multi-hop path strings.
#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    adjacency: HashMap<String, HashSet<String>>,
}

impl RelationshipGraph {
    pub fn from_entities(entities: &[EntityDocument]) -> Self {
        let mut adjacency: HashMap<String, HashSet<String>> = HashMap::new();

        for entity in entities {
            let edges = adjacency.entry(entity.fqn.clone()).or_default();
            for rel in &entity.entity_relationships {
                edges.insert(rel.foreign_fqn.clone());
            }

            for path in &entity.complete_entity_relationships_graph {
                let hops: Vec<&str> = path.split("->").map(str::trim).collect();
                for pair in hops.windows(2) {
                    adjacency
                        .entry(pair[0].to_string())
                        .or_default()
                        .insert(pair[1].to_string());
                }
            }
        }

        Self { adjacency }
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn neighbors(&self, fqn: &str) -> Vec<String> {
        self.adjacency
            .get(fqn)
            .map(|set| {
                let mut v: Vec<String> = set.iter().cloned().collect();
                v.sort();
                v
            })
            .unwrap_or_default()
    }

    /// Shortest join path from `from` to `to`, inclusive of both endpoints.
    /// BFS over the adjacency lists; ties broken by insertion order.
    pub fn find_join_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(vec![from.to_string()]);
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut parents: HashMap<&str, &str> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        visited.insert(from);
        queue.push_back(from);

        while let Some(current) = queue.pop_front() {
            let Some(neighbors) = self.adjacency.get(current) else {
                continue;
            };
            for next in neighbors {
                if visited.contains(next.as_str()) {
                    continue;
                }
                visited.insert(next);
                parents.insert(next, current);
                if next == to {
                    let mut path = vec![to.to_string()];
                    let mut cursor = to;
                    while let Some(parent) = parents.get(cursor) {
                        path.push(parent.to_string());
                        cursor = parent;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }

        None
    }

    /// FQNs referenced by relationships that do not resolve to a known
    /// entity. These must be explicitly marked external by the dictionary;
    /// anything else is a broken reference.
    pub fn unresolved_references(
        &self,
        known: &HashSet<String>,
        external: &HashSet<String>,
    ) -> Vec<String> {
        let mut unresolved: Vec<String> = self
            .adjacency
            .values()
            .flatten()
            .filter(|fqn| !known.contains(*fqn) && !external.contains(*fqn))
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        unresolved.sort();
        unresolved
    }
}

/// Split `database.schema.entity` into its parts, if well-formed.
pub fn split_fqn(fqn: &str) -> Option<(&str, &str, &str)> {
    let mut parts = fqn.splitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(db), Some(schema), Some(entity)) if !entity.is_empty() => Some((db, schema, entity)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(fqn: &str, rels: &[&str], graph: &[&str]) -> EntityDocument {
        let (db, schema, name) = split_fqn(fqn).unwrap();
        EntityDocument {
            fqn: fqn.to_string(),
            database: db.to_string(),
            schema: schema.to_string(),
            entity: name.to_string(),
            entity_name: name.to_string(),
            definition: String::new(),
            warehouse: None,
            columns: vec![],
            entity_relationships: rels
                .iter()
                .map(|r| EntityRelationship {
                    foreign_fqn: r.to_string(),
                    foreign_keys: vec![],
                })
                .collect(),
            complete_entity_relationships_graph: graph.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_entity_document_json_field_names() {
        let doc = EntityDocument {
            fqn: "adventureworks.saleslt.salesorderheader".to_string(),
            database: "adventureworks".to_string(),
            schema: "saleslt".to_string(),
            entity: "salesorderheader".to_string(),
            entity_name: "Sales Order Header".to_string(),
            definition: "One row per sales order".to_string(),
            warehouse: None,
            columns: vec![EntityColumn {
                name: "OrderDate".to_string(),
                data_type: "datetime".to_string(),
                definition: Some("Date the order was placed".to_string()),
                allowed_values: vec![],
                sample_values: vec![json!("2008-06-01")],
            }],
            entity_relationships: vec![],
            complete_entity_relationships_graph: vec![],
        };

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["FQN"], "adventureworks.saleslt.salesorderheader");
        assert_eq!(json["EntityName"], "Sales Order Header");
        assert_eq!(json["Columns"][0]["Name"], "OrderDate");
        assert_eq!(json["Columns"][0]["DataType"], "datetime");

        let round: EntityDocument = serde_json::from_value(json).unwrap();
        assert_eq!(round, doc);
    }

    #[test]
    fn test_column_value_record_jsonl_shape() {
        let raw = r#"{"FQN": "db.sales.address", "Entity": "address", "Schema": "sales", "Database": "db", "Column": "CountryRegion", "Value": "United Kingdom", "Synonyms": ["UK", "Britain"]}"#;
        let record: ColumnValueRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.column, "CountryRegion");
        assert_eq!(record.synonyms.len(), 2);
        assert!(record.search_text().contains("Britain"));
    }

    #[test]
    fn test_join_path_direct() {
        let entities = vec![
            entity("db.s.orders", &["db.s.address"], &[]),
            entity("db.s.address", &[], &[]),
        ];
        let graph = RelationshipGraph::from_entities(&entities);
        let path = graph.find_join_path("db.s.orders", "db.s.address").unwrap();
        assert_eq!(path, vec!["db.s.orders", "db.s.address"]);
    }

    #[test]
    fn test_join_path_multi_hop_from_graph_strings() {
        let entities = vec![entity(
            "db.s.orders",
            &[],
            &["db.s.orders -> db.s.customer -> db.s.address"],
        )];
        let graph = RelationshipGraph::from_entities(&entities);
        let path = graph.find_join_path("db.s.orders", "db.s.address").unwrap();
        assert_eq!(
            path,
            vec!["db.s.orders", "db.s.customer", "db.s.address"]
        );
    }

    #[test]
    fn test_join_path_absent() {
        let entities = vec![
            entity("db.s.orders", &[], &[]),
            entity("db.s.address", &[], &[]),
        ];
        let graph = RelationshipGraph::from_entities(&entities);
        assert!(graph.find_join_path("db.s.orders", "db.s.address").is_none());
    }

    #[test]
    fn test_unresolved_references() {
        let entities = vec![entity("db.s.orders", &["db.s.ghost", "db.s.extern"], &[])];
        let graph = RelationshipGraph::from_entities(&entities);
        let known: HashSet<String> = ["db.s.orders".to_string()].into_iter().collect();
        let external: HashSet<String> = ["db.s.extern".to_string()].into_iter().collect();
        let unresolved = graph.unresolved_references(&known, &external);
        assert_eq!(unresolved, vec!["db.s.ghost".to_string()]);
    }

    #[test]
    fn test_split_fqn() {
        assert_eq!(
            split_fqn("adventureworks.saleslt.address"),
            Some(("adventureworks", "saleslt", "address"))
        );
        assert!(split_fqn("just_a_table").is_none());
    }
}
