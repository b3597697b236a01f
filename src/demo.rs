//! Embedded demo warehouse: a small AdventureWorks-flavoured sales dataset
//! loaded into SQLite, with matching entity documents and column values.
//! Lets the CLI and the end-to-end tests run with zero external services.

use rusqlite::Connection;
use serde_json::json;
use std::path::Path;

use crate::catalog::{
    ColumnValueRecord, EntityColumn, EntityDocument, EntityRelationship, ForeignKeyPair,
};

/// Bump when the demo schema changes to trigger a rebuild.
pub const DEMO_SCHEMA_VERSION: i32 = 2;

const CREATE_SALES_ORDER_HEADER: &str = r#"
CREATE TABLE IF NOT EXISTS sales_order_header (
    sales_order_id INTEGER PRIMARY KEY,
    order_date TEXT,
    customer_id INTEGER,
    ship_to_address_id INTEGER,
    status TEXT,
    total_due REAL
)
"#;

const CREATE_ADDRESS: &str = r#"
CREATE TABLE IF NOT EXISTS address (
    address_id INTEGER PRIMARY KEY,
    city TEXT,
    country_region TEXT
)
"#;

const CREATE_PRODUCT: &str = r#"
CREATE TABLE IF NOT EXISTS product (
    product_id INTEGER PRIMARY KEY,
    name TEXT,
    category TEXT,
    list_price REAL
)
"#;

const SALES_ORDER_HEADER_CSV: &str = "\
sales_order_id,order_date,customer_id,ship_to_address_id,status,total_due
71774,2008-06-01,29847,1001,Shipped,972.78
71776,2008-06-01,30072,1002,Shipped,87.09
71780,2008-06-08,30113,1003,Shipped,42452.65
71782,2008-06-15,29485,1001,Shipped,43962.79
71783,2008-06-22,29957,1004,Shipped,92663.56
71784,2008-06-29,29736,1001,Shipped,119960.82
71796,2008-07-06,29660,1005,Shipped,63686.27
71797,2008-07-13,29796,1002,Shipped,86222.81
71815,2008-08-03,30089,1006,Shipped,1261.44
71816,2008-08-10,30027,1003,Shipped,3754.97
71831,2008-09-07,29546,1007,Shipped,2228.05
71832,2008-09-14,29741,1008,Shipped,39531.61
71845,2008-10-05,29938,1004,Shipped,45992.37
71846,2008-11-02,29485,1001,Shipped,2711.41
71856,2008-12-07,30027,1005,Shipped,665.43
71858,2007-05-13,29847,1002,Shipped,15275.19
71863,2007-08-19,29957,1006,Shipped,8733.44
71867,2007-11-25,29736,1003,Shipped,1170.54
71885,2009-01-11,29660,1007,Shipped,550.39
71886,2009-02-08,29796,1008,Shipped,22152.20
";

const ADDRESS_CSV: &str = "\
address_id,city,country_region
1001,London,United Kingdom
1002,Toronto,Canada
1003,Seattle,United States
1004,Manchester,United Kingdom
1005,Paris,France
1006,Berlin,Germany
1007,Melbourne,Australia
1008,Bothell,United States
";

const PRODUCT_CSV: &str = "\
product_id,name,category,list_price
680,HL Road Frame - Black 58,Road Frames,1431.50
707,Sport-100 Helmet Red,Helmets,34.99
708,Sport-100 Helmet Black,Helmets,34.99
712,AWC Logo Cap,Caps,8.99
714,Long-Sleeve Logo Jersey M,Jerseys,49.99
771,Mountain-100 Silver 38,Mountain Bikes,3399.99
773,Mountain-100 Silver 44,Mountain Bikes,3399.99
955,Touring-3000 Blue 54,Touring Bikes,742.35
973,Road-350-W Yellow 40,Road Bikes,1700.99
999,Road-750 Black 52,Road Bikes,539.99
";

/// Create and populate the demo database. Idempotent: an up-to-date
/// database is left untouched.
pub fn seed_demo_database(db_path: &Path) -> Result<usize, String> {
    let conn = Connection::open(db_path)
        .map_err(|e| format!("Failed to open demo database: {}", e))?;

    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if current_version == DEMO_SCHEMA_VERSION {
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sales_order_header", [], |row| row.get(0))
            .unwrap_or(0);
        if count > 0 {
            return Ok(count as usize);
        }
    } else if current_version != 0 {
        println!(
            "[Demo] Schema version mismatch (found v{}, expected v{}), rebuilding",
            current_version, DEMO_SCHEMA_VERSION
        );
        for table in ["sales_order_header", "address", "product"] {
            conn.execute(&format!("DROP TABLE IF EXISTS {}", table), [])
                .map_err(|e| format!("Failed to drop {}: {}", table, e))?;
        }
    }

    for ddl in [CREATE_SALES_ORDER_HEADER, CREATE_ADDRESS, CREATE_PRODUCT] {
        conn.execute(ddl, [])
            .map_err(|e| format!("Failed to create demo table: {}", e))?;
    }

    conn.execute("BEGIN TRANSACTION", [])
        .map_err(|e| format!("Failed to begin transaction: {}", e))?;

    let orders = load_csv(
        &conn,
        SALES_ORDER_HEADER_CSV,
        "INSERT OR REPLACE INTO sales_order_header VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    load_csv(
        &conn,
        ADDRESS_CSV,
        "INSERT OR REPLACE INTO address VALUES (?1, ?2, ?3)",
    )?;
    load_csv(
        &conn,
        PRODUCT_CSV,
        "INSERT OR REPLACE INTO product VALUES (?1, ?2, ?3, ?4)",
    )?;

    conn.execute("COMMIT", [])
        .map_err(|e| format!("Failed to commit transaction: {}", e))?;
    conn.execute(&format!("PRAGMA user_version = {}", DEMO_SCHEMA_VERSION), [])
        .map_err(|e| format!("Failed to set schema version: {}", e))?;

    println!("[Demo] Seeded demo database with {} orders", orders);
    Ok(orders)
}

fn load_csv(conn: &Connection, data: &str, insert_sql: &str) -> Result<usize, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(data.as_bytes());

    let mut stmt = conn
        .prepare(insert_sql)
        .map_err(|e| format!("Failed to prepare insert: {}", e))?;

    let mut count = 0;
    for record in reader.records() {
        let record = record.map_err(|e| format!("Demo CSV parse error: {}", e))?;
        let params: Vec<Box<dyn rusqlite::ToSql>> = record
            .iter()
            .map(|field| -> Box<dyn rusqlite::ToSql> {
                if let Ok(i) = field.parse::<i64>() {
                    Box::new(i)
                } else if let Ok(f) = field.parse::<f64>() {
                    Box::new(f)
                } else {
                    Box::new(field.to_string())
                }
            })
            .collect();
        stmt.execute(rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())))
            .map_err(|e| format!("Demo insert failed: {}", e))?;
        count += 1;
    }
    Ok(count)
}

/// Entity documents describing the demo tables.
pub fn demo_entities() -> Vec<EntityDocument> {
    vec![
        EntityDocument {
            fqn: "demo.main.sales_order_header".to_string(),
            database: "demo".to_string(),
            schema: "main".to_string(),
            entity: "sales_order_header".to_string(),
            entity_name: "Sales Order Header".to_string(),
            definition: "One row per customer sales order, with the order date, ship-to \
                address, and total amount due."
                .to_string(),
            warehouse: None,
            columns: vec![
                EntityColumn {
                    name: "sales_order_id".to_string(),
                    data_type: "INTEGER".to_string(),
                    definition: Some("Unique order identifier".to_string()),
                    allowed_values: vec![],
                    sample_values: vec![json!(71774)],
                },
                EntityColumn {
                    name: "order_date".to_string(),
                    data_type: "TEXT".to_string(),
                    definition: Some("Date the order was placed (YYYY-MM-DD)".to_string()),
                    allowed_values: vec![],
                    sample_values: vec![json!("2008-06-01")],
                },
                EntityColumn {
                    name: "customer_id".to_string(),
                    data_type: "INTEGER".to_string(),
                    definition: Some("Ordering customer".to_string()),
                    allowed_values: vec![],
                    sample_values: vec![],
                },
                EntityColumn {
                    name: "ship_to_address_id".to_string(),
                    data_type: "INTEGER".to_string(),
                    definition: Some("Delivery address, joins address.address_id".to_string()),
                    allowed_values: vec![],
                    sample_values: vec![],
                },
                EntityColumn {
                    name: "status".to_string(),
                    data_type: "TEXT".to_string(),
                    definition: Some("Order fulfilment status".to_string()),
                    allowed_values: vec!["Shipped".to_string(), "Cancelled".to_string()],
                    sample_values: vec![],
                },
                EntityColumn {
                    name: "total_due".to_string(),
                    data_type: "REAL".to_string(),
                    definition: Some("Total amount due for the order".to_string()),
                    allowed_values: vec![],
                    sample_values: vec![json!(972.78)],
                },
            ],
            entity_relationships: vec![EntityRelationship {
                foreign_fqn: "demo.main.address".to_string(),
                foreign_keys: vec![ForeignKeyPair {
                    column: "ship_to_address_id".to_string(),
                    foreign_column: "address_id".to_string(),
                }],
            }],
            complete_entity_relationships_graph: vec![
                "demo.main.sales_order_header -> demo.main.address".to_string(),
            ],
        },
        EntityDocument {
            fqn: "demo.main.address".to_string(),
            database: "demo".to_string(),
            schema: "main".to_string(),
            entity: "address".to_string(),
            entity_name: "Address".to_string(),
            definition: "Ship-to addresses with city and country or region.".to_string(),
            warehouse: None,
            columns: vec![
                EntityColumn {
                    name: "address_id".to_string(),
                    data_type: "INTEGER".to_string(),
                    definition: Some("Unique address identifier".to_string()),
                    allowed_values: vec![],
                    sample_values: vec![],
                },
                EntityColumn {
                    name: "city".to_string(),
                    data_type: "TEXT".to_string(),
                    definition: Some("City name".to_string()),
                    allowed_values: vec![],
                    sample_values: vec![json!("London")],
                },
                EntityColumn {
                    name: "country_region".to_string(),
                    data_type: "TEXT".to_string(),
                    definition: Some("Country or region name".to_string()),
                    allowed_values: vec![],
                    sample_values: vec![json!("United Kingdom"), json!("Canada")],
                },
            ],
            entity_relationships: vec![],
            complete_entity_relationships_graph: vec![],
        },
        EntityDocument {
            fqn: "demo.main.product".to_string(),
            database: "demo".to_string(),
            schema: "main".to_string(),
            entity: "product".to_string(),
            entity_name: "Product".to_string(),
            definition: "Products for sale with category and list price.".to_string(),
            warehouse: None,
            columns: vec![
                EntityColumn {
                    name: "product_id".to_string(),
                    data_type: "INTEGER".to_string(),
                    definition: Some("Unique product identifier".to_string()),
                    allowed_values: vec![],
                    sample_values: vec![],
                },
                EntityColumn {
                    name: "name".to_string(),
                    data_type: "TEXT".to_string(),
                    definition: Some("Product name".to_string()),
                    allowed_values: vec![],
                    sample_values: vec![json!("Sport-100 Helmet Red")],
                },
                EntityColumn {
                    name: "category".to_string(),
                    data_type: "TEXT".to_string(),
                    definition: Some("Product category".to_string()),
                    allowed_values: vec![],
                    sample_values: vec![json!("Helmets"), json!("Road Bikes")],
                },
                EntityColumn {
                    name: "list_price".to_string(),
                    data_type: "REAL".to_string(),
                    definition: Some("Catalog list price".to_string()),
                    allowed_values: vec![],
                    sample_values: vec![],
                },
            ],
            entity_relationships: vec![],
            complete_entity_relationships_graph: vec![],
        },
    ]
}

/// Column-value records for the demo string dimensions.
pub fn demo_column_values() -> Vec<ColumnValueRecord> {
    let mut records = Vec::new();

    let countries = [
        ("United Kingdom", vec!["UK", "Britain", "Great Britain"]),
        ("Canada", vec![]),
        ("United States", vec!["USA", "US", "America"]),
        ("France", vec![]),
        ("Germany", vec![]),
        ("Australia", vec![]),
    ];
    for (value, synonyms) in countries {
        records.push(ColumnValueRecord {
            fqn: "demo.main.address".to_string(),
            entity: "address".to_string(),
            schema: "main".to_string(),
            database: "demo".to_string(),
            column: "country_region".to_string(),
            value: value.to_string(),
            synonyms: synonyms.into_iter().map(String::from).collect(),
        });
    }

    for category in ["Helmets", "Road Bikes", "Mountain Bikes", "Touring Bikes", "Caps"] {
        records.push(ColumnValueRecord {
            fqn: "demo.main.product".to_string(),
            entity: "product".to_string(),
            schema: "main".to_string(),
            database: "demo".to_string(),
            column: "category".to_string(),
            value: category.to_string(),
            synonyms: vec![],
        });
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("demo.db");
        let first = seed_demo_database(&db_path).unwrap();
        let second = seed_demo_database(&db_path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, 20);
    }

    #[test]
    fn test_seeded_data_answers_2008_count() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("demo.db");
        seed_demo_database(&db_path).unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sales_order_header WHERE strftime('%Y', order_date) = '2008'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 15);
    }

    #[test]
    fn test_june_2008_top_country_is_uk() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("demo.db");
        seed_demo_database(&db_path).unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let country: String = conn
            .query_row(
                "SELECT a.country_region FROM sales_order_header o \
                 JOIN address a ON o.ship_to_address_id = a.address_id \
                 WHERE strftime('%Y-%m', o.order_date) = '2008-06' \
                 GROUP BY a.country_region ORDER BY SUM(o.total_due) DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(country, "United Kingdom");
    }

    #[test]
    fn test_demo_entities_reference_resolvable_fqns() {
        let entities = demo_entities();
        let graph = crate::catalog::RelationshipGraph::from_entities(&entities);
        let known: std::collections::HashSet<String> =
            entities.iter().map(|e| e.fqn.clone()).collect();
        assert!(graph
            .unresolved_references(&known, &std::collections::HashSet::new())
            .is_empty());
        assert!(graph
            .find_join_path("demo.main.sales_order_header", "demo.main.address")
            .is_some());
    }
}
