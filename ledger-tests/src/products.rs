use indoc::indoc;
use ledger::{Coordinator, Driver, Executor, RowLabeled, Statement};
use serde_json::{Value as JsonValue, json};
use std::sync::LazyLock;
use tokio::sync::Mutex;

static MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

fn insert(name: &str, description: Option<JsonValue>, tags: JsonValue) -> Statement {
    Statement::new("INSERT INTO products (name, description, tags) VALUES (?, ?, ?)")
        .bind(name.to_string())
        .bind(description)
        .bind(tags)
}

fn document(row: &RowLabeled, column: &str) -> JsonValue {
    row.get::<Option<JsonValue>>(column)
        .unwrap_or_else(|e| panic!("Column `{column}` is not a JSON document: {e:#}"))
        .unwrap_or_default()
}

/// Structured documents stored in JSON columns.
pub async fn products<D: Driver>(coordinator: &Coordinator<D>) {
    let _lock = MUTEX.lock().await;
    coordinator
        .run_batch([
            "DROP TABLE IF EXISTS products",
            indoc! {"
                CREATE TABLE products (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    description JSON,
                    tags JSON
                )
            "},
        ])
        .await
        .expect("Failed to create the products table");

    let results = coordinator
        .run_batch([
            insert(
                "Smart TV",
                Some(json!({ "resolution": "4K UHD", "size": "55 inch" })),
                json!(["electronics", "tv", "smart"]),
            ),
            insert(
                "Smartphone X",
                Some(json!({ "screen": "AMOLED", "storage": "128GB", "camera": "48MP" })),
                json!(["electronics", "mobile", "gadget"]),
            ),
            insert("Mechanical Keyboard", None, json!(["computer", "accessories"])),
            insert("Gaming Mouse", None, json!(["computer", "gaming"])),
            insert(
                "Smartwatch Y",
                Some(json!({
                    "display": "OLED",
                    "features": ["heart rate", "GPS", "NFC"],
                    "compatibility": { "ios": true, "android": true },
                })),
                json!(["wearable", "health", "tech"]),
            ),
        ])
        .await
        .expect("Could not insert the products");
    let watch_id = results[4]
        .rows_affected()
        .and_then(|v| v.last_affected_id)
        .expect("Missing the id of the smartwatch");

    let mut connection = coordinator.acquire().await.unwrap();
    let rows = connection
        .query(Statement::new("SELECT * FROM products WHERE id = ?").bind(watch_id))
        .await
        .expect("Could not select the smartwatch");
    assert_eq!(rows.len(), 1);
    let description = document(&rows[0], "description");
    assert_eq!(description["display"], "OLED");
    assert_eq!(description["features"], json!(["heart rate", "GPS", "NFC"]));
    assert_eq!(description["compatibility"]["ios"], true);
    assert_eq!(
        document(&rows[0], "tags"),
        json!(["wearable", "health", "tech"])
    );

    let rows = connection
        .query("SELECT name, description FROM products WHERE description IS NULL ORDER BY name")
        .await
        .unwrap();
    assert_eq!(
        rows.iter()
            .map(|r| r.get::<String>("name").unwrap())
            .collect::<Vec<_>>(),
        ["Gaming Mouse", "Mechanical Keyboard"]
    );
    drop(connection);

    // Partial update of the document: read, merge and write back in one unit of work
    let updated = coordinator
        .run_interactive(move |tx| {
            Box::pin(async move {
                let rows = tx
                    .query(
                        Statement::new("SELECT description FROM products WHERE id = ?")
                            .bind(watch_id),
                    )
                    .await?;
                let mut description = document(&rows[0], "description");
                description["battery"] = json!("300mAh");
                tx.execute(
                    Statement::new("UPDATE products SET description = ?, tags = ? WHERE id = ?")
                        .bind(description.clone())
                        .bind(json!(["wearable", "health", "tech", "waterproof"]))
                        .bind(watch_id),
                )
                .await?;
                Ok(description)
            })
        })
        .await
        .expect("Could not update the smartwatch description");
    let mut connection = coordinator.acquire().await.unwrap();
    let rows = connection
        .query(Statement::new("SELECT description, tags FROM products WHERE id = ?").bind(watch_id))
        .await
        .unwrap();
    assert_eq!(document(&rows[0], "description"), updated);
    assert_eq!(document(&rows[0], "description")["display"], "OLED");
    assert_eq!(document(&rows[0], "tags")[3], "waterproof");

    let rows = connection
        .query("SELECT id, name FROM products WHERE name LIKE '%TV%'")
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].names(), ["id", "name"]);
    let affected = connection
        .execute("DELETE FROM products WHERE name LIKE '%Phone%'")
        .await
        .unwrap();
    assert_eq!(affected.rows_affected, Some(1));
}
