//! Basic example of using litesql-grpc: a gateway over SQLite and a remote
//! connection to it.

use litesql_grpc::{Gateway, RemoteDriver, SqliteDriver, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Serve SQLite on a random local port
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?.to_string();
    let gateway = Gateway::new(Arc::new(SqliteDriver::new()));
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(gateway.serve_with_shutdown(listener, None, async move {
        let _ = stopped.await;
    }));

    // The first address refuses connections; the driver fails over
    let targets = vec!["127.0.0.1:1".to_string(), address];
    let driver = RemoteDriver::new(move || Ok(targets.clone()), None, Duration::from_secs(2));
    let conn = driver.open(":memory:").await?;
    println!("Connected to {}", conn.target());

    conn.exec(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, email TEXT)",
        &[],
    )
    .await?;

    // Prepared insert inside a transaction
    let tx = conn.begin().await?;
    let mut insert = tx
        .prepare("INSERT INTO users (name, email) VALUES (?, ?)")
        .await?;
    for (name, email) in [("Alice", "alice@example.com"), ("Bob", "bob@example.com")] {
        let result = insert.exec(&[name.into(), email.into()]).await?;
        println!(
            "Inserted id {} ({} rows affected)",
            result.last_insert_id, result.rows_affected
        );
    }
    insert.close().await?;
    tx.commit().await?;

    // Query with parameters
    let mut rows = conn
        .query("SELECT id, name FROM users WHERE id >= ?", &[Value::Int64(1)])
        .await?;
    println!("Columns: {:?}", rows.column_names());
    while let Some(row) = rows.next().await? {
        let id: i64 = row.get(0)?;
        let name: String = row.get_named("name")?;
        println!("Row: {} {}", id, name);
    }

    // Close the connection and stop the gateway
    conn.close().await?;
    let _ = stop.send(());
    server.await??;

    Ok(())
}
