use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use campd::auth::AuthConfig;
use campd::engine::Engine;
use campd::notify::NotifyHub;
use campd::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("campd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(
        Engine::new(dir.join("campd.wal"), Arc::new(NotifyHub::new())).unwrap(),
    );
    let auth = Arc::new(AuthConfig::new(
        "campd".into(),
        "campd-admin".into(),
        ["admin".to_string()],
    ));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            let auth = auth.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, auth, None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr, user: &str, password: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string().as_str())
        .port(addr.port())
        .dbname("campd")
        .user(user)
        .password(password);

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn connect_admin(addr: SocketAddr) -> tokio_postgres::Client {
    connect(addr, "admin", "campd-admin").await
}

fn data_rows(messages: Vec<SimpleQueryMessage>) -> Vec<SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn sqlstate(err: &tokio_postgres::Error) -> String {
    err.code().map(|c| c.code().to_string()).unwrap_or_default()
}

async fn create_campsite(client: &tokio_postgres::Client, capacity: u32) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO campsites (id, name, nightly_price, daily_capacity) VALUES ('{id}', 'Riverside', 10000, {capacity})"
        ))
        .await
        .unwrap();
    id
}

async fn create_equipment(client: &tokio_postgres::Client, stock: u32) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO equipment (id, name, price, stock) VALUES ('{id}', 'Tent', 50000, {stock})"
        ))
        .await
        .unwrap();
    id
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn connect_and_query_catalog() {
    let addr = start_test_server().await;
    let admin = connect_admin(addr).await;

    let id = create_campsite(&admin, 10).await;

    let rows = data_rows(admin.simple_query("SELECT * FROM campsites").await.unwrap());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0), Some(id.to_string().as_str()));
    assert_eq!(rows[0].get(1), Some("Riverside"));
    assert_eq!(rows[0].get(3), Some("10"));
}

#[tokio::test]
async fn booking_flow_end_to_end() {
    let addr = start_test_server().await;
    let admin = connect_admin(addr).await;
    let alice = connect(addr, "alice", "campd").await;

    let campsite = create_campsite(&admin, 10).await;
    let equipment = create_equipment(&admin, 5).await;

    let booking = Ulid::new();
    alice
        .batch_execute(&format!(
            r#"INSERT INTO bookings (id, campsite_id, start_date, end_date, people, equipment) VALUES ('{booking}', '{campsite}', '2025-02-01', '2025-02-03', 4, '[{{"equipment_id":"{equipment}","quantity":2,"nights":1}}]')"#
        ))
        .await
        .unwrap();

    // Pending bookings reserve nothing.
    let rows = data_rows(
        alice
            .simple_query(&format!(
                "SELECT * FROM availability WHERE campsite_id = '{campsite}' AND day >= '2025-02-01' AND day < '2025-02-03'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.get(1), Some("0"));
        assert_eq!(row.get(2), Some("10"));
    }

    // Admin verifies payment.
    admin
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'PAID' WHERE id = '{booking}'"
        ))
        .await
        .unwrap();

    let rows = data_rows(
        alice
            .simple_query(&format!(
                "SELECT * FROM availability WHERE campsite_id = '{campsite}' AND day >= '2025-02-01' AND day < '2025-02-03'"
            ))
            .await
            .unwrap(),
    );
    for row in &rows {
        assert_eq!(row.get(1), Some("4"));
        assert_eq!(row.get(2), Some("6"));
    }

    // Equipment consumed on the first night only (window anchored at start).
    let rows = data_rows(
        alice
            .simple_query(
                "SELECT * FROM equipment_availability WHERE day >= '2025-02-01' AND day < '2025-02-03'",
            )
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get(1), Some("2025-02-01"));
    assert_eq!(rows[0].get(3), Some("3"));
    assert_eq!(rows[1].get(1), Some("2025-02-02"));
    assert_eq!(rows[1].get(3), Some("5"));

    // Owner sees the derived price and the new status.
    let rows = data_rows(
        alice
            .simple_query(&format!("SELECT * FROM bookings WHERE id = '{booking}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(6), Some("PAID"));
    assert_eq!(rows[0].get(7), Some("180000"));
}

#[tokio::test]
async fn capacity_rejection_carries_the_violating_day() {
    let addr = start_test_server().await;
    let admin = connect_admin(addr).await;
    let alice = connect(addr, "alice", "campd").await;

    let campsite = create_campsite(&admin, 10).await;

    let first = Ulid::new();
    let second = Ulid::new();
    for id in [first, second] {
        alice
            .batch_execute(&format!(
                "INSERT INTO bookings (id, campsite_id, start_date, end_date, people) VALUES ('{id}', '{campsite}', '2025-02-01', '2025-02-03', 6)"
            ))
            .await
            .unwrap();
    }

    admin
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'PAID' WHERE id = '{first}'"
        ))
        .await
        .unwrap();
    let err = admin
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'PAID' WHERE id = '{second}'"
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "P0001");
    let message = err.to_string();
    assert!(message.contains("2025-02-01"), "got: {message}");
    assert!(message.contains("remaining 4"), "got: {message}");
}

#[tokio::test]
async fn role_enforcement_at_the_surface() {
    let addr = start_test_server().await;
    let admin = connect_admin(addr).await;
    let alice = connect(addr, "alice", "campd").await;

    let campsite = create_campsite(&admin, 10).await;

    // Catalog writes are admin-only.
    let err = alice
        .batch_execute(&format!(
            "INSERT INTO campsites (id, name, nightly_price, daily_capacity) VALUES ('{}', 'Shady Grove', 9000, 8)",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "42501");

    // So are status transitions.
    let booking = Ulid::new();
    alice
        .batch_execute(&format!(
            "INSERT INTO bookings (id, campsite_id, start_date, end_date, people) VALUES ('{booking}', '{campsite}', '2025-02-01', '2025-02-03', 2)"
        ))
        .await
        .unwrap();
    let err = alice
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'PAID' WHERE id = '{booking}'"
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "42501");
}

#[tokio::test]
async fn ownership_enforced_across_users() {
    let addr = start_test_server().await;
    let admin = connect_admin(addr).await;
    let alice = connect(addr, "alice", "campd").await;
    let bob = connect(addr, "bob", "campd").await;

    let campsite = create_campsite(&admin, 10).await;
    let equipment = create_equipment(&admin, 5).await;

    let booking = Ulid::new();
    alice
        .batch_execute(&format!(
            "INSERT INTO bookings (id, campsite_id, start_date, end_date, people) VALUES ('{booking}', '{campsite}', '2025-02-01', '2025-02-03', 2)"
        ))
        .await
        .unwrap();

    // Bob can neither read nor edit Alice's booking.
    let err = bob
        .simple_query(&format!("SELECT * FROM bookings WHERE id = '{booking}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "42501");

    let err = bob
        .batch_execute(&format!(
            r#"UPDATE bookings SET equipment = '[{{"equipment_id":"{equipment}","quantity":1,"nights":1}}]' WHERE id = '{booking}'"#
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "42501");

    // Bob's own listing is empty; admin sees everything.
    let rows = data_rows(bob.simple_query("SELECT * FROM bookings").await.unwrap());
    assert!(rows.is_empty());
    let rows = data_rows(admin.simple_query("SELECT * FROM bookings").await.unwrap());
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn malformed_requests_map_to_sqlstates() {
    let addr = start_test_server().await;
    let admin = connect_admin(addr).await;
    let alice = connect(addr, "alice", "campd").await;

    let campsite = create_campsite(&admin, 10).await;

    // Reversed range: engine-level Invalid.
    let err = alice
        .batch_execute(&format!(
            "INSERT INTO bookings (id, campsite_id, start_date, end_date, people) VALUES ('{}', '{campsite}', '2025-02-03', '2025-02-01', 2)",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "22023");

    // Unparseable date: rejected by the dialect layer.
    let err = alice
        .batch_execute(&format!(
            "INSERT INTO bookings (id, campsite_id, start_date, end_date, people) VALUES ('{}', '{campsite}', 'tomorrow', '2025-02-03', 2)",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "42601");

    // Unknown campsite.
    let err = alice
        .batch_execute(&format!(
            "INSERT INTO bookings (id, campsite_id, start_date, end_date, people) VALUES ('{}', '{}', '2025-02-01', '2025-02-03', 2)",
            Ulid::new(),
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "P0002");

    // Unknown table.
    let err = alice.simple_query("SELECT * FROM reservations").await.unwrap_err();
    assert_eq!(sqlstate(&err), "42601");
}

#[tokio::test]
async fn equipment_deletion_conflicts_while_referenced() {
    let addr = start_test_server().await;
    let admin = connect_admin(addr).await;
    let alice = connect(addr, "alice", "campd").await;

    let campsite = create_campsite(&admin, 10).await;
    let equipment = create_equipment(&admin, 5).await;

    alice
        .batch_execute(&format!(
            r#"INSERT INTO bookings (id, campsite_id, start_date, end_date, people, equipment) VALUES ('{}', '{campsite}', '2025-02-01', '2025-02-03', 2, '[{{"equipment_id":"{equipment}","quantity":1,"nights":1}}]')"#,
            Ulid::new()
        ))
        .await
        .unwrap();

    let err = admin
        .batch_execute(&format!("DELETE FROM equipment WHERE id = '{equipment}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "23503");
}

#[tokio::test]
async fn listen_channel_validation() {
    let addr = start_test_server().await;
    let admin = connect_admin(addr).await;

    let campsite = create_campsite(&admin, 10).await;
    admin
        .batch_execute(&format!("LISTEN campsite_{campsite}"))
        .await
        .unwrap();

    let err = admin.batch_execute("LISTEN weather").await.unwrap_err();
    assert_eq!(sqlstate(&err), "42000");
}
