use crate::{kind, silent_logs};
use indoc::indoc;
use ledger::{
    Cause, Coordinator, Driver, ErrorContext, Executor, Result, Statement, StatementResult,
    TransactionError,
};
use std::sync::LazyLock;
use tokio::sync::Mutex;

static MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

const CREATE_USERS: &str = indoc! {"
    CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        name TEXT
    )
"};

const CREATE_POSTS: &str = indoc! {"
    CREATE TABLE posts (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        content TEXT,
        published BOOLEAN NOT NULL DEFAULT 0,
        author_id INTEGER REFERENCES users(id)
    )
"};

async fn reset<D: Driver>(coordinator: &Coordinator<D>) {
    coordinator
        .run_batch([
            "DROP TABLE IF EXISTS posts",
            "DROP TABLE IF EXISTS users",
            CREATE_USERS,
            CREATE_POSTS,
        ])
        .await
        .expect("Failed to create the users and posts tables");
}

async fn count<D: Driver>(coordinator: &Coordinator<D>, table: &str) -> i64 {
    let mut connection = coordinator
        .acquire()
        .await
        .expect("Could not acquire a connection");
    let rows = connection
        .query(format!("SELECT COUNT(*) AS total FROM {table}"))
        .await
        .expect("Could not count the rows");
    rows[0].get("total").expect("Missing total column")
}

/// Create a user and its first post in one unit of work, returning their ids.
pub async fn create_author_and_first_post<D: Driver>(
    coordinator: &Coordinator<D>,
    email: &str,
    name: &str,
    title: &str,
    content: &str,
) -> Result<(i64, i64)> {
    let author = Statement::new("INSERT INTO users (email, name) VALUES (?, ?)")
        .bind(email.to_string())
        .bind(name.to_string());
    let post = Statement::new(
        "INSERT INTO posts (title, content, published, author_id) VALUES (?, ?, ?, ?)",
    )
    .bind(title.to_string())
    .bind(content.to_string())
    .bind(true);
    coordinator
        .run_interactive(move |tx| {
            Box::pin(async move {
                let author_id = tx
                    .execute(author)
                    .await?
                    .last_affected_id
                    .context("The backend did not return the id of the new user")?;
                let post_id = tx
                    .execute(post.bind(author_id))
                    .await?
                    .last_affected_id
                    .context("The backend did not return the id of the new post")?;
                Ok((author_id, post_id))
            })
        })
        .await
}

/// Dependent writes and reads of the blog data set.
pub async fn blog<D: Driver>(coordinator: &Coordinator<D>) {
    let _lock = MUTEX.lock().await;
    reset(coordinator).await;

    let (author_id, post_id) = create_author_and_first_post(
        coordinator,
        "charlie.chaplin@example.com",
        "Charlie Chaplin",
        "First steps with transactions",
        "Either everything commits or nothing does.",
    )
    .await
    .expect("Could not create the author and the post");

    let results = coordinator
        .run_batch([
            Statement::new("INSERT INTO users (email, name) VALUES (?, ?)")
                .bind("john.doe@example.com")
                .bind("John Doe"),
            Statement::new("INSERT INTO posts (title, author_id) VALUES (?, ?)")
                .bind("Learning the basics")
                .bind(author_id),
            Statement::new("SELECT id, title, published FROM posts WHERE author_id = ? ORDER BY id")
                .bind(author_id),
        ])
        .await
        .expect("Failed to run the batch");
    assert_eq!(results.len(), 3);
    let StatementResult::Affected(affected) = &results[0] else {
        panic!("Expected the affected rows of the first insert, got {results:?}");
    };
    assert_eq!(affected.rows_affected, Some(1));
    let john_id = affected.last_affected_id.expect("Missing the id of John");
    assert_ne!(john_id, author_id);
    let rows = results[2].rows().expect("Expected the rows of the select");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get::<i64>("id").unwrap(), post_id);
    assert!(rows[0].get::<bool>("published").unwrap());
    assert_eq!(
        rows[1].get::<String>("title").unwrap(),
        "Learning the basics"
    );
    assert!(!rows[1].get::<bool>("published").unwrap());

    // Reads
    let mut connection = coordinator
        .acquire()
        .await
        .expect("Could not acquire a connection");
    let published = connection
        .query(Statement::new("SELECT id FROM posts WHERE published = ?").bind(true))
        .await
        .expect("Could not select the published posts");
    assert_eq!(published.len(), 1);
    let matching = connection
        .query("SELECT title FROM posts WHERE title LIKE '%TRANSACTIONS%' OR content IS NULL ORDER BY title DESC")
        .await
        .expect("Could not select the posts by title");
    assert_eq!(
        matching
            .iter()
            .map(|r| r.get::<String>("title").unwrap())
            .collect::<Vec<_>>(),
        ["Learning the basics", "First steps with transactions"]
    );
    let user = connection
        .query(
            Statement::new("SELECT id, email, name FROM users WHERE email = ?")
                .bind("john.doe@example.com"),
        )
        .await
        .expect("Could not select the user by email");
    assert_eq!(user.len(), 1);
    assert_eq!(user[0].get::<i64>("id").unwrap(), john_id);
    assert_eq!(user[0].get::<String>("name").unwrap(), "John Doe");

    // Updates and deletes
    let affected = connection
        .execute("UPDATE posts SET published = 1 WHERE published = 0")
        .await
        .expect("Could not publish the posts");
    assert_eq!(affected.rows_affected, Some(1));
    let affected = connection
        .execute(
            Statement::new("UPDATE users SET name = ? WHERE email = ?")
                .bind("John D. Updated")
                .bind("john.doe@example.com"),
        )
        .await
        .expect("Could not rename John");
    assert_eq!(affected.rows_affected, Some(1));
    let temporary = connection
        .execute(
            Statement::new("INSERT INTO posts (title, author_id) VALUES (?, ?)")
                .bind("Temporary post")
                .bind(john_id),
        )
        .await
        .expect("Could not insert the temporary post");
    let affected = connection
        .execute(
            Statement::new("DELETE FROM posts WHERE id = ?")
                .bind(temporary.last_affected_id.expect("Missing the temporary post id")),
        )
        .await
        .expect("Could not delete the temporary post");
    assert_eq!(affected.rows_affected, Some(1));
    drop(connection);
    assert_eq!(count(coordinator, "posts").await, 2);

    // Empty units of work still commit
    let results = coordinator
        .run_batch(Vec::<Statement>::new())
        .await
        .expect("The empty batch did not succeed");
    assert!(results.is_empty());
    coordinator
        .run_interactive(|_tx| Box::pin(async move { Ok(()) }))
        .await
        .expect("The no-op callback did not succeed");
}

/// Failed units of work leave no trace.
pub async fn blog_failures<D: Driver>(coordinator: &Coordinator<D>) {
    let _lock = MUTEX.lock().await;
    reset(coordinator).await;

    create_author_and_first_post(
        coordinator,
        "charlie.chaplin@example.com",
        "Charlie Chaplin",
        "First steps with transactions",
        "Either everything commits or nothing does.",
    )
    .await
    .expect("Could not create the author and the post");

    // Duplicate email: the post written before the failure is rolled back too
    let error = silent_logs! {
        create_author_and_first_post(
            coordinator,
            "charlie.chaplin@example.com",
            "Charlie Duplicate",
            "Duplicate post",
            "This post must never be created.",
        )
        .await
        .expect_err("The duplicate email was accepted")
    };
    let found = kind(&error);
    assert!(matches!(found, TransactionError::Statement { .. }));
    assert_eq!(found.cause(), Some(Cause::Constraint));
    assert!(!found.is_retryable());
    assert_eq!(count(coordinator, "users").await, 1);
    assert_eq!(count(coordinator, "posts").await, 1);

    // Batch stops at the first failure
    let error = silent_logs! {
        coordinator
            .run_batch([
                Statement::new("INSERT INTO users (email) VALUES (?)").bind("bob.builder@example.com"),
                Statement::new("INSERT INTO posts (title, author_id) VALUES (?, ?)")
                    .bind("Orphan")
                    .bind(999_999),
                Statement::new("INSERT INTO users (email) VALUES (?)").bind("never@example.com"),
            ])
            .await
            .expect_err("The post of a missing author was accepted")
    };
    assert_eq!(kind(&error).cause(), Some(Cause::Constraint));
    assert!(format!("{error:#}").starts_with("While running statement 2 of the batch"));
    assert_eq!(count(coordinator, "users").await, 1);

    // Malformed statement
    let error = silent_logs! {
        coordinator
            .run_batch(["INSERT INTO users (email) VALUES ('x@example.com')", "SELEC * FROM users"])
            .await
            .expect_err("The malformed statement was accepted")
    };
    assert_eq!(kind(&error).cause(), Some(Cause::Syntax));
    assert_eq!(count(coordinator, "users").await, 1);

    // Callback error is returned unchanged after the rollback
    let error = coordinator
        .run_interactive(|tx| {
            Box::pin(async move {
                tx.execute("INSERT INTO users (email) VALUES ('alice.smith@example.com')")
                    .await?;
                Err::<(), _>(ledger::Error::msg("The callback gave up"))
            })
        })
        .await
        .expect_err("The failing callback succeeded");
    assert_eq!(error.to_string(), "The callback gave up");
    assert!(TransactionError::of(&error).is_none());
    assert_eq!(count(coordinator, "users").await, 1);

    // A rejected statement handled by the callback does not close the context
    let inserted = silent_logs! {
        coordinator
            .run_interactive(|tx| {
                Box::pin(async move {
                    let duplicate = tx
                        .execute("INSERT INTO users (email) VALUES ('charlie.chaplin@example.com')")
                        .await;
                    assert!(duplicate.is_err());
                    let affected = tx
                        .execute("INSERT INTO users (email) VALUES ('alice.smith@example.com')")
                        .await?;
                    Ok(affected.rows_affected)
                })
            })
            .await
            .expect("The recovered unit of work did not commit")
    };
    assert_eq!(inserted, Some(1));
    assert_eq!(count(coordinator, "users").await, 2);
}

/// Several statements in one text consume the parameters in order.
pub async fn multiple_statements<D: Driver>(coordinator: &Coordinator<D>) {
    let _lock = MUTEX.lock().await;
    reset(coordinator).await;
    let affected = coordinator
        .run_interactive(|tx| {
            Box::pin(async move {
                tx.execute(
                    Statement::new(indoc! {"
                        INSERT INTO users (email, name) VALUES (?, ?);
                        INSERT INTO users (email, name) VALUES (?, ?);
                    "})
                    .bind("first@example.com")
                    .bind("First")
                    .bind("second@example.com")
                    .bind("Second"),
                )
                .await
            })
        })
        .await
        .expect("Could not insert two users with one statement");
    assert_eq!(affected.rows_affected, Some(2));
    let mut connection = coordinator.acquire().await.unwrap();
    let rows = connection
        .query("SELECT name FROM users ORDER BY email DESC")
        .await
        .unwrap();
    assert_eq!(rows[0].get::<String>("name").unwrap(), "Second");
    assert_eq!(rows[1].get::<String>("name").unwrap(), "First");
}

/// Update the name of the user with `email`, creating the user when missing.
async fn upsert_user<D: Driver>(
    coordinator: &Coordinator<D>,
    email: &'static str,
    create: &'static str,
    update: &'static str,
) -> Result<i64> {
    coordinator
        .run_interactive(move |tx| {
            Box::pin(async move {
                let found = tx
                    .query(Statement::new("SELECT id FROM users WHERE email = ?").bind(email))
                    .await?;
                if let Some(row) = found.first() {
                    let id = row.get::<i64>("id")?;
                    tx.execute(
                        Statement::new("UPDATE users SET name = ? WHERE id = ?")
                            .bind(update)
                            .bind(id),
                    )
                    .await?;
                    return Ok(id);
                }
                tx.execute(
                    Statement::new("INSERT INTO users (email, name) VALUES (?, ?)")
                        .bind(email)
                        .bind(create),
                )
                .await?
                .last_affected_id
                .context("The backend did not return the id of the new user")
            })
        })
        .await
}

pub async fn upsert<D: Driver>(coordinator: &Coordinator<D>) {
    let _lock = MUTEX.lock().await;
    reset(coordinator).await;
    let created = upsert_user(coordinator, "bob.builder@example.com", "Bob Builder", "Bob The Builder")
        .await
        .expect("Could not create Bob");
    let updated = upsert_user(coordinator, "bob.builder@example.com", "Bob Builder", "Bob The Builder")
        .await
        .expect("Could not update Bob");
    assert_eq!(created, updated);
    let mut connection = coordinator.acquire().await.unwrap();
    let rows = connection.query("SELECT * FROM users").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<String>("name").unwrap(), "Bob The Builder");
}

pub async fn aggregates<D: Driver>(coordinator: &Coordinator<D>) {
    let _lock = MUTEX.lock().await;
    reset(coordinator).await;
    let (author_id, first_post) = create_author_and_first_post(
        coordinator,
        "john.doe@example.com",
        "John Doe",
        "Getting started",
        "Hello",
    )
    .await
    .unwrap();
    coordinator
        .run_batch([
            Statement::new("INSERT INTO posts (title, author_id) VALUES ('Draft', ?)").bind(author_id),
            Statement::new("INSERT INTO posts (title, published, author_id) VALUES ('Second', 1, ?)")
                .bind(author_id),
        ])
        .await
        .unwrap();
    let results = coordinator
        .run_batch([
            "SELECT COUNT(*) AS total FROM users",
            "SELECT COUNT(*) AS total FROM posts WHERE published = 1",
            "SELECT COUNT(id) AS count, MIN(id) AS min_id, MAX(id) AS max_id FROM posts",
        ])
        .await
        .unwrap();
    let value = |i: usize, column: &str| -> i64 {
        results[i].rows().expect("Expected rows")[0]
            .get(column)
            .expect("Missing aggregate column")
    };
    assert_eq!(value(0, "total"), 1);
    assert_eq!(value(1, "total"), 2);
    assert_eq!(value(2, "count"), 3);
    assert_eq!(value(2, "min_id"), first_post);
    assert!(value(2, "max_id") > first_post);
}
