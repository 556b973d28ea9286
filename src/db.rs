use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use sha1::{Digest, Sha1};

use crate::errors::{self, FileStoreError};
use crate::schema::{file, users};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// How long a pooled connection waits on a locked database before giving up.
const BUSY_TIMEOUT_MS: u32 = 5_000;

pub type UserId = i32;

#[derive(Debug, Clone, PartialEq, Eq, Queryable)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub password: String,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUser<'a> {
    email: &'a str,
    password: &'a str,
}

define_sql_function!(fn last_insert_rowid() -> diesel::sql_types::Integer);

pub fn connect(database_url: &str) -> errors::Result<SqliteConnection> {
    let mut conn = SqliteConnection::establish(database_url)
        .map_err(|err| anyhow!("Cannot connect to {database_url}: {err}"))?;
    prepare(&mut conn)?;
    Ok(conn)
}

/// Per-connection pragmas. sqlite doesn't persist them so this runs each time
/// a connection is handed out.
pub fn prepare(conn: &mut SqliteConnection) -> errors::Result<()> {
    conn.batch_execute(&format!(
        "PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}; PRAGMA foreign_keys = ON;"
    ))?;
    Ok(())
}

pub fn run_migrations(conn: &mut SqliteConnection) -> errors::Result<()> {
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|err| anyhow!("Cannot run migrations: {err}"))?;
    for version in applied {
        log::info!("applied migration {version}");
    }
    Ok(())
}

pub(crate) fn last_inserted_id(conn: &mut SqliteConnection) -> errors::Result<i32> {
    Ok(diesel::select(last_insert_rowid()).get_result::<i32>(conn)?)
}

/// The fixed one-way digest stored in `users.password`: lowercase hex sha1.
pub fn hash_password(password: &str) -> String {
    format!("{:x}", Sha1::digest(password.as_bytes()))
}

/// Look up the user matching exactly this email and password.
/// Wrong credentials are an expected outcome and yield `None`.
pub fn verify_credentials(
    conn: &mut SqliteConnection,
    email: &str,
    password: &str,
) -> errors::Result<Option<UserId>> {
    let hashed = hash_password(password);
    let id = users::table
        .filter(users::email.eq(email))
        .filter(users::password.eq(&hashed))
        .select(users::id)
        .first::<UserId>(conn)
        .optional()?;
    Ok(id)
}

pub fn gen_user(conn: &mut SqliteConnection, email: &str, password: &str) -> errors::Result<User> {
    if email.is_empty() {
        return Err(FileStoreError::validation("Missing email"));
    }
    if password.is_empty() {
        return Err(FileStoreError::validation("Missing password"));
    }

    let hashed = hash_password(password);
    let inserted = diesel::insert_into(users::table)
        .values(&NewUser {
            email,
            password: &hashed,
        })
        .execute(conn);

    match inserted {
        Ok(_) => (),
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => return Err(FileStoreError::UserAlreadyExists(email.to_string())),
        Err(err) => return Err(err.into()),
    }

    let id = last_inserted_id(conn)?;
    log::info!("created user {id} for {email}");
    Ok(User {
        id,
        email: email.to_string(),
        password: hashed,
    })
}

pub fn get_user(conn: &mut SqliteConnection, user_id: UserId) -> errors::Result<Option<User>> {
    Ok(users::table
        .find(user_id)
        .first::<User>(conn)
        .optional()?)
}

pub fn count_users(conn: &mut SqliteConnection) -> errors::Result<i64> {
    Ok(users::table.count().get_result(conn)?)
}

pub fn count_files(conn: &mut SqliteConnection) -> errors::Result<i64> {
    Ok(file::table.count().get_result(conn)?)
}

/// Cheap liveness check for /status
pub fn is_alive(conn: &mut SqliteConnection) -> bool {
    match conn.batch_execute("SELECT 1") {
        Ok(_) => true,
        Err(err) => {
            log::error!("database is not reachable: {err:?}");
            false
        }
    }
}
