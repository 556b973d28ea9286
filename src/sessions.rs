//! Session tokens backed by the `session` table.
//!
//! Each row maps an opaque token to a user id and carries its own expiry
//! timestamp, fixed at issuance. A row whose expiry has passed behaves
//! exactly like a missing one, so `cleanup` can purge them whenever it likes.

use chrono::{Duration, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use uuid::Uuid;

use crate::db::UserId;
use crate::errors;
use crate::schema::session;

/// Sessions live for 24 hours and are never extended.
pub const SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token(pub String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Insertable)]
#[diesel(table_name = session)]
struct NewSession<'a> {
    token: &'a str,
    user_id: UserId,
    created_at: NaiveDateTime,
    expires_at: NaiveDateTime,
}

pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub fn issue(conn: &mut SqliteConnection, user_id: UserId) -> errors::Result<Token> {
    issue_at(conn, user_id, now())
}

pub fn issue_at(
    conn: &mut SqliteConnection,
    user_id: UserId,
    now: NaiveDateTime,
) -> errors::Result<Token> {
    let token = Token(Uuid::new_v4().to_string());
    let expires_at = now + Duration::hours(SESSION_TTL_HOURS);
    diesel::insert_into(session::table)
        .values(&NewSession {
            token: token.as_str(),
            user_id,
            created_at: now,
            expires_at,
        })
        .execute(conn)?;
    log::info!("issued session for user {user_id}, expires at {expires_at}");
    Ok(token)
}

pub fn resolve(conn: &mut SqliteConnection, token: &str) -> errors::Result<Option<UserId>> {
    resolve_at(conn, token, now())
}

pub fn resolve_at(
    conn: &mut SqliteConnection,
    token: &str,
    now: NaiveDateTime,
) -> errors::Result<Option<UserId>> {
    let user_id = session::table
        .filter(session::token.eq(token))
        .filter(session::expires_at.gt(now))
        .select(session::user_id)
        .first::<UserId>(conn)
        .optional()?;
    Ok(user_id)
}

/// Returns whether a live session existed for this token.
pub fn revoke(conn: &mut SqliteConnection, token: &str) -> errors::Result<bool> {
    revoke_at(conn, token, now())
}

pub fn revoke_at(
    conn: &mut SqliteConnection,
    token: &str,
    now: NaiveDateTime,
) -> errors::Result<bool> {
    let live = diesel::delete(
        session::table
            .filter(session::token.eq(token))
            .filter(session::expires_at.gt(now)),
    )
    .execute(conn)?;
    // an expired row for the same token is garbage either way
    diesel::delete(session::table.filter(session::token.eq(token))).execute(conn)?;
    if live > 0 {
        log::info!("revoked session {token}");
    }
    Ok(live > 0)
}

/// Delete every session whose expiry is in the past, returns how many went away.
pub fn delete_expired(conn: &mut SqliteConnection, now: NaiveDateTime) -> errors::Result<usize> {
    Ok(diesel::delete(session::table.filter(session::expires_at.le(now))).execute(conn)?)
}
