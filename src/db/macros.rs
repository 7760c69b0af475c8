//! Database dispatch macros for reducing code duplication.
//!
//! The sqlx-backed connection holds one of three dialect-specific pool
//! connections. These macros expand a single body once per dialect so each
//! arm is type-checked against its own driver types.

/// Run `$body` against whichever dialect `$link` holds.
///
/// The two-binder form also brings the dialect's parameter binder into scope.
///
/// ```ignore
/// dispatch_link!(link, |conn| sqlx::Executor::execute(&mut **conn, "BEGIN").await);
/// dispatch_link!(link, |conn, bind| {
///     let mut query = sqlx::query(sql);
///     for p in params { query = bind(query, p); }
///     query.execute(&mut **conn).await
/// });
/// ```
macro_rules! dispatch_link {
    ($link:expr, |$conn:ident| $body:expr) => {
        match $link {
            $crate::db::pool::Link::MySql($conn) => $body,
            $crate::db::pool::Link::Postgres($conn) => $body,
            $crate::db::pool::Link::SQLite($conn) => $body,
        }
    };
    ($link:expr, |$conn:ident, $bind:ident| $body:expr) => {
        match $link {
            $crate::db::pool::Link::MySql($conn) => {
                let $bind = $crate::db::params::bind_mysql_param;
                $body
            }
            $crate::db::pool::Link::Postgres($conn) => {
                let $bind = $crate::db::params::bind_postgres_param;
                $body
            }
            $crate::db::pool::Link::SQLite($conn) => {
                let $bind = $crate::db::params::bind_sqlite_param;
                $body
            }
        }
    };
}

/// Run `$body` against whichever dialect pool `$pool` wraps.
macro_rules! dispatch_pool {
    ($pool:expr, |$p:ident| $body:expr) => {
        match $pool {
            $crate::db::pool::DbPool::MySql($p) => $body,
            $crate::db::pool::DbPool::Postgres($p) => $body,
            $crate::db::pool::DbPool::SQLite($p) => $body,
        }
    };
}
