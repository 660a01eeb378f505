//! Database dispatch macros for reducing code duplication.
//!
//! The sqlx backend keeps one concrete connection type per database. These
//! macros generate the match over those variants while keeping each arm
//! readable.

/// Macro for generating match arms over `PhysicalConnection` variants.
///
/// # Example
///
/// ```ignore
/// impl_conn_dispatch!(&mut self.inner, {
///     MySql(c) => mysql::run(c, sql, params).await,
///     Postgres(c) => postgres::run(c, sql, params).await,
///     SQLite(c) => sqlite::run(c, sql, params).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_conn_dispatch {
    ($conn:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $conn {
            $(
                $crate::db::sqlx_driver::PhysicalConnection::$variant($c) => $body,
            )+
        }
    };
}

pub use impl_conn_dispatch;
