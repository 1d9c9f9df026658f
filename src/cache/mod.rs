pub mod lazy;
pub mod monitored;
pub mod refresh_ahead;

pub use lazy::LazyRefreshCache;
pub use monitored::{MonitoredCache, SocketHandle};
pub use refresh_ahead::RefreshAheadCache;

/// Whether `database_version` supports automatic IAM database authentication.
/// Only Postgres and MySQL engines mint certificates carrying an IAM
/// identity; every other engine (SQL Server included) does not.
pub(crate) fn supports_auto_iam(database_version: &str) -> bool {
    let v = database_version.to_ascii_uppercase();
    v.starts_with("POSTGRES") || v.starts_with("MYSQL")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_postgres_and_mysql_support_iam_auth() {
        assert!(supports_auto_iam("POSTGRES_15"));
        assert!(supports_auto_iam("MYSQL_8_0"));
        assert!(!supports_auto_iam("SQLSERVER_2019_STANDARD"));
        assert!(!supports_auto_iam("SPANNER"));
    }
}
