//! Pooled tiberius connections.

use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{Result, TransferError};

/// Connection acquisition timeout from pool (30 seconds).
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connection timeout (5 minutes).
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum connection lifetime (30 minutes).
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// TCP keepalive interval (30 seconds).
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

pub type MssqlClient = Client<Compat<TcpStream>>;

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    config: ConnectionConfig,
}

impl TiberiusConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.application_name(&self.config.application_name);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.encrypt {
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }
        // Trust applies whether or not the login is encrypted.
        if self.config.trust_unverified_tls {
            config.trust_cert();
        }

        config
    }

    async fn open_tcp(addr: &str) -> std::result::Result<TcpStream, tiberius::error::Error> {
        let tcp = TcpStream::connect(addr).await.map_err(io_error)?;
        tcp.set_nodelay(true).ok();

        let std_tcp = tcp.into_std().map_err(io_error)?;
        let socket = socket2::Socket::from(std_tcp);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(TCP_KEEPALIVE_INTERVAL)
            .with_interval(TCP_KEEPALIVE_INTERVAL);
        if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
            warn!("Failed to set TCP keepalive on SQL Server connection: {}", e);
        }

        let std_tcp: std::net::TcpStream = socket.into();
        std_tcp.set_nonblocking(true).map_err(io_error)?;
        TcpStream::from_std(std_tcp).map_err(io_error)
    }
}

fn io_error(e: std::io::Error) -> tiberius::error::Error {
    tiberius::error::Error::Io {
        kind: e.kind(),
        message: e.to_string(),
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = MssqlClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = Self::open_tcp(&config.get_addr()).await?;
        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// A bb8 pool of tiberius clients for one database.
///
/// Serves as the catalog, the ranked source and the insert sink provider;
/// which roles a pool plays is up to the caller.
#[derive(Clone)]
pub struct MssqlPool {
    pub(super) pool: Pool<TiberiusConnectionManager>,
    role: &'static str,
    endpoint: String,
}

impl MssqlPool {
    /// Build a pool and verify one connection.
    ///
    /// `role` names the pool in logs and errors ("source", "destination").
    pub async fn connect(config: &ConnectionConfig, role: &'static str, max_size: u32) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .min_idle(Some(1))
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .max_lifetime(Some(POOL_MAX_LIFETIME))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| TransferError::pool(e, format!("creating {} connection pool", role)))?;

        let this = Self {
            pool,
            role,
            endpoint: config.endpoint(),
        };
        this.health_check().await?;

        debug!("{} driver name: {}", role, config.driver_name);
        info!(
            "Connected to SQL Server ({}): {} (pool_size={})",
            role, this.endpoint, max_size
        );
        Ok(this)
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Round-trip `SELECT 1`.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get().await?;
        conn.simple_query("SELECT 1")
            .await
            .map_err(|e| TransferError::connection(format!("{} health check", self.role), e))?
            .into_row()
            .await
            .map_err(|e| TransferError::connection(format!("{} health check", self.role), e))?;
        Ok(())
    }

    pub(super) async fn get(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool.get().await.map_err(|e| {
            TransferError::pool(e, format!("getting {} connection from pool", self.role))
        })
    }

    pub(super) async fn get_owned(
        &self,
    ) -> Result<PooledConnection<'static, TiberiusConnectionManager>> {
        self.pool.get_owned().await.map_err(|e| {
            TransferError::pool(e, format!("getting {} connection from pool", self.role))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(trust: bool, encrypt: bool) -> ConnectionConfig {
        ConnectionConfig {
            host: "db.internal".to_string(),
            port: 14330,
            database: "staging".to_string(),
            user: "loader".to_string(),
            password: "pw".to_string(),
            driver_name: "ODBC Driver 18 for SQL Server".to_string(),
            trust_unverified_tls: trust,
            encrypt,
            application_name: "mssql-bulk-transfer".to_string(),
        }
    }

    #[test]
    fn test_build_config_address() {
        let manager = TiberiusConnectionManager::new(connection(true, true));
        let config = manager.build_config();
        assert_eq!(config.get_addr(), "db.internal:14330");
    }
}
