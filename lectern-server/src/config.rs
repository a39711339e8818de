use std::net::SocketAddr;

use lectern_api::Uuid;

/// Serve the lectern course discussion API
#[derive(Debug, structopt::StructOpt)]
pub struct Opt {
    /// Postgres connection string
    #[structopt(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Address to listen on
    #[structopt(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:8000")]
    pub listen: SocketAddr,

    /// Token accepted on the /api/admin endpoints, which are disabled if unset
    #[structopt(long, env = "ADMIN_TOKEN")]
    pub admin_token: Option<Uuid>,

    /// Size of the database connection pool
    #[structopt(long, env = "MAX_DB_CONNECTIONS", default_value = "16")]
    pub max_db_connections: u32,
}
