use crate::config::Config;
use crate::router::RouteTable;
use crate::services::Registrar;

/// Application state shared by the server and its shutdown path
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub routes: RouteTable,
    pub registrar: Registrar,
}
