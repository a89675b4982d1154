pub mod connection_service;
pub mod database; // Dialect adapters for PostgreSQL and MySQL
pub mod datasource_service;
pub mod sample_service;
pub mod virtual_base_view_service;
pub mod virtual_view_service;

#[cfg(test)]
pub(crate) mod test_support;

pub use connection_service::*;
pub use datasource_service::*;
pub use sample_service::*;
pub use virtual_base_view_service::*;
pub use virtual_view_service::*;

use crate::config::Config;
use crate::services::database::{DatabaseConnector, DriverConnector};
use crate::storage::SqliteStorage;
use std::sync::Arc;
use std::time::Duration;

/// Every core service, sharing one catalog handle and one connector
pub struct Services {
    pub connections: ConnectionService,
    pub data_sources: DataSourceService,
    pub virtual_views: VirtualViewService,
    pub virtual_base_views: VirtualBaseViewService,
    pub samples: SampleDataComposer,
}

impl Services {
    pub fn new(storage: Arc<SqliteStorage>, connector: Arc<dyn DatabaseConnector>, config: &Config) -> Self {
        Self {
            connections: ConnectionService::new(storage.clone(), connector.clone()),
            data_sources: DataSourceService::new(storage.clone()),
            virtual_views: VirtualViewService::new(storage.clone()),
            virtual_base_views: VirtualBaseViewService::new(storage.clone()),
            samples: SampleDataComposer::new(storage, connector, config.sampling.row_limit),
        }
    }

    /// Services backed by real PostgreSQL / MySQL drivers
    pub fn with_drivers(storage: Arc<SqliteStorage>, config: &Config) -> Self {
        let connector = Arc::new(DriverConnector::new(Duration::from_secs(
            config.external.connect_timeout_secs,
        )));
        Self::new(storage, connector, config)
    }
}
