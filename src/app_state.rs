use crate::Config;
use crate::coordinator::ClaimCoordinator;
use crate::store::CodeStore;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CodeStore>,
    pub coordinator: Arc<ClaimCoordinator>,
}

impl AppState {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let store = Arc::new(CodeStore::open(config.db_path()).await?);

        // Populate an empty store from the codes file. An unreadable file is
        // logged and skipped; the service still starts.
        match store.import_from_file(config.codes_path()).await {
            Ok(inserted) if inserted > 0 => {
                info!(inserted, "Startup import finished");
            }
            Ok(_) => {}
            Err(error) => {
                warn!(%error, path = %config.codes_path().display(), "Startup import failed");
            }
        }

        let coordinator = Arc::new(ClaimCoordinator::new(
            store.clone(),
            config.max_claims_per_user,
        ));

        Ok(Self { store, coordinator })
    }
}
