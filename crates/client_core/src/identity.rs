use std::sync::Arc;

use shared::domain::User;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::{error::ClientResult, transport::ChatBackend};

/// Resolves the signed-in user once; later calls return the cached user.
pub struct IdentityResolver {
    backend: Arc<dyn ChatBackend>,
    resolved: OnceCell<User>,
}

impl IdentityResolver {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            resolved: OnceCell::new(),
        }
    }

    pub async fn resolve_current_user(&self) -> ClientResult<User> {
        let user = self
            .resolved
            .get_or_try_init(|| async {
                match self.backend.current_user().await {
                    Ok(user) => {
                        info!(user_id = user.id.0, name = %user.display_name, "identity: resolved");
                        Ok(user)
                    }
                    Err(err) => {
                        warn!("identity: resolution failed: {err}");
                        Err(err)
                    }
                }
            })
            .await?;
        Ok(user.clone())
    }

    pub fn cached(&self) -> Option<&User> {
        self.resolved.get()
    }
}
