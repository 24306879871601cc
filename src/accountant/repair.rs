use tracing::{error, info};

use crate::{
    accountant::Accountant, data::domain::Username, error::BursarResult, store::PositionStore,
};

impl<S: PositionStore> Accountant<S> {
    /// Startup pass: any local user with in-flight postings crashed mid
    /// protocol and needs their books re-derived from the ledger.
    pub async fn repair_user_positions(&self) -> BursarResult<()> {
        for user in self.my_users().await? {
            info!(user = %user.username, "checking user");
            if self.store.pending_for_user(&user.username).await? > 0 {
                self.repair_user_position(&user.username).await?;
            }
        }
        info!("all users checked");
        Ok(())
    }

    /// Disable the user, force their pending counters back to zero, and
    /// keep re-checking until their books reconcile against the ledger.
    #[tracing::instrument(skip(self), fields(user = %username))]
    pub async fn repair_user_position(&self, username: &Username) -> BursarResult<()> {
        info!("repairing positions");
        self.disable_user(username).await;

        if let Err(e) = self.store.reset_pending_for_user(username).await {
            error!(error = %e, "could not reset pending counters");
            self.services()
                .alerts
                .send_alert(&format!("User {username} in trouble. Cannot correct position!"));
            return Err(e);
        }

        loop {
            tokio::time::sleep(self.config().quiescence_poll()).await;
            match self.check_user(username).await {
                Ok(true) => return Ok(()),
                Ok(false) => info!("user still not clean"),
                Err(e) => {
                    error!(error = %e, "reconciliation failed");
                    self.services().alerts.send_alert(&format!(
                        "User {username} in trouble. Cannot correct position!"
                    ));
                    return Err(e);
                }
            }
        }
    }

    /// One reconciliation pass. Returns `true` and re-enables the user once
    /// every position was quiescent and has been checkpointed against the
    /// canonical ledger value.
    pub async fn check_user(&self, username: &Username) -> BursarResult<bool> {
        let positions = self.store.positions_for_user(username).await?;

        if positions.iter().any(|p| !p.is_quiescent()) {
            return Ok(false);
        }

        for position in &positions {
            let (canonical, at) = self.canonical_position(position).await?;
            self.store
                .checkpoint_position(&position.username, &position.ticker, canonical, at)
                .await?;
        }

        info!(user = %username, "positions corrected");
        self.enable_user(username);
        Ok(true)
    }
}
