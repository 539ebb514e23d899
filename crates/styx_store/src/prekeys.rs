//! Prekey state persistence on top of any [`KeyValueStore`].
//!
//! The state holds the identity and all unconsumed prekey secrets, so it is
//! written back after every mutation (respond, rotate, replenish).

use styx_crypto::LocalPrekeyState;

use crate::{error::StoreError, traits::KeyValueStore};

pub fn prekey_state_key(owner: &str) -> String {
    format!("styx.prekeys.{owner}")
}

pub async fn save_prekey_state(
    store: &dyn KeyValueStore,
    owner: &str,
    state: &LocalPrekeyState,
) -> Result<(), StoreError> {
    let bytes = state.to_json()?;
    store.put(&prekey_state_key(owner), &bytes).await?;
    tracing::debug!(
        target: "styx_store",
        event = "prekeys_saved",
        owner,
        one_time = state.one_time_prekeys.len()
    );
    Ok(())
}

pub async fn load_prekey_state(
    store: &dyn KeyValueStore,
    owner: &str,
) -> Result<Option<LocalPrekeyState>, StoreError> {
    match store.get(&prekey_state_key(owner)).await? {
        Some(bytes) => Ok(Some(LocalPrekeyState::from_json(&bytes)?)),
        None => Ok(None),
    }
}
